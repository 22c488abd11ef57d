//! Fakes shared by the unit tests

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture::{
    CameraBackend, CameraDevice, DisplayBackend, DisplayMetrics, Facing, GrantToken,
    ImageAvailableCallback, ImageSurface, PlatformImage, PreviewCallback, VirtualDisplay,
    VirtualDisplaySpec,
};
use crate::error::{CaptureError, Error, PowerError, Result, UploaderError};
use crate::frame::{Frame, ImageView, PixelFormat};
use crate::pipeline::FrameConsumer;
use crate::power::WakeLock;
use crate::upload::{Endpoint, UploadObserver, Uploader};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Copy of a frame that outlives its pooled buffer
#[derive(Debug, Clone)]
pub(crate) struct RecordedFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub row_stride: usize,
    pub data: Bytes,
}

impl From<&Frame> for RecordedFrame {
    fn from(frame: &Frame) -> Self {
        Self {
            sequence: frame.sequence,
            width: frame.width,
            height: frame.height,
            row_stride: frame.row_stride,
            data: frame.to_bytes(),
        }
    }
}

#[derive(Default)]
struct LogState {
    frames: Vec<RecordedFrame>,
    attempts: usize,
}

/// Frames seen by a recording consumer or uploader, shared with the test
#[derive(Clone, Default)]
pub(crate) struct FrameLog {
    inner: Arc<(Mutex<LogState>, Condvar)>,
}

impl FrameLog {
    pub fn snapshot(&self) -> Vec<RecordedFrame> {
        self.inner.0.lock().frames.clone()
    }

    /// Block until `n` frames were recorded
    pub fn wait_for(&self, n: usize) {
        self.wait_until("recorded frames", |s| s.frames.len() >= n);
    }

    /// Block until `n` frames were offered, failed or not
    pub fn wait_for_attempts(&self, n: usize) {
        self.wait_until("frame attempts", |s| s.attempts >= n);
    }

    /// Count one attempt; returns its 1-based number
    fn attempt(&self) -> usize {
        let (lock, cv) = &*self.inner;
        let mut state = lock.lock();
        state.attempts += 1;
        cv.notify_all();
        state.attempts
    }

    fn record(&self, frame: &Frame) {
        let (lock, cv) = &*self.inner;
        lock.lock().frames.push(RecordedFrame::from(frame));
        cv.notify_all();
    }

    fn wait_until(&self, what: &str, done: impl Fn(&LogState) -> bool) {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        let (lock, cv) = &*self.inner;
        let mut state = lock.lock();
        while !done(&state) {
            if cv.wait_until(&mut state, deadline).timed_out() && !done(&state) {
                panic!("timed out waiting for {}", what);
            }
        }
    }
}

/// Consumer that records every frame, optionally failing every n-th one
pub(crate) struct RecordingConsumer {
    log: FrameLog,
    fail_every: Option<usize>,
}

impl RecordingConsumer {
    pub fn new() -> (Self, FrameLog) {
        let log = FrameLog::default();
        (
            Self {
                log: log.clone(),
                fail_every: None,
            },
            log,
        )
    }

    pub fn failing_every(n: usize) -> (Self, FrameLog) {
        let (mut consumer, log) = Self::new();
        consumer.fail_every = Some(n.max(1));
        (consumer, log)
    }
}

impl FrameConsumer for RecordingConsumer {
    fn consume(&mut self, frame: &Frame) -> Result<()> {
        let attempt = self.log.attempt();
        if self.fail_every.is_some_and(|n| attempt % n == 0) {
            return Err(Error::UploaderFailure(UploaderError::new("injected failure")));
        }
        self.log.record(frame);
        Ok(())
    }
}

#[derive(Default)]
struct GateState {
    open: bool,
    holding: bool,
}

/// Test side of a [`GatedConsumer`]
#[derive(Clone, Default)]
pub(crate) struct Gate {
    inner: Arc<(Mutex<GateState>, Condvar)>,
}

impl Gate {
    /// Let the consumer through, now and for every later frame
    pub fn open(&self) {
        let (lock, cv) = &*self.inner;
        lock.lock().open = true;
        cv.notify_all();
    }

    /// Block until the consumer is parked on a frame
    pub fn wait_until_holding(&self) {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        let (lock, cv) = &*self.inner;
        let mut state = lock.lock();
        while !state.holding {
            if cv.wait_until(&mut state, deadline).timed_out() && !state.holding {
                panic!("timed out waiting for the consumer to hold a frame");
            }
        }
    }
}

/// Consumer that parks on each frame until its gate opens
pub(crate) struct GatedConsumer {
    gate: Gate,
}

impl GatedConsumer {
    pub fn new() -> (Self, Gate) {
        let gate = Gate::default();
        (Self { gate: gate.clone() }, gate)
    }
}

impl FrameConsumer for GatedConsumer {
    fn consume(&mut self, _frame: &Frame) -> Result<()> {
        let (lock, cv) = &*self.gate.inner;
        let mut state = lock.lock();
        state.holding = true;
        cv.notify_all();
        while !state.open {
            cv.wait(&mut state);
        }
        state.holding = false;
        Ok(())
    }
}

/// Camera service whose frames are pushed by the test through [`emit`](Self::emit)
pub(crate) struct FakeCameraBackend {
    facings: Vec<Facing>,
    available: AtomicBool,
    preview: Arc<Mutex<Option<PreviewCallback>>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl FakeCameraBackend {
    pub fn new() -> Self {
        Self::with_facings(&[Facing::Front, Facing::Back])
    }

    pub fn with_facings(facings: &[Facing]) -> Self {
        Self {
            facings: facings.to_vec(),
            available: AtomicBool::new(true),
            preview: Arc::new(Mutex::new(None)),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every camera look held by another client
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver one RGBA preview image. Returns false when no preview runs.
    pub fn emit(&self, data: &[u8], width: u32, height: u32, row_stride: usize) -> bool {
        let preview = self.preview.lock();
        match preview.as_ref() {
            Some(callback) => {
                callback(ImageView {
                    data,
                    width,
                    height,
                    row_stride,
                    pixel_stride: 4,
                    format: PixelFormat::Rgba8888,
                });
                true
            }
            None => false,
        }
    }
}

impl CameraBackend for FakeCameraBackend {
    fn open(&self, facing: Facing) -> std::result::Result<Box<dyn CameraDevice>, CaptureError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceUnavailable("camera in use".into()));
        }
        if !self.facings.contains(&facing) {
            return Err(CaptureError::DeviceUnavailable(format!("no {} camera", facing)));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCamera {
            preview: self.preview.clone(),
            closed: self.closed.clone(),
            open: true,
        }))
    }
}

struct FakeCamera {
    preview: Arc<Mutex<Option<PreviewCallback>>>,
    closed: Arc<AtomicUsize>,
    open: bool,
}

impl CameraDevice for FakeCamera {
    fn start_preview(
        &mut self,
        _width: u32,
        _height: u32,
        callback: PreviewCallback,
    ) -> std::result::Result<(), CaptureError> {
        *self.preview.lock() = Some(callback);
        Ok(())
    }

    fn stop_preview(&mut self) {
        // Waits for an in-flight emit, which holds the lock
        self.preview.lock().take();
    }

    fn close(&mut self) {
        self.stop_preview();
        if self.open {
            self.open = false;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Display service with a test-fed image queue
pub(crate) struct FakeDisplayBackend {
    metrics: DisplayMetrics,
    surface: Arc<FakeSurface>,
    listener: Arc<Mutex<Option<ImageAvailableCallback>>>,
    created: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl FakeDisplayBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            metrics: DisplayMetrics {
                width,
                height,
                density_dpi: 320,
            },
            surface: Arc::new(FakeSurface {
                queue: Mutex::new(VecDeque::new()),
                width,
                height,
                open_images: Arc::new(AtomicUsize::new(0)),
            }),
            listener: Arc::new(Mutex::new(None)),
            created: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Images checked out and not yet closed
    pub fn open_images(&self) -> usize {
        self.surface.open_images.load(Ordering::SeqCst)
    }

    pub fn queue_image(&self, data: Vec<u8>, row_stride: usize) {
        self.surface.queue.lock().push_back((data, row_stride));
    }

    /// Fire the frame-available listener. Returns false if none is installed.
    pub fn notify(&self) -> bool {
        let listener = self.listener.lock();
        match listener.as_ref() {
            Some(callback) => {
                callback(self.surface.as_ref());
                true
            }
            None => false,
        }
    }
}

impl DisplayBackend for FakeDisplayBackend {
    fn metrics(&self) -> DisplayMetrics {
        self.metrics
    }

    fn create_virtual_display(
        &self,
        _grant: &GrantToken,
        _spec: &VirtualDisplaySpec,
    ) -> std::result::Result<Box<dyn VirtualDisplay>, CaptureError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeVirtualDisplay {
            listener: self.listener.clone(),
            released: self.released.clone(),
            live: true,
        }))
    }
}

struct FakeSurface {
    queue: Mutex<VecDeque<(Vec<u8>, usize)>>,
    width: u32,
    height: u32,
    open_images: Arc<AtomicUsize>,
}

impl ImageSurface for FakeSurface {
    fn acquire_latest_image(&self) -> Option<Box<dyn PlatformImage>> {
        let mut queue = self.queue.lock();
        let (data, row_stride) = queue.pop_back()?;
        queue.clear();

        self.open_images.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(FakeImage {
            data,
            width: self.width,
            height: self.height,
            row_stride,
            open_images: self.open_images.clone(),
            closed: false,
        }))
    }
}

struct FakeImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
    row_stride: usize,
    open_images: Arc<AtomicUsize>,
    closed: bool,
}

impl PlatformImage for FakeImage {
    fn view(&self) -> ImageView<'_> {
        ImageView {
            data: &self.data,
            width: self.width,
            height: self.height,
            row_stride: self.row_stride,
            pixel_stride: 4,
            format: PixelFormat::Rgba8888,
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_images.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct FakeVirtualDisplay {
    listener: Arc<Mutex<Option<ImageAvailableCallback>>>,
    released: Arc<AtomicUsize>,
    live: bool,
}

impl VirtualDisplay for FakeVirtualDisplay {
    fn set_image_listener(&mut self, listener: Option<ImageAvailableCallback>) {
        *self.listener.lock() = listener;
    }

    fn release(&mut self) {
        self.listener.lock().take();
        if self.live {
            self.live = false;
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Uploader that counts calls and records submitted frames
pub(crate) struct RecordingUploader {
    begins: AtomicUsize,
    ends: AtomicUsize,
    begin_failure: Mutex<Option<String>>,
    submit_failure: Mutex<Option<String>>,
    observer: Mutex<Option<UploadObserver>>,
    log: FrameLog,
}

impl RecordingUploader {
    pub fn new() -> Self {
        Self {
            begins: AtomicUsize::new(0),
            ends: AtomicUsize::new(0),
            begin_failure: Mutex::new(None),
            submit_failure: Mutex::new(None),
            observer: Mutex::new(None),
            log: FrameLog::default(),
        }
    }

    pub fn fail_begin(&self, message: &str) {
        *self.begin_failure.lock() = Some(message.to_string());
    }

    pub fn fail_submissions(&self, message: &str) {
        *self.submit_failure.lock() = Some(message.to_string());
    }

    /// Report a failure through the observer handed to `begin`
    pub fn report_async_failure(&self, message: &str) {
        if let Some(observer) = self.observer.lock().as_ref() {
            observer.report_failure(UploaderError::new(message));
        }
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn ends(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }

    /// Frames accepted so far
    pub fn frames(&self) -> usize {
        self.log.snapshot().len()
    }

    pub fn wait_for_frames(&self, n: usize) {
        self.log.wait_for(n);
    }

    pub fn wait_for_attempts(&self, n: usize) {
        self.log.wait_for_attempts(n);
    }
}

impl Uploader for RecordingUploader {
    fn begin(
        &self,
        _endpoint: &Endpoint,
        observer: UploadObserver,
    ) -> std::result::Result<(), UploaderError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.begin_failure.lock().clone() {
            return Err(UploaderError::new(message));
        }
        *self.observer.lock() = Some(observer);
        Ok(())
    }

    fn end(&self) {
        self.ends.fetch_add(1, Ordering::SeqCst);
        self.observer.lock().take();
    }

    fn submit_frame(&self, frame: &Frame) -> std::result::Result<(), UploaderError> {
        self.log.attempt();
        if let Some(message) = self.submit_failure.lock().clone() {
            return Err(UploaderError::new(message));
        }
        self.log.record(frame);
        Ok(())
    }
}

/// Wake lock that only counts
#[derive(Default)]
pub(crate) struct CountingWakeLock {
    acquired: AtomicUsize,
    released: AtomicUsize,
    busy: AtomicBool,
}

impl CountingWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make acquisition fail as if another holder had it
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Acquisitions not matched by a release
    pub fn held(&self) -> usize {
        self.acquired() - self.released()
    }
}

impl WakeLock for CountingWakeLock {
    fn acquire(&self, tag: &str) -> std::result::Result<(), PowerError> {
        if self.busy.load(Ordering::SeqCst) {
            return Err(PowerError::AlreadyHeld(tag.to_string()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self, _tag: &str) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
