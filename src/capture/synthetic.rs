//! Test-pattern capture backends
//!
//! Stand-ins for a camera service and a display service on hosts without
//! either. Each runs its own frame thread and drives the same callback paths
//! a platform backend would, including row padding and a bounded image
//! surface.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::camera::{CameraBackend, CameraDevice, PreviewCallback};
use super::screen::{
    DisplayBackend, DisplayMetrics, GrantToken, ImageAvailableCallback, ImageSurface,
    PlatformImage, VirtualDisplay, VirtualDisplaySpec,
};
use super::Facing;
use crate::error::CaptureError;
use crate::frame::{ImageView, PixelFormat};

/// Row alignment applied to generated images, in bytes
const ROW_ALIGNMENT: usize = 64;

fn aligned_row_stride(width: u32, bytes_per_pixel: usize) -> usize {
    let row = width as usize * bytes_per_pixel;
    row.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT
}

/// Fill a padded RGBA image with a moving gradient
fn render_pattern(buf: &mut Vec<u8>, width: u32, height: u32, row_stride: usize, tick: u64) {
    buf.clear();
    buf.resize(row_stride * height as usize, 0);
    let shift = (tick % 256) as u8;

    for y in 0..height as usize {
        let row = &mut buf[y * row_stride..];
        for x in 0..width as usize {
            let px = &mut row[x * 4..x * 4 + 4];
            px[0] = (x as u8).wrapping_add(shift);
            px[1] = (y as u8).wrapping_add(shift);
            px[2] = shift;
            px[3] = 0xFF;
        }
    }
}

/// Background thread ticking at a fixed rate until stopped
struct FrameTicker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FrameTicker {
    fn spawn<F>(name: &str, fps: u32, mut tick: F) -> Result<Self, CaptureError>
    where
        F: FnMut(u64) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let interval = Duration::from_secs(1) / fps.max(1);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut n = 0u64;
                while running_for_loop.load(Ordering::Relaxed) {
                    tick(n);
                    n = n.wrapping_add(1);
                    thread::sleep(interval);
                }
            })
            .map_err(|e| CaptureError::Backend(e.to_string()))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Returns false if the tick thread panicked
    fn stop(&mut self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(()) => true,
                Err(_) => {
                    tracing::error!("Synthetic frame thread panicked");
                    false
                }
            },
            None => true,
        }
    }
}

impl Drop for FrameTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Camera service exposing a front and a back test-pattern camera
pub struct SyntheticCameraBackend {
    facings: Vec<Facing>,
    fps: u32,
    in_use: Arc<Mutex<Vec<Facing>>>,
}

impl SyntheticCameraBackend {
    pub fn new(fps: u32) -> Self {
        Self {
            facings: vec![Facing::Front, Facing::Back],
            fps,
            in_use: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Only expose cameras facing `facings`
    pub fn with_facings(mut self, facings: &[Facing]) -> Self {
        self.facings = facings.to_vec();
        self
    }
}

impl CameraBackend for SyntheticCameraBackend {
    fn open(&self, facing: Facing) -> Result<Box<dyn CameraDevice>, CaptureError> {
        if !self.facings.contains(&facing) {
            return Err(CaptureError::DeviceUnavailable(format!("no {} camera", facing)));
        }

        let mut in_use = self.in_use.lock();
        if in_use.contains(&facing) {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} camera held by another client",
                facing
            )));
        }
        in_use.push(facing);

        Ok(Box::new(SyntheticCamera {
            facing,
            fps: self.fps,
            in_use: self.in_use.clone(),
            ticker: None,
            open: true,
        }))
    }
}

struct SyntheticCamera {
    facing: Facing,
    fps: u32,
    in_use: Arc<Mutex<Vec<Facing>>>,
    ticker: Option<FrameTicker>,
    open: bool,
}

impl CameraDevice for SyntheticCamera {
    fn start_preview(
        &mut self,
        width: u32,
        height: u32,
        callback: PreviewCallback,
    ) -> Result<(), CaptureError> {
        self.stop_preview();

        let row_stride = aligned_row_stride(width, 4);
        let mut buf = Vec::new();
        let ticker = FrameTicker::spawn(&format!("camera-{}", self.facing), self.fps, move |n| {
            render_pattern(&mut buf, width, height, row_stride, n);
            callback(ImageView {
                data: &buf,
                width,
                height,
                row_stride,
                pixel_stride: 4,
                format: PixelFormat::Rgba8888,
            });
        })?;

        self.ticker = Some(ticker);
        Ok(())
    }

    fn stop_preview(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
    }

    fn close(&mut self) {
        self.stop_preview();
        if self.open {
            self.open = false;
            self.in_use.lock().retain(|f| *f != self.facing);
        }
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.close();
    }
}

/// Display service rendering a test pattern into virtual displays
pub struct SyntheticDisplayBackend {
    metrics: DisplayMetrics,
    fps: u32,
}

impl SyntheticDisplayBackend {
    pub fn new(metrics: DisplayMetrics, fps: u32) -> Self {
        Self { metrics, fps }
    }
}

impl DisplayBackend for SyntheticDisplayBackend {
    fn metrics(&self) -> DisplayMetrics {
        self.metrics
    }

    fn create_virtual_display(
        &self,
        grant: &GrantToken,
        spec: &VirtualDisplaySpec,
    ) -> Result<Box<dyn VirtualDisplay>, CaptureError> {
        if grant.as_str().is_empty() {
            return Err(CaptureError::ConsentDenied);
        }

        let surface = Arc::new(SyntheticSurface {
            queue: Mutex::new(VecDeque::new()),
            depth: spec.buffer_depth.max(1),
            checked_out: Arc::new(AtomicUsize::new(0)),
            width: spec.width,
            height: spec.height,
            row_stride: aligned_row_stride(spec.width, 4),
        });
        let listener: Arc<Mutex<Option<ImageAvailableCallback>>> = Arc::new(Mutex::new(None));

        let ticker = {
            let surface = surface.clone();
            let listener = listener.clone();
            FrameTicker::spawn(&spec.name, self.fps, move |n| {
                surface.render(n);
                if let Some(callback) = listener.lock().as_ref() {
                    callback(surface.as_ref());
                }
            })?
        };

        Ok(Box::new(SyntheticVirtualDisplay {
            listener,
            ticker: Some(ticker),
        }))
    }
}

struct SyntheticSurface {
    queue: Mutex<VecDeque<Vec<u8>>>,
    depth: usize,
    checked_out: Arc<AtomicUsize>,
    width: u32,
    height: u32,
    row_stride: usize,
}

impl SyntheticSurface {
    fn render(&self, tick: u64) {
        let mut queue = self.queue.lock();
        // Producer side never waits: the oldest unread image is overwritten.
        let mut buf = if queue.len() >= self.depth {
            queue.pop_front().unwrap_or_default()
        } else {
            Vec::new()
        };
        render_pattern(&mut buf, self.width, self.height, self.row_stride, tick);
        queue.push_back(buf);
    }
}

impl ImageSurface for SyntheticSurface {
    fn acquire_latest_image(&self) -> Option<Box<dyn PlatformImage>> {
        if self.checked_out.load(Ordering::Acquire) >= self.depth {
            return None;
        }

        let mut queue = self.queue.lock();
        let latest = queue.pop_back()?;
        queue.clear();

        self.checked_out.fetch_add(1, Ordering::AcqRel);
        Some(Box::new(SyntheticImage {
            data: latest,
            width: self.width,
            height: self.height,
            row_stride: self.row_stride,
            checked_out: self.checked_out.clone(),
            closed: false,
        }))
    }
}

struct SyntheticImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
    row_stride: usize,
    checked_out: Arc<AtomicUsize>,
    closed: bool,
}

impl PlatformImage for SyntheticImage {
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
            self.checked_out.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

struct SyntheticVirtualDisplay {
    listener: Arc<Mutex<Option<ImageAvailableCallback>>>,
    ticker: Option<FrameTicker>,
}

impl VirtualDisplay for SyntheticVirtualDisplay {
    fn set_image_listener(&mut self, listener: Option<ImageAvailableCallback>) {
        *self.listener.lock() = listener;
    }

    fn release(&mut self) {
        self.listener.lock().take();
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
    }
}

impl Drop for SyntheticVirtualDisplay {
    fn drop(&mut self) {
        self.release();
    }
}
