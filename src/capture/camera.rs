//! Physical camera capture
//!
//! Frames arrive through the preview callback at a fixed target resolution.
//! The resolution is not negotiated against the sizes the device supports; a
//! device delivering a different size is logged and its frames still flow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{CaptureSource, Facing, SourceKind};
use crate::error::CaptureError;
use crate::frame::{create_shared_pool, Frame, FrameStamper, ImageView, SharedFramePool};
use crate::pipeline::FrameProducer;

/// Preview frame callback, invoked on the camera's own thread
pub type PreviewCallback = Arc<dyn Fn(ImageView<'_>) + Send + Sync>;

/// Platform camera service
pub trait CameraBackend: Send + Sync {
    /// Open the camera facing `facing`.
    ///
    /// Returns `DeviceUnavailable` when no such camera exists or another
    /// client holds it.
    fn open(&self, facing: Facing) -> Result<Box<dyn CameraDevice>, CaptureError>;
}

/// An opened camera
pub trait CameraDevice: Send {
    fn start_preview(
        &mut self,
        width: u32,
        height: u32,
        callback: PreviewCallback,
    ) -> Result<(), CaptureError>;

    /// Stop the preview. Returns once no callback is running.
    fn stop_preview(&mut self);

    /// Hand the device back to the platform
    fn close(&mut self);
}

/// Capture source bound to one physical camera
pub struct CameraSource {
    backend: Arc<dyn CameraBackend>,
    facing: Facing,
    width: u32,
    height: u32,
    device: Option<Box<dyn CameraDevice>>,
    active: Arc<AtomicBool>,
    /// Set once the size mismatch warning was logged for this source
    size_warned: Arc<AtomicBool>,
    pool: SharedFramePool,
    stamper: Arc<FrameStamper>,
}

impl CameraSource {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        facing: Facing,
        width: u32,
        height: u32,
        pool_size: usize,
    ) -> Self {
        Self {
            backend,
            facing,
            width,
            height,
            device: None,
            active: Arc::new(AtomicBool::new(false)),
            size_warned: Arc::new(AtomicBool::new(false)),
            pool: create_shared_pool(pool_size, width as usize * height as usize * 4),
            stamper: Arc::new(FrameStamper::new()),
        }
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// Target preview resolution
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Frames seen by the preview callback so far
    pub fn frames_captured(&self) -> u64 {
        self.stamper.stamped()
    }

    /// Whether the device delivered a size other than the configured one
    pub fn size_mismatch_reported(&self) -> bool {
        self.size_warned.load(Ordering::Relaxed)
    }

    fn preview_callback(&self, producer: FrameProducer) -> PreviewCallback {
        let active = self.active.clone();
        let pool = self.pool.clone();
        let stamper = self.stamper.clone();
        let target = (self.width, self.height);
        let size_warned = self.size_warned.clone();

        let callback: PreviewCallback = Arc::new(move |view: ImageView<'_>| {
            if !active.load(Ordering::Acquire) {
                return;
            }

            if (view.width, view.height) != target && !size_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    requested = ?target,
                    delivered = ?(view.width, view.height),
                    "Camera delivered a different preview size than configured"
                );
            }

            let (sequence, timestamp) = stamper.stamp();
            match Frame::from_view(&view, &pool, sequence, timestamp) {
                Ok(frame) => {
                    producer.submit(frame);
                }
                Err(e) => {
                    tracing::warn!(sequence, error = %e, "Dropping malformed camera frame");
                }
            }
        });
        callback
    }
}

impl CaptureSource for CameraSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Camera
    }

    fn acquire(&mut self) -> Result<(), CaptureError> {
        if self.device.is_some() {
            return Err(CaptureError::AlreadyAcquired);
        }

        let device = self.backend.open(self.facing).map_err(|e| {
            tracing::error!(facing = %self.facing, error = %e, "Failed to open camera");
            e
        })?;
        self.device = Some(device);
        tracing::info!(facing = %self.facing, "Camera acquired");
        Ok(())
    }

    fn produce_frames(&mut self, producer: FrameProducer) -> Result<(), CaptureError> {
        let callback = self.preview_callback(producer);
        let device = self.device.as_mut().ok_or(CaptureError::NotAcquired)?;

        self.active.store(true, Ordering::Release);
        if let Err(e) = device.start_preview(self.width, self.height, callback) {
            self.active.store(false, Ordering::Release);
            return Err(e);
        }

        tracing::info!(width = self.width, height = self.height, "Camera preview started");
        Ok(())
    }

    fn release(&mut self) {
        self.active.store(false, Ordering::Release);

        if let Some(mut device) = self.device.take() {
            device.stop_preview();
            device.close();
            tracing::info!(facing = %self.facing, "Camera released");
        }
    }

    fn is_acquired(&self) -> bool {
        self.device.is_some()
    }

    fn requires_foreground(&self) -> bool {
        true
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}
