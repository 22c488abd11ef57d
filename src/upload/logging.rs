//! Uploader that records throughput instead of sending anything.
//!
//! Used by the demo binary where no RTMP stack is linked in.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Endpoint, UploadObserver, Uploader};
use crate::error::UploaderError;
use crate::frame::Frame;

/// Frames between periodic stats lines
const LOG_EVERY_FRAMES: u64 = 300;

#[derive(Default)]
pub struct LoggingUploader {
    endpoint: Mutex<Option<Endpoint>>,
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl LoggingUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn bytes_submitted(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn is_broadcasting(&self) -> bool {
        self.endpoint.lock().is_some()
    }
}

impl Uploader for LoggingUploader {
    fn begin(&self, endpoint: &Endpoint, _observer: UploadObserver) -> Result<(), UploaderError> {
        let mut current = self.endpoint.lock();
        if let Some(active) = current.as_ref() {
            return Err(UploaderError::new(format!("already broadcasting to {}", active)));
        }

        tracing::info!(endpoint = %endpoint, "Broadcast started");
        self.frames.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        *current = Some(endpoint.clone());
        Ok(())
    }

    fn end(&self) {
        if let Some(endpoint) = self.endpoint.lock().take() {
            tracing::info!(
                endpoint = %endpoint,
                frames = self.frames_submitted(),
                kib = self.bytes_submitted() / 1024,
                "Broadcast ended"
            );
        }
    }

    fn submit_frame(&self, frame: &Frame) -> Result<(), UploaderError> {
        if !self.is_broadcasting() {
            return Err(UploaderError::new("no broadcast in progress"));
        }

        let frames = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        self.bytes.fetch_add(frame.size() as u64, Ordering::Relaxed);

        if frames % LOG_EVERY_FRAMES == 0 {
            tracing::info!(
                frames,
                width = frame.width,
                height = frame.height,
                kib = self.bytes_submitted() / 1024,
                "Upload stats"
            );
        }
        Ok(())
    }
}
