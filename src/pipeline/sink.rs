//! Frame consumers: uploader forwarding and local snapshot export

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::FrameConsumer;
use crate::config::SnapshotConfig;
use crate::error::{Error, Result, StorageError};
use crate::frame::{Frame, PixelFormat};
use crate::upload::{UploadObserver, Uploader};

/// Forwards frames to the streaming uploader.
///
/// Submission failures are reported to the session observer unchanged and
/// count as a failed frame; the next frame is tried normally.
pub struct UploadConsumer {
    uploader: Arc<dyn Uploader>,
    observer: UploadObserver,
}

impl UploadConsumer {
    pub fn new(uploader: Arc<dyn Uploader>, observer: UploadObserver) -> Self {
        Self { uploader, observer }
    }
}

impl FrameConsumer for UploadConsumer {
    fn consume(&mut self, frame: &Frame) -> Result<()> {
        self.uploader.submit_frame(frame).map_err(|e| {
            self.observer.report_failure(e.clone());
            Error::UploaderFailure(e)
        })
    }
}

/// File numbering shared by every snapshot sink of one process
pub type SnapshotCounter = Arc<AtomicU64>;

/// Writes frames as numbered PNG files under a fixed directory.
///
/// File numbers come from a [`SnapshotCounter`] that outlives the sink, so a
/// later session continues the numbering instead of overwriting.
pub struct SnapshotSink {
    directory: PathBuf,
    prefix: String,
    counter: SnapshotCounter,
    written: u64,
}

impl SnapshotSink {
    /// Create the sink, making its directory if needed
    pub fn create(
        config: &SnapshotConfig,
        counter: SnapshotCounter,
    ) -> std::result::Result<Self, StorageError> {
        Self::create_in(&config.directory, &config.prefix, counter)
    }

    pub fn create_in(
        directory: &Path,
        prefix: &str,
        counter: SnapshotCounter,
    ) -> std::result::Result<Self, StorageError> {
        if !directory.is_dir() {
            std::fs::create_dir_all(directory).map_err(|source| {
                tracing::error!(path = %directory.display(), error = %source, "Failed to create snapshot directory");
                StorageError::StorageUnavailable {
                    path: directory.to_path_buf(),
                    source,
                }
            })?;
        }

        Ok(Self {
            directory: directory.to_path_buf(),
            prefix: prefix.to_string(),
            counter,
            written: 0,
        })
    }

    /// Files written by this sink
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Path the next frame would be written to
    pub fn next_path(&self) -> PathBuf {
        self.path_for(self.counter.load(Ordering::SeqCst))
    }

    fn path_for(&self, number: u64) -> PathBuf {
        self.directory
            .join(format!("{}{}.png", self.prefix, number))
    }

    fn save(&self, frame: &Frame, path: &Path) -> std::result::Result<(), StorageError> {
        let write_failed = |reason: String| StorageError::WriteFailed {
            path: path.to_path_buf(),
            reason,
        };

        let result = match frame.pixel_format {
            PixelFormat::Rgba8888 => {
                image::RgbaImage::from_raw(frame.width, frame.height, frame.data().to_vec())
                    .ok_or_else(|| write_failed("buffer does not match dimensions".into()))?
                    .save(path)
            }
            PixelFormat::Bgra8888 => {
                let mut pixels = frame.data().to_vec();
                for px in pixels.chunks_exact_mut(4) {
                    px.swap(0, 2);
                }
                image::RgbaImage::from_raw(frame.width, frame.height, pixels)
                    .ok_or_else(|| write_failed("buffer does not match dimensions".into()))?
                    .save(path)
            }
            PixelFormat::Rgb888 => {
                image::RgbImage::from_raw(frame.width, frame.height, frame.data().to_vec())
                    .ok_or_else(|| write_failed("buffer does not match dimensions".into()))?
                    .save(path)
            }
        };

        result.map_err(|e| write_failed(e.to_string()))
    }
}

impl FrameConsumer for SnapshotSink {
    fn consume(&mut self, frame: &Frame) -> Result<()> {
        let path = self.path_for(self.counter.fetch_add(1, Ordering::SeqCst));
        self.save(frame, &path)?;

        self.written += 1;
        tracing::debug!(path = %path.display(), count = self.written, "Captured image");
        Ok(())
    }

    fn finish(&mut self) {
        tracing::info!(count = self.written, directory = %self.directory.display(), "Snapshot sink closed");
    }
}

/// Feeds every frame to several consumers in order
#[derive(Default)]
pub struct FanoutConsumer {
    consumers: Vec<Box<dyn FrameConsumer>>,
}

impl FanoutConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, consumer: Box<dyn FrameConsumer>) {
        self.consumers.push(consumer);
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

impl FrameConsumer for FanoutConsumer {
    /// Every consumer sees the frame; the first error is returned.
    fn consume(&mut self, frame: &Frame) -> Result<()> {
        let mut first_error = None;
        for consumer in &mut self.consumers {
            if let Err(e) = consumer.consume(frame) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn finish(&mut self) {
        for consumer in &mut self.consumers {
            consumer.finish();
        }
    }
}
