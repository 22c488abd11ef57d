//! Error types for the capture streaming core

use std::path::PathBuf;
use thiserror::Error;

use crate::session::SessionState;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Uploader failure: {0}")]
    UploaderFailure(#[from] UploaderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Power error: {0}")]
    Power(#[from] PowerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture source errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Screen capture consent denied")]
    ConsentDenied,

    #[error("Capture source has not been acquired")]
    NotAcquired,

    #[error("Capture source is already acquired")]
    AlreadyAcquired,

    #[error("Capture backend error: {0}")]
    Backend(String),
}

/// Session state machine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Cannot {command} while session is {from}")]
    InvalidStateTransition {
        from: SessionState,
        command: &'static str,
    },

    #[error("No capture backend configured for {0}")]
    NoBackend(&'static str),

    #[error("Pipeline failed to open: {0}")]
    Pipeline(String),
}

/// Opaque failure reported by the streaming uploader.
///
/// The message is carried as produced by the uploader and never reinterpreted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct UploaderError(pub String);

impl UploaderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Local snapshot storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage directory {} unavailable: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {reason}", path.display())]
    WriteFailed { path: PathBuf, reason: String },
}

/// Per-frame errors. These never end a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Row stride {row_stride} smaller than {pixel_stride} x {width}")]
    InvalidStride {
        row_stride: usize,
        pixel_stride: usize,
        width: u32,
    },

    #[error("Frame buffer truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Frame has zero width or height")]
    Empty,
}

/// Wake lock errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PowerError {
    #[error("Wake lock already held by {0}")]
    AlreadyHeld(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
