//! Streaming uploader interface
//!
//! The uploader owns encoding and network transport. This crate only promises
//! that frames handed to it are stride-corrected and in a stable pixel format.

pub mod logging;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::UploaderError;
use crate::frame::Frame;
use crate::session::SessionEvent;

pub use logging::LoggingUploader;

/// Broadcast ingestion endpoint (RTMP URL including stream key).
///
/// Treated as opaque. `Display` hides the final path segment, which is where
/// ingest URLs carry their key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// Full URI, key included
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URI with the last path segment masked
    pub fn redacted(&self) -> String {
        match self.0.rsplit_once('/') {
            Some((base, key)) if !key.is_empty() && !base.ends_with('/') => {
                format!("{}/***", base)
            }
            _ => self.0.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self.redacted())
    }
}

impl From<&str> for Endpoint {
    fn from(uri: &str) -> Self {
        Self::new(uri)
    }
}

impl From<String> for Endpoint {
    fn from(uri: String) -> Self {
        Self(uri)
    }
}

/// Channel for uploader failures that happen outside a direct call
/// (dropped connection, encoder stall). Forwarded to session observers as-is.
#[derive(Clone)]
pub struct UploadObserver {
    tx: Sender<SessionEvent>,
}

impl UploadObserver {
    pub(crate) fn new(tx: Sender<SessionEvent>) -> Self {
        Self { tx }
    }

    pub fn report_failure(&self, error: UploaderError) {
        if self.tx.try_send(SessionEvent::UploaderFailure(error)).is_err() {
            tracing::debug!("Session event queue full, uploader failure not delivered");
        }
    }
}

/// External streaming uploader
pub trait Uploader: Send + Sync {
    /// Open the broadcast to `endpoint`
    fn begin(&self, endpoint: &Endpoint, observer: UploadObserver) -> Result<(), UploaderError>;

    /// Close the broadcast
    fn end(&self);

    /// Hand over one frame. Called from the pipeline consumer thread.
    fn submit_frame(&self, frame: &Frame) -> Result<(), UploaderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display_hides_stream_key() {
        let endpoint = Endpoint::new("rtmp://a.rtmp.example.com/live2/abcd-efgh");
        assert_eq!(endpoint.to_string(), "rtmp://a.rtmp.example.com/live2/***");
        assert_eq!(endpoint.as_str(), "rtmp://a.rtmp.example.com/live2/abcd-efgh");
        assert!(!format!("{:?}", endpoint).contains("abcd"));
    }

    #[test]
    fn test_endpoint_without_key_is_unchanged() {
        assert_eq!(Endpoint::new("rtmp://host/").to_string(), "rtmp://host/");
        assert_eq!(Endpoint::new("rtmp://host").to_string(), "rtmp://host");
    }
}
