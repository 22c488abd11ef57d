//! Capture sources
//!
//! A capture source owns one exclusive platform capture resource (a camera or
//! a virtual display) and pushes stride-corrected frames into a pipeline from
//! the platform's own callback thread.

pub mod camera;
pub mod screen;
pub mod synthetic;

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::pipeline::FrameProducer;

pub use camera::{CameraBackend, CameraDevice, CameraSource, PreviewCallback};
pub use screen::{
    ConsentOutcome, ConsentRequest, ConsentResponse, DisplayBackend, DisplayMetrics, GrantToken,
    ImageAvailableCallback, ImageSurface, PlatformImage, ScreenMirrorSource, VirtualDisplay,
    VirtualDisplaySpec,
};

/// Camera facing direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::Front => f.write_str("front"),
            Facing::Back => f.write_str("back"),
        }
    }
}

/// Which kind of source a session is using
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Camera,
    ScreenMirror,
}

/// A producer of video frames backed by an exclusive platform resource.
///
/// Lifecycle: `acquire` → `produce_frames` → `release`. `release` may be
/// called at any point, any number of times, including while a frame
/// callback is running on another thread.
pub trait CaptureSource: Send {
    fn kind(&self) -> SourceKind;

    /// Take the underlying device or display.
    ///
    /// Fails with `AlreadyAcquired` if called twice without a `release`.
    fn acquire(&mut self) -> Result<(), CaptureError>;

    /// Start delivering frames to `producer`. Requires a prior `acquire`.
    fn produce_frames(&mut self, producer: FrameProducer) -> Result<(), CaptureError>;

    /// Stop delivery and give the resource back. No-op when not acquired.
    fn release(&mut self);

    fn is_acquired(&self) -> bool;

    /// Whether the host must be in the foreground for capture to continue
    fn requires_foreground(&self) -> bool;
}
