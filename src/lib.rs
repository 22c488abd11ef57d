//! # Capture Streamer
//!
//! Capture session core for live streaming from a camera or a mirrored screen.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                                  HOST                                     │
//! │   foreground / background / destroy / bound / toggle                      │
//! └───────────────────────────────────┬──────────────────────────────────────┘
//!                                     ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │              Lifecycle Coordinator (session::lifecycle)                   │
//! │        direct calls, or a host-event queue drained on its own thread      │
//! └───────────────────────────────────┬──────────────────────────────────────┘
//!                                     ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │               Session Controller (session::controller)                    │
//! │   Idle → Starting → Streaming → Stopping → Idle        (Error → Idle)     │
//! │   owns: wake lock guard, capture source, frame pipeline                   │
//! └──────────┬─────────────────────────────┬─────────────────────────────────┘
//!            │ acquire / release           │ begin / end
//!            ▼                             ▼
//! ┌─────────────────────────┐     ┌─────────────────────────┐
//! │  Capture Source         │     │  Uploader (upload)      │
//! │  camera │ screen mirror │     │  external collaborator  │
//! └──────────┬──────────────┘     └────────────▲────────────┘
//!            │ platform callback thread        │ submit_frame
//!            │ strip row padding (frame)       │
//!            ▼                                 │
//! ┌─────────────────────────┐     ┌────────────┴────────────┐
//! │  Frame Pool (frame)     │────▶│  Frame Pipeline         │
//! │  ArrayQueue free list   │     │  bounded, lossy, SPSC   │
//! └─────────────────────────┘     │  consumer thread        │
//!                                 │   ├─ upload consumer    │
//!                                 │   └─ snapshot sink (png)│
//!                                 └─────────────────────────┘
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod power;
pub mod session;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Camera preview width. Not negotiated against the device.
    pub const CAMERA_WIDTH: u32 = 640;

    /// Camera preview height
    pub const CAMERA_HEIGHT: u32 = 480;

    /// Default capture frame rate
    pub const DEFAULT_FPS: u32 = 30;

    /// Images the screen mirroring surface holds at most
    pub const SCREEN_BUFFER_DEPTH: usize = 2;

    /// Default pipeline depth, matching the screen surface
    pub const DEFAULT_PIPELINE_DEPTH: usize = SCREEN_BUFFER_DEPTH;

    /// Idle frame buffers kept per source
    pub const DEFAULT_FRAME_POOL_SIZE: usize = 4;

    /// File name prefix for exported snapshots
    pub const SNAPSHOT_PREFIX: &str = "myscreen_";

    /// Tag the session's wake lock is held under
    pub const WAKE_LOCK_TAG: &str = "capture-streamer:session";

    /// Name of the mirroring virtual display
    pub const VIRTUAL_DISPLAY_NAME: &str = "screencap";

    /// Session events buffered for observers
    pub const EVENT_QUEUE_CAPACITY: usize = 64;

    /// Request id of the screen capture consent prompt
    pub const CONSENT_REQUEST_ID: u32 = 100;
}
