//! Streaming session: state machine, controller and host lifecycle mapping

pub mod controller;
pub mod lifecycle;
pub mod state;

pub use controller::{CaptureBackends, SessionController, SourceSelection};
pub use lifecycle::{HostEvent, LaunchRequest, LifecycleCoordinator};
pub use state::{SessionEvent, SessionState, SessionStatus};
