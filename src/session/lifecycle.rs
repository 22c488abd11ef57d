//! Host lifecycle coordination
//!
//! Maps host signals (foreground, background, destroy, service binding, the
//! user's start/stop toggle) onto session controller calls. Events can be
//! delivered by direct method calls or through a message queue drained on a
//! dedicated thread.

use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::controller::SessionController;
use crate::error::{Error, Result};
use crate::upload::Endpoint;

/// Signals delivered by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Foreground,
    Background,
    Destroy,
    /// Host finished binding to the streaming service
    Bound,
    /// User flipped the start/stop toggle
    Toggle(bool),
}

/// Parameters the host was launched with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    pub rtmp_url: Option<String>,
    pub broadcast_id: Option<String>,
}

impl LaunchRequest {
    pub fn new(rtmp_url: impl Into<String>) -> Self {
        Self {
            rtmp_url: Some(rtmp_url.into()),
            broadcast_id: None,
        }
    }

    pub fn with_broadcast_id(mut self, id: impl Into<String>) -> Self {
        self.broadcast_id = Some(id.into());
        self
    }
}

/// Drives a [`SessionController`] from host lifecycle signals
pub struct LifecycleCoordinator {
    controller: Arc<SessionController>,
    endpoint: Endpoint,
    broadcast_id: Option<String>,
    destroyed: bool,
}

impl LifecycleCoordinator {
    /// Validate the launch parameters. Nothing is started here.
    pub fn create(controller: Arc<SessionController>, request: LaunchRequest) -> Result<Self> {
        let url = match request.rtmp_url {
            Some(url) if !url.trim().is_empty() => url,
            _ => {
                tracing::warn!("Launched without an RTMP url, nothing to stream to");
                return Err(Error::Config("missing RTMP url".into()));
            }
        };

        Ok(Self {
            controller,
            endpoint: Endpoint::new(url.trim()),
            broadcast_id: request.broadcast_id,
            destroyed: false,
        })
    }

    /// Dispatch one host event. Events after `Destroy` are ignored.
    pub fn handle(&mut self, event: HostEvent) -> Result<()> {
        if self.destroyed {
            tracing::debug!(?event, "Host event after destroy ignored");
            return Ok(());
        }

        match event {
            HostEvent::Foreground => self.on_foreground(),
            HostEvent::Background => {
                self.on_background();
                Ok(())
            }
            HostEvent::Destroy => {
                self.on_destroy();
                Ok(())
            }
            HostEvent::Bound => self.on_bound(),
            HostEvent::Toggle(on) => self.on_toggle(on),
        }
    }

    pub fn on_foreground(&mut self) -> Result<()> {
        self.controller.on_host_foreground()
    }

    pub fn on_background(&mut self) {
        self.controller.on_host_background();
    }

    pub fn on_destroy(&mut self) {
        self.controller.on_host_destroy();
        self.destroyed = true;
        tracing::info!(broadcast_id = ?self.broadcast_id, "Host destroyed, session closed");
    }

    /// Service binding completed; streaming starts right away
    pub fn on_bound(&mut self) -> Result<()> {
        self.start_if_idle()
    }

    pub fn on_toggle(&mut self, on: bool) -> Result<()> {
        if on {
            self.start_if_idle()
        } else {
            self.controller.stop();
            Ok(())
        }
    }

    /// Broadcast id to hand back to the host when the session ends
    pub fn end_event(&self) -> Option<&str> {
        self.broadcast_id.as_deref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    /// Drain `events` on a dedicated thread until `Destroy` arrives or every
    /// sender is gone. A closed queue counts as destroy.
    pub fn spawn(mut self, events: Receiver<HostEvent>) -> std::io::Result<JoinHandle<Self>> {
        thread::Builder::new()
            .name("host-lifecycle".to_string())
            .spawn(move || {
                for event in events.iter() {
                    if let Err(e) = self.handle(event) {
                        tracing::error!(?event, error = %e, "Host event failed");
                    }
                    if self.destroyed {
                        break;
                    }
                }

                if !self.destroyed {
                    tracing::debug!("Host event queue closed");
                    self.on_destroy();
                }
                self
            })
    }

    fn start_if_idle(&mut self) -> Result<()> {
        if self.controller.is_streaming() {
            return Ok(());
        }
        self.controller.start(self.endpoint.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::error::CaptureError;
    use crate::session::{CaptureBackends, SessionState};
    use crate::testing::{CountingWakeLock, FakeCameraBackend, RecordingUploader};

    struct Harness {
        camera: Arc<FakeCameraBackend>,
        uploader: Arc<RecordingUploader>,
        wake: Arc<CountingWakeLock>,
        controller: Arc<SessionController>,
    }

    fn harness() -> Harness {
        let camera = Arc::new(FakeCameraBackend::new());
        let uploader = Arc::new(RecordingUploader::new());
        let wake = Arc::new(CountingWakeLock::new());
        let controller = Arc::new(SessionController::new(
            AppConfig::default(),
            CaptureBackends::new().with_camera(camera.clone()),
            uploader.clone(),
            wake.clone(),
        ));

        Harness {
            camera,
            uploader,
            wake,
            controller,
        }
    }

    #[test]
    fn test_missing_url_is_config_error() {
        let h = harness();

        let err = LifecycleCoordinator::create(h.controller.clone(), LaunchRequest::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));

        let err = LifecycleCoordinator::create(h.controller.clone(), LaunchRequest::new("  "))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.wake.acquired(), 0);
    }

    #[test]
    fn test_bound_starts_and_destroy_stops() {
        let h = harness();
        let request = LaunchRequest::new("rtmp://example/endpoint").with_broadcast_id("b-42");
        let mut coordinator = LifecycleCoordinator::create(h.controller.clone(), request).unwrap();

        coordinator.handle(HostEvent::Bound).unwrap();
        assert!(h.controller.is_streaming());
        assert_eq!(h.uploader.begins(), 1);

        // A second bind does not restart
        coordinator.handle(HostEvent::Bound).unwrap();
        assert_eq!(h.uploader.begins(), 1);

        coordinator.handle(HostEvent::Destroy).unwrap();
        assert!(coordinator.is_destroyed());
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.uploader.ends(), 1);
        assert_eq!(coordinator.end_event(), Some("b-42"));

        coordinator.handle(HostEvent::Bound).unwrap();
        assert_eq!(h.uploader.begins(), 1);
    }

    #[test]
    fn test_background_and_foreground_map_to_controller() {
        let h = harness();
        let mut coordinator = LifecycleCoordinator::create(
            h.controller.clone(),
            LaunchRequest::new("rtmp://example/endpoint"),
        )
        .unwrap();

        coordinator.handle(HostEvent::Bound).unwrap();
        coordinator.handle(HostEvent::Background).unwrap();
        assert_eq!(h.camera.closed(), 1);
        assert!(h.controller.is_streaming());

        coordinator.handle(HostEvent::Foreground).unwrap();
        assert_eq!(h.camera.opened(), 2);

        coordinator.handle(HostEvent::Destroy).unwrap();
        assert_eq!(h.uploader.ends(), 1);
        assert_eq!(h.wake.held(), 0);
    }

    #[test]
    fn test_toggle_starts_and_stops() {
        let h = harness();
        let mut coordinator = LifecycleCoordinator::create(
            h.controller.clone(),
            LaunchRequest::new("rtmp://example/endpoint"),
        )
        .unwrap();

        coordinator.handle(HostEvent::Toggle(true)).unwrap();
        assert!(h.controller.is_streaming());
        coordinator.handle(HostEvent::Toggle(false)).unwrap();
        assert_eq!(h.controller.state(), SessionState::Idle);
        coordinator.handle(HostEvent::Toggle(false)).unwrap();
        assert_eq!(h.uploader.ends(), 1);

        coordinator.handle(HostEvent::Toggle(true)).unwrap();
        assert_eq!(h.uploader.begins(), 2);
        coordinator.on_destroy();
    }

    #[test]
    fn test_start_failure_surfaces_through_handle() {
        let h = harness();
        h.camera.set_available(false);
        let mut coordinator = LifecycleCoordinator::create(
            h.controller.clone(),
            LaunchRequest::new("rtmp://example/endpoint"),
        )
        .unwrap();

        let err = coordinator.handle(HostEvent::Bound).unwrap_err();
        assert!(matches!(err, Error::Capture(CaptureError::DeviceUnavailable(_))));
        assert_eq!(h.controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_queue_driven_coordinator() {
        let h = harness();
        let coordinator = LifecycleCoordinator::create(
            h.controller.clone(),
            LaunchRequest::new("rtmp://example/endpoint").with_broadcast_id("b-1"),
        )
        .unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = coordinator.spawn(rx).unwrap();

        tx.send(HostEvent::Bound).unwrap();
        tx.send(HostEvent::Background).unwrap();
        tx.send(HostEvent::Foreground).unwrap();
        tx.send(HostEvent::Destroy).unwrap();
        let coordinator = handle.join().unwrap();

        assert!(coordinator.is_destroyed());
        assert_eq!(coordinator.end_event(), Some("b-1"));
        assert_eq!(h.uploader.begins(), 1);
        assert_eq!(h.uploader.ends(), 1);
        assert_eq!(h.camera.opened(), 2);
        assert_eq!(h.camera.closed(), 2);
    }

    #[test]
    fn test_closed_queue_counts_as_destroy() {
        let h = harness();
        let coordinator = LifecycleCoordinator::create(
            h.controller.clone(),
            LaunchRequest::new("rtmp://example/endpoint"),
        )
        .unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = coordinator.spawn(rx).unwrap();

        tx.send(HostEvent::Bound).unwrap();
        drop(tx);
        let coordinator = handle.join().unwrap();

        assert!(coordinator.is_destroyed());
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.uploader.ends(), 1);
    }
}
