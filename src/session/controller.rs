//! Session controller
//!
//! Owns everything a broadcast attempt holds: the wake lock, the capture
//! source and the frame pipeline. Commands are serialized through one mutex,
//! so a `start` racing a `stop` is resolved by whichever gets the lock first
//! and the other is checked against the resulting state.

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use super::state::{SessionEvent, SessionState, SessionStatus};
use crate::capture::{
    CameraBackend, CameraSource, CaptureSource, ConsentOutcome, DisplayBackend, Facing,
    ScreenMirrorSource, SourceKind,
};
use crate::config::AppConfig;
use crate::constants::EVENT_QUEUE_CAPACITY;
use crate::error::{Error, Result, SessionError};
use crate::pipeline::{
    FanoutConsumer, FrameConsumer, FramePipeline, PipelineStats, SnapshotCounter, SnapshotSink,
    UploadConsumer,
};
use crate::power::{WakeLock, WakeLockGuard};
use crate::upload::{Endpoint, UploadObserver, Uploader};

/// Which capture source the next `start` builds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelection {
    Camera(Facing),
    ScreenMirror(ConsentOutcome),
}

impl SourceSelection {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSelection::Camera(_) => SourceKind::Camera,
            SourceSelection::ScreenMirror(_) => SourceKind::ScreenMirror,
        }
    }
}

/// Platform services available to build capture sources from
#[derive(Clone, Default)]
pub struct CaptureBackends {
    pub camera: Option<Arc<dyn CameraBackend>>,
    pub display: Option<Arc<dyn DisplayBackend>>,
}

impl CaptureBackends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(mut self, backend: Arc<dyn CameraBackend>) -> Self {
        self.camera = Some(backend);
        self
    }

    pub fn with_display(mut self, backend: Arc<dyn DisplayBackend>) -> Self {
        self.display = Some(backend);
        self
    }
}

/// Resources held by one running broadcast
struct ActiveSession {
    id: Uuid,
    endpoint: Endpoint,
    started_at: DateTime<Utc>,
    source: Box<dyn CaptureSource>,
    pipeline: FramePipeline,
    wake: WakeLockGuard,
    /// Source is not held because of the background and must be acquired on foreground
    resume_on_foreground: bool,
}

struct SessionInner {
    state: SessionState,
    selection: SourceSelection,
    active: Option<ActiveSession>,
    foreground: bool,
    last_error: Option<String>,
}

/// Drives one streaming session through its lifecycle
pub struct SessionController {
    config: AppConfig,
    backends: CaptureBackends,
    uploader: Arc<dyn Uploader>,
    wake_lock: Arc<dyn WakeLock>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    /// Snapshot file numbering, continued across sessions
    snapshots: SnapshotCounter,
    inner: Mutex<SessionInner>,
}

impl SessionController {
    pub fn new(
        config: AppConfig,
        backends: CaptureBackends,
        uploader: Arc<dyn Uploader>,
        wake_lock: Arc<dyn WakeLock>,
    ) -> Self {
        let (events_tx, events_rx) = bounded(EVENT_QUEUE_CAPACITY);
        let selection = SourceSelection::Camera(config.camera.facing);

        Self {
            config,
            backends,
            uploader,
            wake_lock,
            events_tx,
            events_rx,
            snapshots: SnapshotCounter::default(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                selection,
                active: None,
                foreground: true,
                last_error: None,
            }),
        }
    }

    /// Choose the source for the next `start`. Only allowed while idle.
    pub fn select_source(&self, selection: SourceSelection) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Idle {
            return Err(SessionError::InvalidStateTransition {
                from: inner.state,
                command: "select a source",
            }
            .into());
        }

        tracing::debug!(source = ?selection.kind(), "Capture source selected");
        inner.selection = selection;
        Ok(())
    }

    /// Start broadcasting to `endpoint`.
    ///
    /// On failure every resource taken so far is released, the session is
    /// back in `Idle`, and the failure is returned. While the host is in the
    /// background a foreground-only source is not acquired until
    /// [`on_host_foreground`](Self::on_host_foreground).
    pub fn start(&self, endpoint: impl Into<Endpoint>) -> Result<()> {
        let endpoint = endpoint.into();
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Idle {
            return Err(SessionError::InvalidStateTransition {
                from: inner.state,
                command: "start",
            }
            .into());
        }

        self.transition(&mut inner, SessionState::Starting);
        let selection = inner.selection.clone();

        match self.bring_up(&selection, &endpoint, inner.foreground) {
            Ok(active) => {
                tracing::info!(
                    session_id = %active.id,
                    endpoint = %endpoint,
                    source = ?selection.kind(),
                    "Streaming started"
                );
                let deferred = active.resume_on_foreground.then(|| active.source.kind());
                inner.active = Some(active);
                inner.last_error = None;
                self.transition(&mut inner, SessionState::Streaming);
                if let Some(kind) = deferred {
                    tracing::info!(source = ?kind, "Capture deferred until host returns to foreground");
                    self.publish(SessionEvent::SourceSuspended(kind));
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(endpoint = %endpoint, error = %e, "Failed to start streaming");
                self.transition(&mut inner, SessionState::Error);
                inner.last_error = Some(e.to_string());
                self.transition(&mut inner, SessionState::Idle);
                Err(e)
            }
        }
    }

    /// End the broadcast and release everything. No-op unless starting or streaming.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if !inner.state.holds_resources() {
            tracing::debug!(state = %inner.state, "Stop ignored");
            return;
        }

        self.transition(&mut inner, SessionState::Stopping);
        if let Some(active) = inner.active.take() {
            self.tear_down(active);
        }
        self.transition(&mut inner, SessionState::Idle);
    }

    /// Host went to the background.
    ///
    /// Sources that need a visible host are released; the broadcast stays up
    /// and the source is re-acquired by [`on_host_foreground`](Self::on_host_foreground).
    pub fn on_host_background(&self) {
        let mut inner = self.inner.lock();
        inner.foreground = false;
        if inner.state != SessionState::Streaming {
            return;
        }

        let Some(active) = inner.active.as_mut() else {
            return;
        };
        if active.source.requires_foreground() && active.source.is_acquired() {
            active.source.release();
            active.resume_on_foreground = true;
            let kind = active.source.kind();
            tracing::info!(source = ?kind, "Capture suspended while host is in background");
            self.publish(SessionEvent::SourceSuspended(kind));
        }
    }

    /// Host came back to the foreground; re-acquire a suspended source.
    ///
    /// If the source cannot be re-acquired the whole session is torn down
    /// and the failure returned.
    pub fn on_host_foreground(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.foreground = true;
        if inner.state != SessionState::Streaming {
            return Ok(());
        }

        let resumed = match inner.active.as_mut() {
            Some(active) if active.resume_on_foreground => {
                let result = match active.source.acquire() {
                    Ok(()) => active.source.produce_frames(active.pipeline.producer()),
                    Err(e) => Err(e),
                };
                if result.is_ok() {
                    active.resume_on_foreground = false;
                }
                Some((active.source.kind(), result))
            }
            _ => None,
        };

        match resumed {
            None => Ok(()),
            Some((kind, Ok(()))) => {
                tracing::info!(source = ?kind, "Capture resumed");
                self.publish(SessionEvent::SourceResumed(kind));
                Ok(())
            }
            Some((kind, Err(e))) => {
                tracing::error!(source = ?kind, error = %e, "Failed to resume capture");
                self.transition(&mut inner, SessionState::Error);
                inner.last_error = Some(e.to_string());
                if let Some(active) = inner.active.take() {
                    self.tear_down(active);
                }
                self.transition(&mut inner, SessionState::Idle);
                Err(e.into())
            }
        }
    }

    /// Host is going away for good
    pub fn on_host_destroy(&self) {
        self.stop();
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.lock().state == SessionState::Streaming
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Message of the last failed start or resume
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// Receiver for session notifications. All clones share one queue.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.inner.lock();
        let active = inner.active.as_ref();

        SessionStatus {
            state: inner.state,
            session_id: active.map(|a| a.id),
            endpoint: active.map(|a| a.endpoint.redacted()),
            source: Some(inner.selection.kind()),
            source_acquired: active.is_some_and(|a| a.source.is_acquired()),
            foreground: inner.foreground,
            started_at: active.map(|a| a.started_at),
            pipeline: active.map(|a| a.pipeline.stats()),
            last_error: inner.last_error.clone(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn transition(&self, inner: &mut SessionInner, next: SessionState) {
        let from = inner.state;
        debug_assert!(
            from.can_transition_to(next),
            "invalid session transition {} -> {}",
            from,
            next
        );
        inner.state = next;
        tracing::debug!(%from, to = %next, "Session state changed");
        self.publish(SessionEvent::StateChanged { from, to: next });
    }

    fn publish(&self, event: SessionEvent) {
        if self.events_tx.try_send(event).is_err() {
            tracing::debug!("Session event queue full, event dropped");
        }
    }

    fn build_source(&self, selection: &SourceSelection) -> Result<Box<dyn CaptureSource>> {
        let pool_size = self.config.pipeline.frame_pool_size;

        match selection {
            SourceSelection::Camera(facing) => {
                let backend = self
                    .backends
                    .camera
                    .clone()
                    .ok_or(SessionError::NoBackend("camera"))?;
                Ok(Box::new(CameraSource::new(
                    backend,
                    *facing,
                    self.config.camera.width,
                    self.config.camera.height,
                    pool_size,
                )))
            }
            SourceSelection::ScreenMirror(consent) => {
                let backend = self
                    .backends
                    .display
                    .clone()
                    .ok_or(SessionError::NoBackend("screen mirroring"))?;
                Ok(Box::new(
                    ScreenMirrorSource::new(backend, consent.clone())
                        .with_buffer_depth(self.config.screen.buffer_depth)
                        .with_pool_size(pool_size)
                        .allow_background(self.config.screen.allow_background),
                ))
            }
        }
    }

    /// Upload consumer, plus the snapshot sink when enabled and available
    fn build_consumer(&self) -> Box<dyn FrameConsumer> {
        let upload = UploadConsumer::new(
            self.uploader.clone(),
            UploadObserver::new(self.events_tx.clone()),
        );
        if !self.config.snapshot.enabled {
            return Box::new(upload);
        }

        match SnapshotSink::create(&self.config.snapshot, self.snapshots.clone()) {
            Ok(sink) => {
                let mut fanout = FanoutConsumer::new();
                fanout.push(Box::new(upload));
                fanout.push(Box::new(sink));
                Box::new(fanout)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot export disabled for this session");
                self.publish(SessionEvent::SnapshotUnavailable {
                    reason: e.to_string(),
                });
                Box::new(upload)
            }
        }
    }

    /// Take every resource in order. The wake lock guard releases itself on
    /// each early return.
    ///
    /// A source that needs a visible host is left unacquired when
    /// `foreground` is false and marked for resume instead.
    fn bring_up(
        &self,
        selection: &SourceSelection,
        endpoint: &Endpoint,
        foreground: bool,
    ) -> Result<ActiveSession> {
        let wake = WakeLockGuard::acquire(
            self.wake_lock.clone(),
            self.config.power.wake_lock_tag.clone(),
        )?;

        let mut source = self.build_source(selection)?;
        let deferred = !foreground && source.requires_foreground();
        if !deferred {
            if let Err(e) = source.acquire() {
                source.release();
                return Err(e.into());
            }
        }

        let mut pipeline = match FramePipeline::open(&self.config.pipeline, self.build_consumer()) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                source.release();
                return Err(SessionError::Pipeline(e.to_string()).into());
            }
        };

        let observer = UploadObserver::new(self.events_tx.clone());
        if let Err(e) = self.uploader.begin(endpoint, observer) {
            pipeline.close();
            source.release();
            return Err(Error::UploaderFailure(e));
        }

        if !deferred {
            if let Err(e) = source.produce_frames(pipeline.producer()) {
                pipeline.close();
                self.uploader.end();
                source.release();
                return Err(e.into());
            }
        }

        Ok(ActiveSession {
            id: Uuid::new_v4(),
            endpoint: endpoint.clone(),
            started_at: Utc::now(),
            source,
            pipeline,
            wake,
            resume_on_foreground: deferred,
        })
    }

    /// Release in reverse order of acquisition. The consumer is joined before
    /// the uploader is ended so no frame reaches it afterwards.
    fn tear_down(&self, mut active: ActiveSession) -> PipelineStats {
        let stats = active.pipeline.close();
        self.uploader.end();
        active.source.release();
        active.wake.release();

        tracing::info!(
            session_id = %active.id,
            produced = stats.produced,
            delivered = stats.delivered,
            dropped = stats.dropped,
            discarded = stats.discarded,
            failed = stats.failed,
            "Streaming stopped"
        );
        stats
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}
