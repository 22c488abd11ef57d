//! Wake lock handling
//!
//! A wake lock keeps the device awake while a session is starting or
//! streaming. The controller holds it through a [`WakeLockGuard`], which
//! releases exactly once no matter how the session ends.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::PowerError;

/// Platform wake lock
pub trait WakeLock: Send + Sync {
    /// Take the lock on behalf of `tag`
    fn acquire(&self, tag: &str) -> Result<(), PowerError>;

    /// Give the lock back. Called once per successful `acquire`.
    fn release(&self, tag: &str);
}

/// Held wake lock, released on drop
pub struct WakeLockGuard {
    lock: Arc<dyn WakeLock>,
    tag: String,
    held: bool,
}

impl WakeLockGuard {
    /// Acquire `lock` and wrap it in a guard
    pub fn acquire(lock: Arc<dyn WakeLock>, tag: impl Into<String>) -> Result<Self, PowerError> {
        let tag = tag.into();
        lock.acquire(&tag)?;
        tracing::debug!(tag = %tag, "Wake lock acquired");

        Ok(Self {
            lock,
            tag,
            held: true,
        })
    }

    /// Release now instead of on drop
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.held {
            self.held = false;
            self.lock.release(&self.tag);
            tracing::debug!(tag = %self.tag, "Wake lock released");
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl Drop for WakeLockGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}

/// In-process wake lock allowing a single holder at a time.
///
/// Stands in for the OS power manager on hosts without one.
#[derive(Default)]
pub struct ProcessWakeLock {
    holder: Mutex<Option<String>>,
}

impl ProcessWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder's tag, if any
    pub fn holder(&self) -> Option<String> {
        self.holder.lock().clone()
    }

    pub fn is_held(&self) -> bool {
        self.holder.lock().is_some()
    }
}

impl WakeLock for ProcessWakeLock {
    fn acquire(&self, tag: &str) -> Result<(), PowerError> {
        let mut holder = self.holder.lock();
        match holder.as_deref() {
            Some(current) => Err(PowerError::AlreadyHeld(current.to_string())),
            None => {
                *holder = Some(tag.to_string());
                Ok(())
            }
        }
    }

    fn release(&self, tag: &str) {
        let mut holder = self.holder.lock();
        if holder.as_deref() == Some(tag) {
            *holder = None;
        } else {
            tracing::warn!(tag, "Release of wake lock not held by this tag");
        }
    }
}
