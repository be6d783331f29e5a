//! Readiness gate.
//!
//! Tracks whether the first discovery cycle completed and lets callers block
//! on it with a timeout. Transitions are monotonic within one
//! initialize/uninitialize cycle; `reset` starts a new cycle.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Discovery progress of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    NotStarted,
    Discovering,
    Ready,
    Failed,
}

impl ReadinessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessState::NotStarted => "not_started",
            ReadinessState::Discovering => "discovering",
            ReadinessState::Ready => "ready",
            ReadinessState::Failed => "failed",
        }
    }
}

#[derive(Debug)]
struct GateInner {
    state: ReadinessState,
    failure: Option<Error>,
}

/// Blocking readiness barrier.
#[derive(Debug)]
pub struct ReadinessGate {
    inner: Mutex<GateInner>,
    changed: Condvar,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GateInner {
                state: ReadinessState::NotStarted,
                failure: None,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ReadinessState::Ready
    }

    /// Enter `Discovering`. Only valid from `NotStarted`.
    pub(crate) fn begin(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != ReadinessState::NotStarted {
            return false;
        }
        inner.state = ReadinessState::Discovering;
        inner.failure = None;
        true
    }

    /// `Discovering → Ready`. Returns false for any other transition.
    pub(crate) fn mark_ready(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != ReadinessState::Discovering {
            return false;
        }
        inner.state = ReadinessState::Ready;
        self.changed.notify_all();
        true
    }

    /// `Discovering → Failed`, storing the error handed to waiters.
    pub(crate) fn mark_failed(&self, error: Error) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != ReadinessState::Discovering {
            return false;
        }
        inner.state = ReadinessState::Failed;
        inner.failure = Some(error);
        self.changed.notify_all();
        true
    }

    /// Back to `NotStarted`, waking anyone still waiting.
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = ReadinessState::NotStarted;
        inner.failure = None;
        self.changed.notify_all();
    }

    /// Block until `Ready` or `Failed`, or until `timeout` elapses.
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == ReadinessState::Discovering {
            self.changed.wait_while_for(
                &mut inner,
                |inner| inner.state == ReadinessState::Discovering,
                timeout,
            );
        }

        match inner.state {
            ReadinessState::Ready => Ok(()),
            ReadinessState::Discovering => Err(Error::NotReadyTimeout),
            ReadinessState::NotStarted => Err(Error::NotInitialized),
            ReadinessState::Failed => Err(inner
                .failure
                .clone()
                .unwrap_or_else(|| Error::DiscoveryFailed("unknown failure".into()))),
        }
    }
}
