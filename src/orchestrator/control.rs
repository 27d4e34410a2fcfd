// ABOUTME: Run control shared between the orchestrator and its host: running, paused, or cancelled.
// ABOUTME: A watch channel carries the state so a resume wakes the paused loop exactly once.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Cancelled,
}

struct Inner {
    state: watch::Sender<RunState>,
    cancel: Mutex<CancellationToken>,
}

/// Cloneable handle; every clone controls the same run.
#[derive(Clone)]
pub struct RunControl {
    inner: Arc<Inner>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RunState::Running);
        Self {
            inner: Arc::new(Inner {
                state,
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn state(&self) -> RunState {
        *self.inner.state.borrow()
    }

    /// Request a pause at the next checkpoint. Returns false unless the run was running.
    pub fn pause(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Paused;
                true
            } else {
                false
            }
        })
    }

    /// Release a pause. Returns false unless the run was paused.
    pub fn resume(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == RunState::Paused {
                *state = RunState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Stop the run at its next checkpoint; also releases a pause and ends any live stream.
    pub fn cancel(&self) {
        self.inner.state.send_replace(RunState::Cancelled);
        self.inner
            .cancel
            .lock()
            .expect("cancel lock poisoned")
            .cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == RunState::Cancelled
    }

    /// Token handed to model streams for the current run.
    pub fn token(&self) -> CancellationToken {
        self.inner
            .cancel
            .lock()
            .expect("cancel lock poisoned")
            .clone()
    }

    /// Prepare for a new message: clear a previous cancellation and issue a fresh token.
    pub fn begin_run(&self) {
        let mut token = self.inner.cancel.lock().expect("cancel lock poisoned");
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        self.inner.state.send_if_modified(|state| {
            if *state == RunState::Cancelled {
                *state = RunState::Running;
                true
            } else {
                false
            }
        });
    }

    /// Block while paused. Returns the state that ended the wait.
    pub async fn wait_while_paused(&self) -> RunState {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(|state| *state != RunState::Paused).await {
            Ok(state) => *state,
            Err(_) => RunState::Cancelled,
        }
    }
}
