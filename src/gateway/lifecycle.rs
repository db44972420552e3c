use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use crate::error::LifecycleError;

/// `registered → installing → installed → activating → active`, no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Registered,
    Installing,
    Installed,
    Activating,
    Active,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Registered => "registered",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
        };
        f.write_str(s)
    }
}

pub struct Lifecycle {
    state: RwLock<LifecycleState>,
    skip_waiting: AtomicBool,
    clients_claimed: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Registered),
            skip_waiting: AtomicBool::new(false),
            clients_claimed: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Moves `from → to` atomically, or reports the state that blocked it.
    pub(crate) async fn transition(
        &self,
        action: &'static str,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<(), LifecycleError> {
        let mut state = self.state.write().await;
        if *state != from {
            return Err(LifecycleError::InvalidTransition {
                action,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    /// Take over from any previous gateway without waiting for its clients.
    pub(crate) fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::Release);
    }

    pub fn is_waiting_skipped(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    /// Start intercepting fetches for every client, including ones that
    /// were already open before activation.
    pub(crate) fn claim_clients(&self) {
        self.clients_claimed.store(true, Ordering::Release);
    }

    pub fn controls_clients(&self) -> bool {
        self.clients_claimed.load(Ordering::Acquire)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
