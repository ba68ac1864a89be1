//! Pause and abort signalling for a running pipeline.
//!
//! Controls live on a `watch` channel owned by one controller. Waiters are
//! woken on change instead of polling, and the inter-batch delay ends early
//! when an abort arrives.

use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlState {
    pub paused: bool,
    pub aborted: bool,
}

#[derive(Debug)]
pub struct RunControls {
    tx: watch::Sender<ControlState>,
}

impl Default for RunControls {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControls {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ControlState::default());
        Self { tx }
    }

    pub fn state(&self) -> ControlState {
        *self.tx.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    pub fn is_aborted(&self) -> bool {
        self.state().aborted
    }

    /// Flip the pause flag. Returns the new value.
    pub fn toggle_pause(&self) -> bool {
        let mut paused = false;
        self.tx.send_modify(|s| {
            s.paused = !s.paused;
            paused = s.paused;
        });
        paused
    }

    pub fn set_paused(&self, paused: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.paused != paused;
            s.paused = paused;
            changed
        });
    }

    /// Request a stop. Clears pause so a paused loop wakes up and exits.
    pub fn abort(&self) {
        self.tx.send_modify(|s| {
            s.aborted = true;
            s.paused = false;
        });
    }

    /// Clear both flags before a new run.
    pub fn reset(&self) {
        self.tx.send_replace(ControlState::default());
    }

    /// Block while paused. Returns false if the run was aborted.
    pub async fn wait_while_paused(&self) -> bool {
        let mut rx = self.tx.subscribe();
        let result = rx.wait_for(|s| !s.paused || s.aborted).await;
        match result {
            Ok(state) => !state.aborted,
            Err(_) => false,
        }
    }

    /// Sleep for `delay` unless an abort arrives first. Returns false if the
    /// run was aborted.
    pub async fn sleep_unless_aborted(&self, delay: Duration) -> bool {
        if self.is_aborted() {
            return false;
        }
        if delay.is_zero() {
            return true;
        }
        let mut rx = self.tx.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(delay) => !self.is_aborted(),
            _ = rx.wait_for(|s| s.aborted) => false,
        }
    }
}
