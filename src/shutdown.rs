//! Process-wide graceful shutdown signal.
//!
//! The foreground CLI waits on a newline from stdin (see
//! [`crate::startup`]); once it arrives, [`Controller::trigger`] flips a
//! `watch` channel that every accept loop and connection task holds a
//! clone of. Listeners stop accepting immediately; live connections keep
//! running until they notice the flag on their next select iteration.

use tokio::sync::watch;

/// Held by whichever task decides the process should stop (the stdin
/// reader in the normal case). Dropping it leaves every [`Signal`]
/// permanently unset, which is fine: nothing triggers shutdown and the
/// process keeps running.
pub struct Controller(watch::Sender<bool>);

/// Cloned into every accept loop and connection task. Cheap to clone and
/// to poll; `is_set` never blocks.
#[derive(Clone)]
pub struct Signal(watch::Receiver<bool>);

pub fn channel() -> (Controller, Signal) {
    let (tx, rx) = watch::channel(false);
    (Controller(tx), Signal(rx))
}

impl Controller {
    /// Flip the shared flag. Idempotent: triggering twice is a no-op the
    /// second time.
    pub fn trigger(&self) {
        let _ = self.0.send(true);
    }
}

impl Signal {
    pub fn is_set(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once [`Controller::trigger`] has been called. Safe to
    /// race against other branches of a `tokio::select!`; awaiting it
    /// again after it has already fired resolves immediately.
    pub async fn triggered(&mut self) {
        if self.is_set() {
            return;
        }
        let _ = self.0.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn triggering_resolves_every_outstanding_wait() {
        let (controller, mut signal_a) = channel();
        let mut signal_b = signal_a.clone();
        assert!(!signal_a.is_set());

        controller.trigger();
        signal_a.triggered().await;
        signal_b.triggered().await;
        assert!(signal_a.is_set());
        assert!(signal_b.is_set());
    }
}
