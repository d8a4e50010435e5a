//! Stop coordination for collector loops.

use std::sync::Arc;
use tokio::sync::watch;

/// Coordinator for graceful stop.
///
/// Backed by a watch channel so late subscribers still observe a trigger that
/// already happened. `reset` re-arms it for the next run.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new, untriggered coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the stop signal.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger the stop signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Re-arm after the previous run has wound down.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Get the number of active subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half handed to loops and cancellable waits.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal is triggered.
    pub async fn wait(&mut self) {
        // A dropped sender means nobody can re-arm us; treat it as stop.
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}
