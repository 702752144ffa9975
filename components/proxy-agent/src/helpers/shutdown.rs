// External crates
use tokio::sync::broadcast;

/// Global shutdown manager, built on-top of a broadcast channel
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Creates a new shutdown broadcast channel.
    /// A small buffer size is sufficient since only one message is sent.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1);
        Self { tx }
    }

    /// Returns a new receiver handle for a proxy-agent component
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger shutdown event, notifying all components with Receivers
    pub fn trigger(&self) {
        tracing::info!("Shutdown triggered, notifying subscribers");
        let _ = self.tx.send(());
    }

    /// Wait for a shutdown signal (used in the main runtime).
    /// Simply blocks until `.trigger()` is called.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.recv().await;
        tracing::info!("Shutdown signal received");
    }
}
