use tokio::sync::broadcast;

use crate::storage::UploadStore;

pub struct AppState {
    pub store: UploadStore,
    /// Port advertised in the absolute URLs returned by uploads.
    pub public_port: u16,
    shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(store: UploadStore, public_port: u16) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            public_port,
            shutdown_tx,
        }
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Tells background tasks to stop. Returns how many were listening.
    pub fn shutdown(&self) -> usize {
        self.shutdown_tx.send(()).unwrap_or(0)
    }
}
