//! C8: the timeout sweeper (`spec.md §4.8`).

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::trace;

use crate::connection::ConnectionRegistry;

/// A single periodic task that sweeps the local client connection and
/// every remote client connection for expired callbacks
/// (`spec.md §4.3`, `§4.8`). Dropping the handle (or calling
/// [`Sweeper::stop`]) cancels it; there is nothing else to tear down.
pub struct Sweeper {
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn start(
        registry: Arc<ConnectionRegistry>,
        local_callbacks: Arc<crate::callback::CallbackTable>,
        period: std::time::Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                local_callbacks.sweep();
                for connection in registry.client_connections() {
                    connection.sweep();
                }
                trace!("timeout sweep complete");
            }
        });
        Sweeper { handle }
    }

    /// Idempotent: aborting an already-aborted task is a no-op
    /// (`spec.md §4.7`, `stop`).
    pub fn stop(self) {
        self.handle.abort();
    }
}
