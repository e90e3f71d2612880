//! C5: channel pool & connect manager (`spec.md §4.5`).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::RwLock;
use tracing::debug;

use crate::address::Address;
use crate::config::MessagingConfig;
use crate::connection::{self, ConnectionRegistry, RemoteClientConnection};
use crate::error::MessagingError;
use crate::handler::HandlerTable;
use crate::transport::client;
use crate::transport::TlsMaterial;

/// Select the slot for `subject` out of `pool_size` slots
/// (`spec.md §3`: `slot = |hash(subject)| mod 8`).
fn slot_for(subject: &str, pool_size: usize) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    subject.hash(&mut hasher);
    (hasher.finish() as usize) % pool_size
}

/// The fixed-size array of channel slots kept open to one peer
/// (`spec.md §3`, `§4.5`).
struct PeerPool {
    slots: Vec<AsyncMutex<Option<Arc<RemoteClientConnection>>>>,
}

impl PeerPool {
    fn new(size: usize) -> Self {
        PeerPool {
            slots: (0..size).map(|_| AsyncMutex::new(None)).collect(),
        }
    }
}

/// Owns one [`PeerPool`] per peer address and lazily connects slots on
/// demand, retrying eviction of a dead channel exactly once per call
/// (`spec.md §4.5`).
pub struct ChannelPool {
    config: MessagingConfig,
    tls: Option<Arc<TlsMaterial>>,
    registry: Arc<ConnectionRegistry>,
    handlers: Arc<HandlerTable>,
    peers: RwLock<HashMap<Address, Arc<PeerPool>>>,
}

impl ChannelPool {
    pub fn new(
        config: MessagingConfig,
        tls: Option<Arc<TlsMaterial>>,
        registry: Arc<ConnectionRegistry>,
        handlers: Arc<HandlerTable>,
    ) -> Self {
        ChannelPool {
            config,
            tls,
            registry,
            handlers,
            peers: RwLock::new(HashMap::new()),
        }
    }

    async fn peer_pool(&self, peer: &Address) -> Arc<PeerPool> {
        if let Some(pool) = self.peers.read().await.get(peer) {
            return pool.clone();
        }
        let mut peers = self.peers.write().await;
        peers
            .entry(peer.clone())
            .or_insert_with(|| Arc::new(PeerPool::new(self.config.pool_size)))
            .clone()
    }

    /// Obtain the connection to use for `subject` on `peer`, connecting
    /// a fresh channel if the slot is empty or its channel has gone
    /// inactive (`spec.md §4.5`).
    pub async fn get_connection(
        &self,
        peer: &Address,
        subject: &str,
    ) -> Result<Arc<RemoteClientConnection>, MessagingError> {
        let pool = self.peer_pool(peer).await;
        let slot_index = slot_for(subject, pool.slots.len());
        let mut slot = pool.slots[slot_index].lock().await;

        if let Some(connection) = slot.as_ref() {
            if connection.channel().is_active() {
                return Ok(connection.clone());
            }
            debug!(%peer, slot_index, "pooled channel went inactive; reconnecting");
            self.registry.remove_client(connection.channel().id);
            *slot = None;
        }

        let connection = self.connect(peer).await?;
        *slot = Some(connection.clone());
        Ok(connection)
    }

    async fn connect(&self, peer: &Address) -> Result<Arc<RemoteClientConnection>, MessagingError> {
        let (channel, reader) = client::connect(peer, &self.config.cluster_name, self.tls.as_deref()).await?;
        let connection = Arc::new(RemoteClientConnection::new(channel.clone()));
        self.registry.insert_client(channel.id, connection.clone());

        tokio::spawn(connection::run_dispatch_loop(
            channel,
            reader,
            self.registry.clone(),
            self.handlers.clone(),
        ));

        Ok(connection)
    }

    /// Close every pooled channel and fail their outstanding callbacks
    /// (`spec.md §4.7`, `stop`).
    pub async fn close_all(&self) {
        let peers = self.peers.read().await;
        for pool in peers.values() {
            for slot in &pool.slots {
                if let Some(connection) = slot.lock().await.take() {
                    connection.close().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_subject_always_selects_the_same_slot() {
        assert_eq!(slot_for("echo", 8), slot_for("echo", 8));
    }

    #[test]
    fn distinct_subjects_tend_to_spread_across_slots() {
        let slots: std::collections::HashSet<usize> =
            ["a", "b", "c", "d", "e", "f", "g", "h"]
                .iter()
                .map(|s| slot_for(s, 8))
                .collect();
        assert!(slots.len() > 1);
    }
}
