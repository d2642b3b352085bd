use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::connection::{Peer, PeerConfig};
use crate::errors::TransportError;

/// Registry of live peers keyed by peer id.
///
/// `create` for an id that is already registered closes the old peer before
/// the new one is inserted. A peer that closes on its own is removed by a
/// watcher task.
#[derive(Clone)]
pub struct PeerManager {
    peers: Arc<DashMap<String, Arc<Peer>>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    config: PeerConfig,
}

impl PeerManager {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    fn lock_for(&self, peer_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(peer_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry for `peer_id` once nobody else holds or awaits it.
    /// Callers must have released their own clone first.
    fn prune_lock(&self, peer_id: &str) {
        self.locks
            .remove_if(peer_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Create a peer under `peer_id`, replacing any existing one.
    pub async fn create(&self, peer_id: &str) -> Result<Arc<Peer>, TransportError> {
        let lock = self.lock_for(peer_id);
        let _guard = lock.lock().await;

        if let Some((_, old)) = self.peers.remove(peer_id) {
            info!(peer_id = %peer_id, "replacing existing peer");
            old.close().await;
        }

        let peer = Peer::new(peer_id, self.config.clone()).await?;
        self.peers.insert(peer_id.to_string(), peer.clone());

        let peers = self.peers.clone();
        let watched = peer.clone();
        tokio::spawn(async move {
            watched.closed().await;
            let removed = peers
                .remove_if(watched.id(), |_, current| Arc::ptr_eq(current, &watched))
                .is_some();
            if removed {
                debug!(peer_id = %watched.id(), "peer deregistered");
            }
            watched.close().await;
        });

        Ok(peer)
    }

    /// Close and remove the peer under `peer_id`.
    pub async fn close(&self, peer_id: &str) -> bool {
        let lock = self.lock_for(peer_id);
        let _guard = lock.lock().await;

        let removed = self.peers.remove(peer_id);
        drop(_guard);
        drop(lock);
        self.prune_lock(peer_id);

        match removed {
            Some((_, peer)) => {
                peer.close().await;
                true
            }
            None => false,
        }
    }

    /// Close `peer`, deregistering it only if it is still the registered
    /// peer for its id.
    pub async fn release(&self, peer: &Arc<Peer>) {
        let removed = self
            .peers
            .remove_if(peer.id(), |_, current| Arc::ptr_eq(current, peer))
            .is_some();
        if removed {
            self.prune_lock(peer.id());
        }
        peer.close().await;
    }

    pub fn get(&self, peer_id: &str) -> Option<Arc<Peer>> {
        self.peers.get(peer_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Close every peer.
    pub async fn close_all(&self) {
        let peers: Vec<Arc<Peer>> = self.peers.iter().map(|e| e.value().clone()).collect();
        self.peers.clear();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        info!(count = peers.len(), "closing all peers");
        join_all(peers.iter().map(|peer| peer.close())).await;
    }
}
