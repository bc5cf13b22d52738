//! Peer management
//!
//! Tracks live connections, routes outbound messages and keeps the
//! per-peer announce ledger that caps flood propagation at one announce
//! per object per peer.

use crate::net::message::Message;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Maximum number of connected peers
pub const MAX_PEERS: usize = 8;

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Max peers reached")]
    MaxPeersReached,
}

/// Handle for sending messages to a peer. Dropping every clone of the
/// inner sender tears the connection down.
#[derive(Clone)]
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub tx: mpsc::Sender<Message>,
}

impl PeerHandle {
    pub async fn send(&self, msg: Message) -> Result<(), PeerError> {
        self.tx.send(msg).await.map_err(|_| PeerError::Disconnected)
    }
}

/// Manages all peer connections
pub struct PeerManager {
    /// Message senders per connected peer
    handles: RwLock<HashMap<SocketAddr, PeerHandle>>,
    /// Object ids already announced to each peer
    announced: RwLock<HashMap<SocketAddr, HashSet<String>>>,
    /// Peer addresses learned from handshakes (for future dialing)
    known_peers: RwLock<Vec<String>>,
}

impl PeerManager {
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            announced: RwLock::new(HashMap::new()),
            known_peers: RwLock::new(Vec::new()),
        }
    }

    /// Register a connected peer
    pub async fn add_peer(&self, addr: SocketAddr, handle: PeerHandle) -> Result<(), PeerError> {
        let mut handles = self.handles.write().await;
        if handles.len() >= MAX_PEERS {
            return Err(PeerError::MaxPeersReached);
        }
        handles.insert(addr, handle);

        let mut known = self.known_peers.write().await;
        let addr_str = addr.to_string();
        if !known.contains(&addr_str) {
            known.push(addr_str);
        }

        log::info!("Added peer: {}", addr);
        Ok(())
    }

    /// Drop a peer. Its connection task sees the closed channel and
    /// terminates the socket.
    pub async fn remove_peer(&self, addr: &SocketAddr) {
        self.handles.write().await.remove(addr);
        self.announced.write().await.remove(addr);
        log::info!("Removed peer: {}", addr);
    }

    /// Whether the peer is currently connected
    pub async fn is_connected(&self, addr: &SocketAddr) -> bool {
        self.handles.read().await.contains_key(addr)
    }

    pub async fn peer_count(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn get_peers(&self) -> Vec<SocketAddr> {
        self.handles.read().await.keys().cloned().collect()
    }

    /// Addresses learned so far, handed out in `Hello` messages
    pub async fn get_known_peers(&self) -> Vec<String> {
        self.known_peers.read().await.clone()
    }

    pub async fn add_known_peers(&self, addrs: Vec<String>) {
        let mut known = self.known_peers.write().await;
        for addr in addrs {
            if !known.contains(&addr) {
                known.push(addr);
            }
        }
    }

    /// Send a message to a specific peer
    pub async fn send_to(&self, addr: &SocketAddr, msg: Message) -> Result<(), PeerError> {
        let handles = self.handles.read().await;
        match handles.get(addr) {
            Some(handle) => handle.send(msg).await,
            None => Err(PeerError::Disconnected),
        }
    }

    /// Record that `object_id` was announced to `addr`; returns false if
    /// it already had been, so each object goes out to a peer at most once.
    pub async fn mark_announced(&self, addr: &SocketAddr, object_id: &str) -> bool {
        self.announced
            .write()
            .await
            .entry(*addr)
            .or_default()
            .insert(object_id.to_string())
    }

    /// Announce an object to every connected peer except `origin`,
    /// skipping peers that have already been told.
    pub async fn announce_object(&self, msg: Message, object_id: &str, origin: Option<&SocketAddr>) {
        let targets = self.get_peers().await;
        for addr in targets {
            if Some(&addr) == origin {
                continue;
            }
            if !self.mark_announced(&addr, object_id).await {
                continue;
            }
            if let Err(e) = self.send_to(&addr, msg.clone()).await {
                log::warn!("Failed to announce to {}: {}", addr, e);
            }
        }
    }
}

impl Default for PeerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::message::InventoryMessage;

    fn test_addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn test_handle(addr: SocketAddr) -> (PeerHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(16);
        (PeerHandle { addr, tx }, rx)
    }

    #[tokio::test]
    async fn test_add_and_remove_peer() {
        let mgr = PeerManager::new();
        let addr = test_addr(9001);
        let (handle, _rx) = test_handle(addr);

        mgr.add_peer(addr, handle).await.unwrap();
        assert!(mgr.is_connected(&addr).await);

        mgr.remove_peer(&addr).await;
        assert!(!mgr.is_connected(&addr).await);
    }

    #[tokio::test]
    async fn test_announce_at_most_once_per_peer() {
        let mgr = PeerManager::new();
        let addr = test_addr(9002);
        let (handle, mut rx) = test_handle(addr);
        mgr.add_peer(addr, handle).await.unwrap();

        let msg = Message::Inventory(InventoryMessage::announce("obj", true));
        mgr.announce_object(msg.clone(), "obj", None).await;
        mgr.announce_object(msg, "obj", None).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_announce_skips_origin() {
        let mgr = PeerManager::new();
        let origin = test_addr(9003);
        let other = test_addr(9004);
        let (h1, mut rx1) = test_handle(origin);
        let (h2, mut rx2) = test_handle(other);
        mgr.add_peer(origin, h1).await.unwrap();
        mgr.add_peer(other, h2).await.unwrap();

        let msg = Message::Inventory(InventoryMessage::announce("obj", false));
        mgr.announce_object(msg, "obj", Some(&origin)).await;

        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }
}
