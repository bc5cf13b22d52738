//! Node orchestration
//!
//! Wires the executor, inventory state, peer manager and storage together:
//! accepts connections, runs the handshake, dispatches inventory traffic
//! and persists applied blocks.

use crate::chain::Executor;
use crate::net::inventory::{InventoryManager, Reply};
use crate::net::message::{Hello, Message};
use crate::net::peer::{PeerError, PeerManager};
use crate::net::server::{connect_to_peer, handle_connection, Server};
use crate::storage::Storage;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Node configuration
#[derive(Clone)]
pub struct NodeConfig {
    /// Port to listen on
    pub port: u16,
    /// Initial peers to connect to
    pub bootstrap_peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 9333,
            bootstrap_peers: Vec::new(),
        }
    }
}

/// The node: one executor, one inventory, many peers
pub struct Node {
    pub config: NodeConfig,
    pub executor: Arc<RwLock<Executor>>,
    pub inventory: Arc<RwLock<InventoryManager>>,
    pub peer_manager: Arc<PeerManager>,
    pub storage: Arc<Storage>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Message channel sender, set once start() runs
    message_tx: Option<mpsc::Sender<(SocketAddr, Message)>>,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        executor: Arc<RwLock<Executor>>,
        inventory: Arc<RwLock<InventoryManager>>,
        storage: Arc<Storage>,
    ) -> Self {
        Self {
            config,
            executor,
            inventory,
            peer_manager: Arc::new(PeerManager::new()),
            storage,
            shutdown_tx: None,
            message_tx: None,
        }
    }

    /// Run the node: listener, persistence task and the message loop.
    /// Blocks until shutdown is requested.
    pub async fn start(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let server = Server::bind(self.config.port).await?;
        log::info!("Node started on port {}", self.config.port);

        let (message_tx, mut message_rx) = mpsc::channel::<(SocketAddr, Message)>(1000);
        self.message_tx = Some(message_tx.clone());

        // Persist every applied block
        let mut executed_rx = self.executor.read().await.subscribe_executed();
        let persist_inventory = self.inventory.clone();
        let persist_storage = self.storage.clone();
        tokio::spawn(async move {
            while let Ok(id) = executed_rx.recv().await {
                let bytes = {
                    let inventory = persist_inventory.read().await;
                    inventory.get_object(&id).map(|obj| obj.bytes.clone())
                };
                let Some(bytes) = bytes else { continue };
                if let Err(e) = persist_storage.save_block(&id, &bytes) {
                    log::error!("Failed to persist block {}: {}", id, e);
                }
            }
        });

        // Accept incoming connections
        let accept_peer_manager = self.peer_manager.clone();
        let accept_message_tx = message_tx.clone();
        let accept_executor = self.executor.clone();
        tokio::spawn(async move {
            loop {
                match server.accept().await {
                    Ok((stream, addr)) => {
                        log::info!("Incoming connection from {}", addr);
                        let hello = build_hello(&accept_executor, &accept_peer_manager).await;
                        let pm = accept_peer_manager.clone();
                        let tx = accept_message_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, pm, hello, tx).await {
                                log::warn!("Connection error with {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        log::error!("Accept error: {}", e);
                    }
                }
            }
        });

        // Dial bootstrap peers
        for peer_addr in &self.config.bootstrap_peers.clone() {
            if let Err(e) = self.connect_to(peer_addr).await {
                log::warn!("Failed to connect to {}: {}", peer_addr, e);
            }
        }

        // Message handling loop
        loop {
            tokio::select! {
                Some((from, msg)) = message_rx.recv() => {
                    self.handle_message(from, msg).await;
                }
                _ = shutdown_rx.recv() => {
                    log::info!("Node shutting down...");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Connect to a peer by address
    pub async fn connect_to(&self, addr: &str) -> Result<(), PeerError> {
        log::info!("Connecting to peer: {}", addr);
        let (stream, peer_addr) = connect_to_peer(addr).await?;

        let hello = build_hello(&self.executor, &self.peer_manager).await;
        let message_tx = self.message_tx.clone().unwrap_or_else(|| {
            log::warn!("connect_to called before start(); peer messages will be dropped");
            mpsc::channel::<(SocketAddr, Message)>(100).0
        });

        let pm = self.peer_manager.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, pm, hello, message_tx).await {
                log::warn!("Connection error with {}: {}", peer_addr, e);
            }
        });

        Ok(())
    }

    /// Handle one incoming message
    pub async fn handle_message(&self, from: SocketAddr, msg: Message) {
        log::debug!("Received {} from {}", msg.type_name(), from);

        match msg {
            Message::Hello(hello) => self.handle_hello(from, hello).await,
            Message::Inventory(inv) => {
                let replies = {
                    let mut executor = self.executor.write().await;
                    let mut inventory = self.inventory.write().await;
                    inventory.handle_inventory(inv, &mut executor)
                };
                dispatch_replies(&self.peer_manager, Some(&from), replies).await;
            }
        }
    }

    /// Handshake: an incompatible genesis closes the connection; otherwise
    /// request every block the peer has that we do not.
    async fn handle_hello(&self, from: SocketAddr, hello: Hello) {
        let (genesis_id, ours) = {
            let executor = self.executor.read().await;
            (
                executor.genesis_id().to_string(),
                executor.known_block_ids().into_iter().collect::<HashSet<_>>(),
            )
        };

        if hello.genesis_id != genesis_id {
            log::warn!(
                "Peer {} is on an incompatible network (genesis {}), disconnecting",
                from,
                &hello.genesis_id[..8.min(hello.genesis_id.len())]
            );
            self.peer_manager.remove_peer(&from).await;
            return;
        }

        self.peer_manager
            .add_known_peers(hello.known_peer_addresses)
            .await;

        for id in hello.known_block_ids {
            if ours.contains(&id) {
                continue;
            }
            let request = Message::Inventory(crate::net::message::InventoryMessage::request(
                &id, true,
            ));
            if let Err(e) = self.peer_manager.send_to(&from, request).await {
                log::warn!("Failed to request block from {}: {}", from, e);
                break;
            }
        }
    }
}

/// Build our handshake from current chain state
pub async fn build_hello(
    executor: &Arc<RwLock<Executor>>,
    peer_manager: &Arc<PeerManager>,
) -> Hello {
    let (genesis_id, known_block_ids) = {
        let executor = executor.read().await;
        (executor.genesis_id().to_string(), executor.known_block_ids())
    };
    Hello {
        genesis_id,
        known_block_ids,
        known_peer_addresses: peer_manager.get_known_peers().await,
    }
}

/// Route handler output: direct replies go back to the origin, floods go
/// to everyone else through the once-per-peer announce ledger.
pub async fn dispatch_replies(
    peer_manager: &Arc<PeerManager>,
    origin: Option<&SocketAddr>,
    replies: Vec<Reply>,
) {
    for reply in replies {
        match reply {
            Reply::ToPeer(msg) => {
                let Some(addr) = origin else { continue };
                if let Err(e) = peer_manager.send_to(addr, msg).await {
                    log::warn!("Failed to reply to {}: {}", addr, e);
                }
            }
            Reply::Flood { message, object_id } => {
                peer_manager
                    .announce_object(message, &object_id, origin)
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::Block;
    use crate::core::block::GENESIS_PREVIOUS_HASH;
    use crate::core::transaction::Transaction;
    use crate::net::message::{InventoryKind, InventoryMessage};
    use crate::net::peer::PeerHandle;

    const EASY: f64 = 1e-12;

    async fn test_node() -> (Node, Block) {
        let genesis = Block::candidate(
            GENESIS_PREVIOUS_HASH,
            EASY,
            &[Transaction::coinbase("addr", 100)],
        );
        let executor = Executor::new(genesis.clone()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.into_path()).unwrap();

        let node = Node::new(
            NodeConfig::default(),
            Arc::new(RwLock::new(executor)),
            Arc::new(RwLock::new(InventoryManager::new())),
            Arc::new(storage),
        );
        (node, genesis)
    }

    fn fake_peer(port: u16) -> (SocketAddr, PeerHandle, mpsc::Receiver<Message>) {
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let (tx, rx) = mpsc::channel(64);
        (addr, PeerHandle { addr, tx }, rx)
    }

    #[tokio::test]
    async fn test_hello_with_wrong_genesis_disconnects() {
        let (node, _genesis) = test_node().await;
        let (addr, handle, mut rx) = fake_peer(9100);
        node.peer_manager.add_peer(addr, handle).await.unwrap();

        let hello = Hello {
            genesis_id: "f".repeat(64),
            known_block_ids: vec!["a".repeat(64)],
            known_peer_addresses: vec![],
        };
        node.handle_message(addr, Message::Hello(hello)).await;

        assert!(!node.peer_manager.is_connected(&addr).await);
        // No inventory requests went out before the disconnect
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hello_requests_missing_blocks() {
        let (node, genesis) = test_node().await;
        let (addr, handle, mut rx) = fake_peer(9101);
        node.peer_manager.add_peer(addr, handle).await.unwrap();

        let missing = "b".repeat(64);
        let hello = Hello {
            genesis_id: genesis.id.clone(),
            known_block_ids: vec![genesis.id.clone(), missing.clone()],
            known_peer_addresses: vec!["10.0.0.1:9333".to_string()],
        };
        node.handle_message(addr, Message::Hello(hello)).await;

        assert!(node.peer_manager.is_connected(&addr).await);
        let sent = rx.try_recv().unwrap();
        match sent {
            Message::Inventory(inv) => {
                assert_eq!(inv.kind, InventoryKind::Request);
                assert_eq!(inv.object_id, missing);
                assert!(inv.is_block);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
        // Only the one unknown id was requested
        assert!(rx.try_recv().is_err());
        assert!(node
            .peer_manager
            .get_known_peers()
            .await
            .contains(&"10.0.0.1:9333".to_string()));
    }

    #[tokio::test]
    async fn test_block_object_flooded_to_other_peers() {
        let (node, _genesis) = test_node().await;
        let (origin, origin_handle, mut origin_rx) = fake_peer(9102);
        let (other, other_handle, mut other_rx) = fake_peer(9103);
        node.peer_manager.add_peer(origin, origin_handle).await.unwrap();
        node.peer_manager.add_peer(other, other_handle).await.unwrap();

        let tip = node.executor.read().await.tip_summary().id;
        let block = Block::candidate(&tip, EASY, &[]);
        let bytes = crate::core::codec::encode_block(&block);
        node.handle_message(
            origin,
            Message::Inventory(InventoryMessage::object(&block.id, true, bytes)),
        )
        .await;

        // The sender is not told about its own block; the other peer is
        assert!(origin_rx.try_recv().is_err());
        match other_rx.try_recv().unwrap() {
            Message::Inventory(inv) => {
                assert_eq!(inv.kind, InventoryKind::Announce);
                assert_eq!(inv.object_id, block.id);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }
}
