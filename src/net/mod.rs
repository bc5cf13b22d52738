//! Gossip networking: wire messages, framing, peers and inventory exchange

pub mod inventory;
pub mod message;
pub mod node;
pub mod peer;
pub mod server;

pub use inventory::{InventoryManager, Reply};
pub use message::{Hello, InventoryKind, InventoryMessage, Message, MAGIC};
pub use node::{Node, NodeConfig};
pub use peer::{PeerError, PeerHandle, PeerManager, MAX_PEERS};
pub use server::{MessageCodec, Server};
