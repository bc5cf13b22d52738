//! Wire message types for the gossip protocol
//!
//! Two shapes cross the wire: a `Hello` handshake sent once per new
//! connection, and `Inventory` messages carrying the request/object/announce
//! exchange for blocks and transactions.

use serde::{Deserialize, Serialize};

/// Magic bytes for message framing
pub const MAGIC: [u8; 4] = [0x54, 0x49, 0x4E, 0x59]; // "TINY"

/// Network message envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Handshake, sent once when a connection is established
    Hello(Hello),

    /// Inventory exchange: request, object delivery or announcement
    Inventory(InventoryMessage),
}

/// Handshake payload. The genesis id gates network compatibility; the
/// block id list lets the receiver request everything it is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub genesis_id: String,
    pub known_block_ids: Vec<String>,
    pub known_peer_addresses: Vec<String>,
}

/// What an inventory message is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryKind {
    /// Asking for the object's bytes
    Request,
    /// Delivering the object's bytes
    Object,
    /// Advertising that the sender has the object
    Announce,
}

/// One step of the inventory exchange. `payload` is only present for
/// `Object`; `is_block` selects the codec on the receiving side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryMessage {
    pub kind: InventoryKind,
    pub object_id: String,
    pub is_block: bool,
    pub payload: Option<Vec<u8>>,
}

impl InventoryMessage {
    pub fn request(object_id: &str, is_block: bool) -> Self {
        Self {
            kind: InventoryKind::Request,
            object_id: object_id.to_string(),
            is_block,
            payload: None,
        }
    }

    pub fn object(object_id: &str, is_block: bool, payload: Vec<u8>) -> Self {
        Self {
            kind: InventoryKind::Object,
            object_id: object_id.to_string(),
            is_block,
            payload: Some(payload),
        }
    }

    pub fn announce(object_id: &str, is_block: bool) -> Self {
        Self {
            kind: InventoryKind::Announce,
            object_id: object_id.to_string(),
            is_block,
            payload: None,
        }
    }
}

impl Message {
    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Hello(_) => "Hello",
            Message::Inventory(inv) => match inv.kind {
                InventoryKind::Request => "Inventory/Request",
                InventoryKind::Object => "Inventory/Object",
                InventoryKind::Announce => "Inventory/Announce",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let msg = Message::Inventory(InventoryMessage::announce("abc123", true));
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        if let Message::Inventory(inv) = decoded {
            assert_eq!(inv.kind, InventoryKind::Announce);
            assert_eq!(inv.object_id, "abc123");
            assert!(inv.is_block);
            assert!(inv.payload.is_none());
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_hello_round_trip() {
        let msg = Message::Hello(Hello {
            genesis_id: "g".repeat(64),
            known_block_ids: vec!["a".repeat(64)],
            known_peer_addresses: vec!["127.0.0.1:9333".to_string()],
        });
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();

        if let Message::Hello(hello) = decoded {
            assert_eq!(hello.known_block_ids.len(), 1);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_object_carries_payload() {
        let msg = Message::Inventory(InventoryMessage::object("id", false, vec![1, 2, 3]));
        if let Message::Inventory(inv) = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap() {
            assert_eq!(inv.payload, Some(vec![1, 2, 3]));
        } else {
            panic!("Wrong message type");
        }
    }
}
