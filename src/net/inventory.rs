//! Inventory exchange state
//!
//! Holds the raw byte blobs of every object validated at least once (so
//! future requests can be answered and a restart can replay them), the
//! pending transaction pool, and the request/object/announce protocol
//! logic. Socket-free by design: handlers return the replies to send.

use crate::chain::{BlockOutcome, ChainError, Executor};
use crate::core::codec;
use crate::core::transaction::Transaction;
use crate::net::message::{InventoryKind, InventoryMessage, Message};
use std::collections::HashMap;

/// A validated object's raw bytes, keyed by id in the store
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub is_block: bool,
    pub bytes: Vec<u8>,
}

/// What to do with a handler's output
#[derive(Debug, Clone)]
pub enum Reply {
    /// Send back to the peer the triggering message came from
    ToPeer(Message),
    /// Announce to every other peer (once per peer, handled by the
    /// peer manager's ledger)
    Flood { message: Message, object_id: String },
}

/// Inventory state machine
pub struct InventoryManager {
    objects: HashMap<String, StoredObject>,
    pending: HashMap<String, Transaction>,
}

impl InventoryManager {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn has_object(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    pub fn get_object(&self, id: &str) -> Option<&StoredObject> {
        self.objects.get(id)
    }

    /// Pending (unconfirmed, individually valid) transactions, the
    /// miner's candidate pool
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pending.values().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Dispatch one inventory message
    pub fn handle_inventory(
        &mut self,
        msg: InventoryMessage,
        executor: &mut Executor,
    ) -> Vec<Reply> {
        match msg.kind {
            InventoryKind::Announce => {
                if self.has_object(&msg.object_id) {
                    return vec![];
                }
                vec![Reply::ToPeer(Message::Inventory(InventoryMessage::request(
                    &msg.object_id,
                    msg.is_block,
                )))]
            }
            InventoryKind::Request => match self.objects.get(&msg.object_id) {
                // Unknown id is a no-op, not an error
                None => vec![],
                Some(stored) => vec![Reply::ToPeer(Message::Inventory(
                    InventoryMessage::object(&msg.object_id, stored.is_block, stored.bytes.clone()),
                ))],
            },
            InventoryKind::Object => {
                let Some(payload) = msg.payload else {
                    log::warn!("Object message without payload for {}", msg.object_id);
                    return vec![];
                };
                if msg.is_block {
                    match self.accept_block(payload, executor) {
                        Ok((_, replies)) => replies,
                        Err(e) => {
                            log::warn!("Rejected block object: {}", e);
                            vec![]
                        }
                    }
                } else {
                    match self.accept_transaction(payload, executor) {
                        Ok(replies) => replies,
                        Err(e) => {
                            log::warn!("Rejected transaction object: {}", e);
                            vec![]
                        }
                    }
                }
            }
        }
    }

    /// Shared block acceptance path for received objects and locally
    /// mined blocks. The blob is retained on apply and on orphaning (an
    /// orphan becomes answerable once its parent drains it through the
    /// executor); an invalid block stores nothing.
    pub fn accept_block(
        &mut self,
        bytes: Vec<u8>,
        executor: &mut Executor,
    ) -> Result<(BlockOutcome, Vec<Reply>), ChainError> {
        let block = match codec::decode_block(&bytes) {
            Ok(block) => block,
            Err(e) => {
                return Err(ChainError::InvalidBlock {
                    id: String::new(),
                    reason: e.to_string(),
                })
            }
        };
        let id = block.id.clone();
        let parent = block.previous_hash.clone();

        if self.has_object(&id) && executor.has_block(&id) {
            return Ok((BlockOutcome::AlreadyKnown, vec![]));
        }

        let outcome = executor.process_block(block)?;
        let mut replies = Vec::new();
        match &outcome {
            BlockOutcome::Applied { .. } => {
                self.store(&id, true, bytes);
                self.prune_pending(executor);
                replies.push(Reply::Flood {
                    message: Message::Inventory(InventoryMessage::announce(&id, true)),
                    object_id: id,
                });
            }
            BlockOutcome::Orphaned => {
                self.store(&id, true, bytes);
                // Chase the missing parent from whoever gave us the child
                if !self.has_object(&parent) {
                    replies.push(Reply::ToPeer(Message::Inventory(InventoryMessage::request(
                        &parent, true,
                    ))));
                }
            }
            BlockOutcome::AlreadyKnown => {
                self.store(&id, true, bytes);
            }
        }
        Ok((outcome, replies))
    }

    /// Validate a received transaction against the live UTXO set; valid
    /// and new means stored as pending and re-announced.
    pub fn accept_transaction(
        &mut self,
        bytes: Vec<u8>,
        executor: &Executor,
    ) -> Result<Vec<Reply>, ChainError> {
        let tx = match codec::decode_transaction(&bytes) {
            Ok(tx) => tx,
            Err(e) => {
                return Err(ChainError::InvalidTransaction {
                    id: String::new(),
                    reason: e.to_string(),
                })
            }
        };

        if self.pending.contains_key(&tx.id) || self.has_object(&tx.id) {
            return Ok(vec![]);
        }

        executor.validate_transaction(&tx)?;

        let id = tx.id.clone();
        self.store(&id, false, bytes);
        self.pending.insert(id.clone(), tx);
        Ok(vec![Reply::Flood {
            message: Message::Inventory(InventoryMessage::announce(&id, false)),
            object_id: id,
        }])
    }

    /// Drop pending transactions that no longer validate, which covers
    /// both inclusion in an applied block (their inputs are gone) and
    /// conflicts with what that block spent.
    pub fn prune_pending(&mut self, executor: &Executor) {
        self.pending
            .retain(|_, tx| executor.validate_transaction(tx).is_ok());
    }

    fn store(&mut self, id: &str, is_block: bool, bytes: Vec<u8>) {
        self.objects
            .entry(id.to_string())
            .or_insert(StoredObject { is_block, bytes });
    }
}

impl Default for InventoryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::{Block, GENESIS_PREVIOUS_HASH};
    use crate::core::transaction::{InEntry, OutEntry};
    use crate::crypto::KeyPair;

    const EASY: f64 = 1e-12;

    fn setup(owner: &KeyPair) -> (InventoryManager, Executor, String) {
        let genesis = Block::candidate(
            GENESIS_PREVIOUS_HASH,
            EASY,
            &[Transaction::coinbase(&owner.address(), 100)],
        );
        let coinbase_id = genesis.transaction_ids[0].clone();
        let executor = Executor::new(genesis).unwrap();
        (InventoryManager::new(), executor, coinbase_id)
    }

    fn signed_spend(kp: &KeyPair, from_tx: &str, amount: u64, to: &str) -> Transaction {
        let mut tx = Transaction::new(
            vec![InEntry::new(from_tx, 0)],
            vec![OutEntry {
                recipient: to.to_string(),
                amount,
            }],
        );
        let signature = hex::encode(kp.sign(&tx.signing_hash()).unwrap());
        tx.in_entries[0].public_key = kp.public_key_hex();
        tx.in_entries[0].signature = signature;
        tx.sealed()
    }

    #[test]
    fn test_announce_of_unknown_object_triggers_request() {
        let kp = KeyPair::generate();
        let (mut inv, mut exec, _) = setup(&kp);

        let replies = inv.handle_inventory(InventoryMessage::announce("deadbeef", true), &mut exec);
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            Reply::ToPeer(Message::Inventory(m)) => {
                assert_eq!(m.kind, InventoryKind::Request);
                assert_eq!(m.object_id, "deadbeef");
            }
            other => panic!("Unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_request_for_unknown_object_is_noop() {
        let kp = KeyPair::generate();
        let (mut inv, mut exec, _) = setup(&kp);
        let replies = inv.handle_inventory(InventoryMessage::request("deadbeef", true), &mut exec);
        assert!(replies.is_empty());
    }

    #[test]
    fn test_applied_block_stored_and_flooded() {
        let kp = KeyPair::generate();
        let (mut inv, mut exec, _) = setup(&kp);

        let block = Block::candidate(&exec.tip_summary().id, EASY, &[]);
        let bytes = codec::encode_block(&block);
        let (outcome, replies) = inv.accept_block(bytes.clone(), &mut exec).unwrap();

        assert_eq!(outcome, BlockOutcome::Applied { new_tip: true });
        assert!(inv.has_object(&block.id));
        assert!(matches!(replies[0], Reply::Flood { .. }));

        // A later request can now be served
        let replies = inv.handle_inventory(InventoryMessage::request(&block.id, true), &mut exec);
        match &replies[0] {
            Reply::ToPeer(Message::Inventory(m)) => {
                assert_eq!(m.kind, InventoryKind::Object);
                assert_eq!(m.payload.as_deref(), Some(&bytes[..]));
            }
            other => panic!("Unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_object_is_noop() {
        let kp = KeyPair::generate();
        let (mut inv, mut exec, _) = setup(&kp);

        let block = Block::candidate(&exec.tip_summary().id, EASY, &[]);
        let bytes = codec::encode_block(&block);
        inv.accept_block(bytes.clone(), &mut exec).unwrap();

        let (outcome, replies) = inv.accept_block(bytes, &mut exec).unwrap();
        assert_eq!(outcome, BlockOutcome::AlreadyKnown);
        assert!(replies.is_empty());
    }

    #[test]
    fn test_orphan_block_retained_and_parent_requested() {
        let kp = KeyPair::generate();
        let (mut inv, mut exec, _) = setup(&kp);

        let parent = Block::candidate(&exec.tip_summary().id, EASY, &[]);
        let child = Block::candidate(&parent.id, EASY, &[]);

        let (outcome, replies) = inv
            .accept_block(codec::encode_block(&child), &mut exec)
            .unwrap();
        assert_eq!(outcome, BlockOutcome::Orphaned);
        assert!(inv.has_object(&child.id));
        match &replies[0] {
            Reply::ToPeer(Message::Inventory(m)) => {
                assert_eq!(m.kind, InventoryKind::Request);
                assert_eq!(m.object_id, parent.id);
            }
            other => panic!("Unexpected reply: {:?}", other),
        }

        // Parent arrives, both blocks land
        inv.accept_block(codec::encode_block(&parent), &mut exec)
            .unwrap();
        assert_eq!(exec.tip_summary().id, child.id);
    }

    #[test]
    fn test_valid_transaction_becomes_pending_and_floods() {
        let kp = KeyPair::generate();
        let (mut inv, mut exec, coinbase_id) = setup(&kp);

        let tx = signed_spend(&kp, &coinbase_id, 30, "addr-b");
        let replies = inv
            .accept_transaction(codec::encode_transaction(&tx), &mut exec)
            .unwrap();

        assert_eq!(inv.pending_count(), 1);
        assert!(inv.has_object(&tx.id));
        assert!(matches!(replies[0], Reply::Flood { .. }));
    }

    #[test]
    fn test_invalid_transaction_not_stored() {
        let kp = KeyPair::generate();
        let stranger = KeyPair::generate();
        let (mut inv, mut exec, coinbase_id) = setup(&kp);

        let tx = signed_spend(&stranger, &coinbase_id, 30, "addr-b");
        assert!(inv
            .accept_transaction(codec::encode_transaction(&tx), &mut exec)
            .is_err());
        assert_eq!(inv.pending_count(), 0);
        assert!(!inv.has_object(&tx.id));
    }

    #[test]
    fn test_pending_pruned_when_block_spends_inputs() {
        let kp = KeyPair::generate();
        let (mut inv, mut exec, coinbase_id) = setup(&kp);

        let tx = signed_spend(&kp, &coinbase_id, 30, "addr-b");
        inv.accept_transaction(codec::encode_transaction(&tx), &mut exec)
            .unwrap();
        assert_eq!(inv.pending_count(), 1);

        // A block containing the transaction consumes its inputs
        let block = Block::candidate(&exec.tip_summary().id, EASY, &[tx]);
        inv.accept_block(codec::encode_block(&block), &mut exec)
            .unwrap();
        assert_eq!(inv.pending_count(), 0);
    }
}
