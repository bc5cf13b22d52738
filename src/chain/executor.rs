//! Chain state machine
//!
//! Validates blocks, applies their transactions to the UTXO set, tracks
//! cumulative difficulty and selects the best tip. Applied state is
//! monotonic: UTXO effects are never rolled back, even when a heavier
//! competing branch shows up later (stated limitation).

use crate::core::block::Block;
use crate::core::transaction::{OutEntry, Outpoint, Transaction};
use crate::crypto::address_of_hex_key;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::{broadcast, watch};

/// Capacity of the executed-block event channel
const EXECUTED_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on blocks buffered while awaiting a parent
const MAX_ORPHAN_BLOCKS: usize = 128;

/// Chain validation errors
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Invalid block {id}: {reason}")]
    InvalidBlock { id: String, reason: String },
    #[error("Invalid transaction {id}: {reason}")]
    InvalidTransaction { id: String, reason: String },
}

impl ChainError {
    fn invalid_block(id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidBlock {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    fn invalid_tx(id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTransaction {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// What became of a submitted block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Validated and applied; `new_tip` is true when it took over the tip
    Applied { new_tip: bool },
    /// Already validated earlier; applying again is a no-op
    AlreadyKnown,
    /// Parent unknown; buffered until the parent arrives
    Orphaned,
}

/// Snapshot of the best tip, served to the miner and the status surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TipSummary {
    pub id: String,
    pub height: u64,
    pub total_difficulty: f64,
}

/// The chain state machine. All mutation goes through `process_block`,
/// which either applies a block completely or not at all.
pub struct Executor {
    blocks: HashMap<String, Block>,
    utxos: BTreeMap<Outpoint, OutEntry>,
    best_tip: String,
    genesis_id: String,
    /// Blocks waiting for a parent, keyed by the missing parent id
    orphans: HashMap<String, Vec<Block>>,
    tip_tx: watch::Sender<TipSummary>,
    executed_tx: broadcast::Sender<String>,
}

impl Executor {
    /// Create an executor trusting `genesis` unconditionally: no parent,
    /// proof-of-work or transaction checks apply to it.
    pub fn new(genesis: Block) -> Result<Self, ChainError> {
        let mut genesis = genesis.sealed();
        let parsed = genesis
            .parsed_transactions()
            .map_err(|e| ChainError::invalid_block(&genesis.id, e.to_string()))?;

        let mut utxos = BTreeMap::new();
        for tx in &parsed {
            credit_outputs(tx, &mut utxos);
        }

        genesis.height = 0;
        genesis.total_difficulty = genesis.decoded_difficulty();

        let summary = TipSummary {
            id: genesis.id.clone(),
            height: 0,
            total_difficulty: genesis.total_difficulty,
        };
        let (tip_tx, _) = watch::channel(summary);
        let (executed_tx, _) = broadcast::channel(EXECUTED_CHANNEL_CAPACITY);

        let genesis_id = genesis.id.clone();
        let mut blocks = HashMap::new();
        blocks.insert(genesis_id.clone(), genesis);

        Ok(Self {
            blocks,
            utxos,
            best_tip: genesis_id.clone(),
            genesis_id,
            orphans: HashMap::new(),
            tip_tx,
            executed_tx,
        })
    }

    /// Validate and apply a block. Orphans are buffered and re-attempted
    /// once their parent lands; descendants waiting on this block are
    /// drained afterwards.
    pub fn process_block(&mut self, block: Block) -> Result<BlockOutcome, ChainError> {
        let block = block.sealed();

        if self.blocks.contains_key(&block.id) {
            return Ok(BlockOutcome::AlreadyKnown);
        }

        if block.is_genesis() {
            return Err(ChainError::invalid_block(&block.id, "competing genesis block"));
        }

        // Parent-independent header checks run before orphan buffering so
        // a peer cannot fill the buffer with blocks that could never apply.
        if !block.verify_merkle_root() {
            return Err(ChainError::invalid_block(&block.id, "merkle root mismatch"));
        }
        if !block.is_valid_pow() {
            return Err(ChainError::invalid_block(
                &block.id,
                format!(
                    "proof of work below target: {} < {}",
                    block.decoded_difficulty(),
                    block.difficulty
                ),
            ));
        }

        let (parent_height, parent_total) = match self.blocks.get(&block.previous_hash) {
            Some(parent) => (parent.height, parent.total_difficulty),
            None => {
                log::debug!(
                    "block {} orphaned, awaiting parent {}",
                    &block.id[..8.min(block.id.len())],
                    &block.previous_hash[..8.min(block.previous_hash.len())]
                );
                self.buffer_orphan(block);
                return Ok(BlockOutcome::Orphaned);
            }
        };

        let id = block.id.clone();
        let new_tip = self.connect(block, parent_height, parent_total)?;
        self.drain_orphans(&id);
        Ok(BlockOutcome::Applied { new_tip })
    }

    /// Hold an orphan until its parent arrives. The pool is capped; at the
    /// limit an arbitrary waiting bucket is evicted, since evicted blocks
    /// can always be re-fetched from peers.
    fn buffer_orphan(&mut self, block: Block) {
        if self.orphan_count() >= MAX_ORPHAN_BLOCKS {
            if let Some(key) = self.orphans.keys().next().cloned() {
                if let Some(dropped) = self.orphans.remove(&key) {
                    log::warn!(
                        "orphan pool full, dropping {} block(s) awaiting {}",
                        dropped.len(),
                        &key[..8.min(key.len())]
                    );
                }
            }
        }
        self.orphans
            .entry(block.previous_hash.clone())
            .or_default()
            .push(block);
    }

    /// Number of blocks currently waiting for a parent
    pub fn orphan_count(&self) -> usize {
        self.orphans.values().map(Vec::len).sum()
    }

    /// Validate a block against its known parent and commit it. Header
    /// checks (merkle, proof of work) already ran in `process_block`.
    fn connect(
        &mut self,
        mut block: Block,
        parent_height: u64,
        parent_total: f64,
    ) -> Result<bool, ChainError> {
        let parsed = block
            .parsed_transactions()
            .map_err(|e| ChainError::invalid_block(&block.id, e.to_string()))?;

        // Build the post-block UTXO set on a working copy so a failing
        // transaction leaves applied state untouched.
        let mut work = self.utxos.clone();
        for (i, tx) in parsed.iter().enumerate() {
            if i == 0 && tx.is_coinbase() {
                credit_outputs(tx, &mut work);
                continue;
            }
            self.apply_transaction(tx, &mut work).map_err(|e| {
                ChainError::invalid_block(&block.id, format!("contained transaction: {}", e))
            })?;
        }

        block.height = parent_height + 1;
        block.total_difficulty = parent_total + block.decoded_difficulty();

        self.utxos = work;
        let id = block.id.clone();
        let total = block.total_difficulty;
        let height = block.height;
        self.blocks.insert(id.clone(), block);

        // Equal totals keep the incumbent: first observed wins.
        let new_tip = total > self.tip_summary().total_difficulty;
        if new_tip {
            self.best_tip = id.clone();
            let _ = self.tip_tx.send(TipSummary {
                id: id.clone(),
                height,
                total_difficulty: total,
            });
            log::info!(
                "new tip {} at height {} (total difficulty {:.3e})",
                &id[..8],
                height,
                total
            );
        }
        let _ = self.executed_tx.send(id);

        Ok(new_tip)
    }

    /// Connect any blocks that were waiting on `parent_id`, walking the
    /// descendant chain with a worklist so an arbitrarily long buffered
    /// chain never grows the call stack.
    fn drain_orphans(&mut self, parent_id: &str) {
        let mut worklist = vec![parent_id.to_string()];
        while let Some(parent) = worklist.pop() {
            let Some(waiting) = self.orphans.remove(&parent) else {
                continue;
            };
            for orphan in waiting {
                let id = orphan.id.clone();
                if self.blocks.contains_key(&id) {
                    continue;
                }
                let Some((height, total)) = self
                    .blocks
                    .get(&orphan.previous_hash)
                    .map(|p| (p.height, p.total_difficulty))
                else {
                    continue;
                };
                match self.connect(orphan, height, total) {
                    Ok(_) => worklist.push(id),
                    Err(e) => {
                        log::warn!("orphaned block {} rejected on retry: {}", &id[..8], e)
                    }
                }
            }
        }
    }

    /// Validate one transaction against `work` and apply its effects:
    /// referenced UTXOs are removed, created outputs inserted.
    fn apply_transaction(
        &self,
        tx: &Transaction,
        work: &mut BTreeMap<Outpoint, OutEntry>,
    ) -> Result<(), ChainError> {
        if tx.is_coinbase() {
            return Err(ChainError::invalid_tx(&tx.id, "missing inputs"));
        }

        match tx.verify_signatures() {
            Ok(true) => {}
            Ok(false) => return Err(ChainError::invalid_tx(&tx.id, "bad signature")),
            Err(e) => return Err(ChainError::invalid_tx(&tx.id, e.to_string())),
        }

        let mut input_sum: u64 = 0;
        for entry in &tx.in_entries {
            let outpoint = entry.outpoint();
            // Removal doubles as the double-spend check: a second spend of
            // the same outpoint in this block finds nothing to remove.
            let utxo = work.remove(&outpoint).ok_or_else(|| {
                ChainError::invalid_tx(
                    &tx.id,
                    format!("missing UTXO {}:{}", outpoint.transaction_id, outpoint.out_index),
                )
            })?;

            let spender = address_of_hex_key(&entry.public_key)
                .map_err(|e| ChainError::invalid_tx(&tx.id, e.to_string()))?;
            if spender != utxo.recipient {
                return Err(ChainError::invalid_tx(&tx.id, "key does not own UTXO"));
            }

            input_sum = input_sum.saturating_add(utxo.amount);
        }

        if tx.total_output() > input_sum {
            return Err(ChainError::invalid_tx(
                &tx.id,
                format!("outputs {} exceed inputs {}", tx.total_output(), input_sum),
            ));
        }

        credit_outputs(tx, work);
        Ok(())
    }

    /// Validate a standalone transaction against the live UTXO set without
    /// mutating it. Used to guard the pending pool.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<(), ChainError> {
        let mut scratch = self.utxos.clone();
        self.apply_transaction(tx, &mut scratch)
    }

    /// Greedily filter `txs` down to an in-order subset that applies
    /// cleanly as a sequence, dropping anything that conflicts with an
    /// earlier pick. This is the miner's candidate selection.
    pub fn select_mineable(&self, txs: Vec<Transaction>) -> Vec<Transaction> {
        let mut work = self.utxos.clone();
        txs.into_iter()
            .filter(|tx| self.apply_transaction(tx, &mut work).is_ok())
            .collect()
    }

    /// Replay persisted blocks. Storage order is expected to be causally
    /// consistent; stragglers ride the orphan buffer, and anything still
    /// orphaned afterwards signals corrupted storage.
    pub fn load_from_storage(&mut self, entries: Vec<(String, Vec<u8>)>) -> usize {
        // Counted as a delta: applying one block can drain buffered
        // descendants, which all count as replayed.
        let before = self.blocks.len();
        for (id, bytes) in entries {
            let block = match crate::core::codec::decode_block(&bytes) {
                Ok(block) => block,
                Err(e) => {
                    log::warn!("skipping undecodable stored block {}: {}", id, e);
                    continue;
                }
            };
            if let Err(e) = self.process_block(block) {
                log::warn!("stored block {} rejected: {}", id, e);
            }
        }
        let applied = self.blocks.len() - before;
        if !self.orphans.is_empty() {
            log::warn!(
                "{} stored block(s) never found their parent; storage may be corrupted",
                self.orphan_count()
            );
        }
        applied
    }

    /// Summary of the current best tip
    pub fn tip_summary(&self) -> TipSummary {
        let tip = &self.blocks[&self.best_tip];
        TipSummary {
            id: tip.id.clone(),
            height: tip.height,
            total_difficulty: tip.total_difficulty,
        }
    }

    /// The best tip block
    pub fn best_tip(&self) -> &Block {
        &self.blocks[&self.best_tip]
    }

    pub fn genesis_id(&self) -> &str {
        &self.genesis_id
    }

    pub fn get_block(&self, id: &str) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn has_block(&self, id: &str) -> bool {
        self.blocks.contains_key(id)
    }

    /// Ids of every validated block, off-best-chain ones included
    pub fn known_block_ids(&self) -> Vec<String> {
        self.blocks.keys().cloned().collect()
    }

    /// Read-only snapshot of the UTXO set, in its deterministic order
    pub fn utxo_snapshot(&self) -> BTreeMap<Outpoint, OutEntry> {
        self.utxos.clone()
    }

    /// Tip-change notifications (the miner's restart signal)
    pub fn subscribe_tips(&self) -> watch::Receiver<TipSummary> {
        self.tip_tx.subscribe()
    }

    /// Ids of applied blocks, in application order (persistence hook)
    pub fn subscribe_executed(&self) -> broadcast::Receiver<String> {
        self.executed_tx.subscribe()
    }
}

/// Insert a transaction's outputs keyed by its id and output index
fn credit_outputs(tx: &Transaction, utxos: &mut BTreeMap<Outpoint, OutEntry>) {
    for (index, out) in tx.out_entries.iter().enumerate() {
        utxos.insert(Outpoint::new(&tx.id, index as u16), out.clone());
    }
}
