//! Proof-of-work mining
//!
//! One mining attempt at a time, always keyed to the current best tip. The
//! nonce search runs in bounded batches with a tip check between batches;
//! any tip change discards the in-flight candidate and restarts against
//! the new tip.

use crate::chain::{Executor, TipSummary};
use crate::core::block::{Block, DEFAULT_DIFFICULTY, GENESIS_PREVIOUS_HASH};
use crate::core::codec;
use crate::core::transaction::Transaction;
use crate::net::inventory::InventoryManager;
use crate::net::node::dispatch_replies;
use crate::net::peer::PeerManager;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Coinbase reward per mined block
pub const BLOCK_REWARD: u64 = 50;

/// Amount granted by a freshly mined genesis block
pub const GENESIS_SUPPLY: u64 = 1_000_000;

/// Nonce attempts between cancellation checks
const NONCE_BATCH: u64 = 2_000;

/// Mining statistics for one successful attempt
#[derive(Debug, Clone)]
pub struct MiningStats {
    pub hash_attempts: u64,
    pub time_ms: u128,
    pub hash_rate: f64,
}

impl MiningStats {
    fn new(hash_attempts: u64, time_ms: u128) -> Self {
        let hash_rate = if time_ms > 0 {
            (hash_attempts as f64) / (time_ms as f64 / 1000.0)
        } else {
            hash_attempts as f64
        };
        Self {
            hash_attempts,
            time_ms,
            hash_rate,
        }
    }
}

/// Miner for creating new blocks
pub struct Miner {
    /// Address receiving coinbase rewards
    pub address: String,
}

impl Miner {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
        }
    }

    /// Assemble a candidate extending `tip_id`: coinbase first, then the
    /// given transactions, nonce seeded from an arbitrary starting point.
    pub fn build_candidate(
        &self,
        tip_id: &str,
        difficulty: f64,
        pending: Vec<Transaction>,
    ) -> Block {
        let mut txs = vec![Transaction::coinbase(&self.address, BLOCK_REWARD)];
        txs.extend(pending);
        Block::candidate(tip_id, difficulty, &txs).with_nonce(rand::random())
    }

    /// Search for a valid nonce, checking `cancelled` between batches.
    /// Returns the mined block and its stats, or None when cancelled first.
    pub fn search(
        &self,
        mut block: Block,
        mut cancelled: impl FnMut() -> bool,
    ) -> Option<(Block, MiningStats)> {
        let start = Instant::now();
        let mut attempts: u64 = 0;
        loop {
            let found;
            (block, found) = search_batch(block, NONCE_BATCH);
            attempts += NONCE_BATCH;
            if found {
                return Some((block, MiningStats::new(attempts, start.elapsed().as_millis())));
            }
            if cancelled() {
                return None;
            }
        }
    }
}

/// Run one batch of nonce attempts
fn search_batch(mut block: Block, budget: u64) -> (Block, bool) {
    for _ in 0..budget {
        if block.is_valid_pow() {
            return (block, true);
        }
        let next = block.nonce.wrapping_add(1);
        block = block.with_nonce(next);
    }
    (block, false)
}

/// Mine a genesis block granting the whole initial supply to `recipient`.
/// Used by the CLI; never called on a running node.
pub fn mine_genesis(recipient: &str, difficulty: f64) -> Block {
    let coinbase = Transaction::coinbase(recipient, GENESIS_SUPPLY);
    let mut block =
        Block::candidate(GENESIS_PREVIOUS_HASH, difficulty, &[coinbase]).with_nonce(rand::random());
    loop {
        let found;
        (block, found) = search_batch(block, NONCE_BATCH);
        if found {
            return block;
        }
    }
}

/// The mining loop. Candidate difficulty is the parent's declared
/// difficulty, which keeps the target deterministic given prior chain
/// state. Runs until the tip channel closes.
pub async fn run(
    miner: Miner,
    executor: Arc<RwLock<Executor>>,
    inventory: Arc<RwLock<InventoryManager>>,
    peer_manager: Arc<PeerManager>,
) {
    let mut tips = executor.read().await.subscribe_tips();
    log::info!("Miner started, rewards to {}", miner.address);

    loop {
        let tip: TipSummary = tips.borrow_and_update().clone();
        let (difficulty, pending) = {
            let executor = executor.read().await;
            let difficulty = executor
                .get_block(&tip.id)
                .map(|b| b.difficulty)
                .unwrap_or(DEFAULT_DIFFICULTY);
            let pool = inventory.read().await.pending_transactions();
            (difficulty, executor.select_mineable(pool))
        };

        let mut candidate = miner.build_candidate(&tip.id, difficulty, pending);
        log::debug!(
            "Mining on tip {} at difficulty {:.3e} with {} transaction(s)",
            &tip.id[..8],
            difficulty,
            candidate.transaction_ids.len()
        );

        let start = Instant::now();
        let mut attempts: u64 = 0;
        let mined = loop {
            let found;
            (candidate, found) = search_batch(candidate, NONCE_BATCH);
            attempts += NONCE_BATCH;
            if found {
                break Some(candidate);
            }
            match tips.has_changed() {
                // Tip moved underneath us; restart against the new tip
                Ok(true) => break None,
                Ok(false) => tokio::task::yield_now().await,
                Err(_) => return,
            }
        };

        let Some(block) = mined else { continue };

        let stats = MiningStats::new(attempts, start.elapsed().as_millis());
        log::info!(
            "Mined block {} in {}ms ({} attempts, {:.2} H/s)",
            &block.id[..8],
            stats.time_ms,
            stats.hash_attempts,
            stats.hash_rate
        );

        // Same acceptance path as a block received from a peer. Rejection
        // is only possible under a race with a competing block, in which
        // case the candidate is simply dropped.
        let bytes = codec::encode_block(&block);
        let replies = {
            let mut executor = executor.write().await;
            let mut inventory = inventory.write().await;
            match inventory.accept_block(bytes, &mut executor) {
                Ok((_, replies)) => replies,
                Err(e) => {
                    log::warn!("Mined block rejected: {}", e);
                    vec![]
                }
            }
        };
        dispatch_replies(&peer_manager, None, replies).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BlockOutcome;

    const EASY: f64 = 1e-12;

    #[test]
    fn test_mine_genesis() {
        let block = mine_genesis("miner-addr", EASY);
        assert!(block.is_genesis());
        assert!(block.is_valid_pow());

        let txs = block.parsed_transactions().unwrap();
        assert_eq!(txs.len(), 1);
        assert!(txs[0].is_coinbase());
        assert_eq!(txs[0].total_output(), GENESIS_SUPPLY);
    }

    #[test]
    fn test_candidate_puts_coinbase_first() {
        let miner = Miner::new("miner-addr");
        let pending = vec![Transaction::coinbase("other", 1)];
        let block = miner.build_candidate(&"aa".repeat(32), EASY, pending.clone());

        let txs = block.parsed_transactions().unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].total_output(), BLOCK_REWARD);
        assert_eq!(txs[1].id, pending[0].id);
        assert!(block.verify_merkle_root());
    }

    #[test]
    fn test_search_finds_at_trivial_target() {
        let miner = Miner::new("miner-addr");
        let candidate = miner.build_candidate(&"aa".repeat(32), EASY, vec![]);
        let (mined, stats) = miner.search(candidate, || false).unwrap();
        assert!(mined.is_valid_pow());
        assert!(stats.hash_attempts > 0);
    }

    #[test]
    fn test_search_honours_cancellation() {
        let miner = Miner::new("miner-addr");
        // An infinite target only an all-zero mantissa could meet
        let candidate = miner.build_candidate(&"aa".repeat(32), f64::INFINITY, vec![]);
        assert!(miner.search(candidate, || true).is_none());
    }

    #[tokio::test]
    async fn test_mined_block_goes_through_shared_accept_path() {
        let genesis = mine_genesis("miner-addr", EASY);
        let mut executor = Executor::new(genesis).unwrap();
        let mut inventory = InventoryManager::new();

        let miner = Miner::new("miner-addr");
        let candidate = miner.build_candidate(&executor.tip_summary().id, EASY, vec![]);
        let (block, _stats) = miner.search(candidate, || false).unwrap();

        let (outcome, replies) = inventory
            .accept_block(codec::encode_block(&block), &mut executor)
            .unwrap();
        assert_eq!(outcome, BlockOutcome::Applied { new_tip: true });
        assert_eq!(executor.tip_summary().id, block.id);
        assert_eq!(replies.len(), 1);
    }
}
