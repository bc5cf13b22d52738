//! HTTP status endpoint
//!
//! A small read-only surface for polling node state: health, the current
//! tip and a block-by-id lookup. Everything here reads snapshots; nothing
//! mutates chain state.

use crate::chain::{Executor, TipSummary};
use crate::net::inventory::InventoryManager;
use crate::net::peer::PeerManager;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared read handles for the API handlers
#[derive(Clone)]
pub struct ApiState {
    pub executor: Arc<RwLock<Executor>>,
    pub inventory: Arc<RwLock<InventoryManager>>,
    pub peer_manager: Arc<PeerManager>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub tip: TipSummary,
    pub blocks: usize,
    pub utxos: usize,
    pub pending: usize,
    pub peers: usize,
}

#[derive(Serialize)]
pub struct BlockResponse {
    pub id: String,
    pub previous_hash: String,
    pub height: u64,
    pub total_difficulty: f64,
    pub transaction_ids: Vec<String>,
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let (tip, blocks, utxos) = {
        let executor = state.executor.read().await;
        (
            executor.tip_summary(),
            executor.known_block_ids().len(),
            executor.utxo_snapshot().len(),
        )
    };
    let pending = state.inventory.read().await.pending_count();
    let peers = state.peer_manager.peer_count().await;

    Json(StatusResponse {
        tip,
        blocks,
        utxos,
        pending,
        peers,
    })
}

async fn block_by_id(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<BlockResponse>, StatusCode> {
    let executor = state.executor.read().await;
    let block = executor.get_block(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(BlockResponse {
        id: block.id.clone(),
        previous_hash: block.previous_hash.clone(),
        height: block.height,
        total_difficulty: block.total_difficulty,
        transaction_ids: block.transaction_ids.clone(),
    }))
}

/// Build the status router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/blocks/{id}", get(block_by_id))
        .with_state(state)
}

/// Serve the status API until the process exits
pub async fn serve(state: ApiState, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("Status API listening on port {}", port);
    axum::serve(listener, create_router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::{Block, GENESIS_PREVIOUS_HASH};
    use crate::core::transaction::Transaction;

    fn test_state() -> ApiState {
        let genesis = Block::candidate(
            GENESIS_PREVIOUS_HASH,
            1e-12,
            &[Transaction::coinbase("addr", 100)],
        );
        ApiState {
            executor: Arc::new(RwLock::new(Executor::new(genesis).unwrap())),
            inventory: Arc::new(RwLock::new(InventoryManager::new())),
            peer_manager: Arc::new(PeerManager::new()),
        }
    }

    #[tokio::test]
    async fn test_status_reports_tip() {
        let state = test_state();
        let response = status(State(state.clone())).await;

        assert_eq!(response.0.blocks, 1);
        assert_eq!(response.0.utxos, 1);
        assert_eq!(response.0.pending, 0);
        assert_eq!(response.0.tip.height, 0);
    }

    #[tokio::test]
    async fn test_block_lookup() {
        let state = test_state();
        let tip = state.executor.read().await.tip_summary();

        let found = block_by_id(State(state.clone()), Path(tip.id.clone())).await;
        assert_eq!(found.unwrap().0.id, tip.id);

        let missing = block_by_id(State(state), Path("ff".repeat(32))).await;
        assert!(matches!(missing, Err(StatusCode::NOT_FOUND)));
    }
}
