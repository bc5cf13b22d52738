//! Ledger data model: blocks, transactions and the codec boundary

pub mod block;
pub mod codec;
pub mod transaction;

pub use block::{Block, DEFAULT_DIFFICULTY, GENESIS_PREVIOUS_HASH};
pub use codec::CodecError;
pub use transaction::{InEntry, OutEntry, Outpoint, Transaction};
