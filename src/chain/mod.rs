//! Chain state: validation, UTXO application and tip selection

pub mod executor;

pub use executor::{BlockOutcome, ChainError, Executor, TipSummary};
