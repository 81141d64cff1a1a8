//! UTXO Ledger - a single-writer, hash-linked block ledger
//!
//! This library implements:
//! - Append-only block storage with an atomically advanced tip
//! - A UTXO index kept in step with the chain, rebuildable from scratch
//! - First-fit selection of spendable outputs for new payments
//! - A pluggable block-acceptance hook with a proof-of-work default
//! - A small CLI over all of the above

pub mod core;
pub mod crypto;
pub mod mining;
pub mod storage;
pub mod cli;
pub mod error;
pub mod config;

pub use error::{LedgerError, Result};
