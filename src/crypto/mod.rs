//! Hashing primitives for the ledger

pub mod hash;

pub use hash::{Hash160, Hash256, Hashable};
