//! Core ledger components

pub mod blockchain;
pub mod block;
pub mod transaction;
pub mod utxo;

pub use blockchain::{BlockIter, Blockchain};
pub use block::{Block, BlockHeader};
pub use transaction::{Credential, Transaction, TxInput, TxOutput};
pub use utxo::{UnspentOutputs, UtxoEntry, UtxoSet};
