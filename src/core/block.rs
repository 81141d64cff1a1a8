use crate::core::Transaction;
use crate::crypto::hash::{Hash256, Hashable};
use crate::{LedgerError, Result};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub hash: Hash256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: i64,
    pub difficulty: u32,
    pub nonce: u64,
    pub height: u64,
}

impl Block {
    /// Builds an unsealed candidate. Its hash is valid for nonce 0 and
    /// difficulty 0 until a mining policy seals it.
    pub fn new(prev_hash: Hash256, transactions: Vec<Transaction>, height: u64) -> Self {
        let header = BlockHeader {
            prev_hash,
            merkle_root: Self::calculate_merkle_root(&transactions),
            timestamp: Utc::now().timestamp(),
            difficulty: 0,
            nonce: 0,
            height,
        };
        let hash = header.hash();

        Self {
            header,
            transactions,
            hash,
        }
    }

    pub fn genesis(coinbase: Transaction) -> Self {
        Self::new(Hash256::zero(), vec![coinbase], 0)
    }

    pub fn is_genesis(&self) -> bool {
        self.header.prev_hash.is_zero()
    }

    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash256 {
        if transactions.is_empty() {
            return Hash256::zero();
        }

        let mut hashes: Vec<Hash256> = transactions.iter().map(|tx| tx.id).collect();

        while hashes.len() > 1 {
            let mut next_level = Vec::with_capacity((hashes.len() + 1) / 2);

            for chunk in hashes.chunks(2) {
                // Odd levels pair the last hash with itself
                let right = chunk.get(1).unwrap_or(&chunk[0]);
                let mut bytes = Vec::with_capacity(64);
                bytes.extend_from_slice(chunk[0].as_bytes());
                bytes.extend_from_slice(right.as_bytes());
                next_level.push(Hash256::hash(&bytes));
            }

            hashes = next_level;
        }

        hashes[0]
    }

    /// Fixes the proof-of-work fields and recomputes the block hash.
    pub fn seal(&mut self, difficulty: u32, nonce: u64) {
        self.header.difficulty = difficulty;
        self.header.nonce = nonce;
        self.hash = self.header.hash();
    }

    /// Checks the stored hash, the merkle root and every transaction id
    /// against their recomputed content hashes.
    pub fn verify_integrity(&self) -> Result<()> {
        if self.hash != self.header.hash() {
            return Err(LedgerError::CorruptEncoding(format!(
                "Block {} does not match its header hash",
                self.hash
            )));
        }

        if let Some(tx) = self.transactions.iter().find(|tx| !tx.has_valid_id()) {
            return Err(LedgerError::CorruptEncoding(format!(
                "Transaction {} in block {} does not match its content hash",
                tx.id, self.hash
            )));
        }

        if self.header.merkle_root != Self::calculate_merkle_root(&self.transactions) {
            return Err(LedgerError::CorruptEncoding(format!(
                "Block {} has a mismatched merkle root",
                self.hash
            )));
        }

        Ok(())
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }
}

impl Hashable for BlockHeader {
    fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(32 + 32 + 8 + 4 + 8 + 8);
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.difficulty.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        data.extend_from_slice(&self.height.to_le_bytes());

        Hash256::hash(&data)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "============ Block {} ============", self.hash)?;
        writeln!(f, "Height: {}", self.header.height)?;
        writeln!(f, "Prev. block: {}", self.header.prev_hash)?;
        match Utc.timestamp_opt(self.header.timestamp, 0).single() {
            Some(time) => writeln!(f, "Time: {}", time.to_rfc3339())?,
            None => writeln!(f, "Time: {}", self.header.timestamp)?,
        }
        writeln!(f, "Nonce: {} (difficulty {})", self.header.nonce, self.header.difficulty)?;
        for tx in &self.transactions {
            write!(f, "{}", tx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::Credential;

    fn coinbase(data: &str) -> Transaction {
        Transaction::new_coinbase(Credential::from_address("miner"), 10, data)
    }

    #[test]
    fn test_block_creation() {
        let block = Block::genesis(coinbase("genesis"));

        assert!(block.is_genesis());
        assert_eq!(block.header.height, 0);
        assert_eq!(block.transaction_count(), 1);
        assert!(block.transactions[0].is_coinbase());
        assert_eq!(block.hash, block.header.hash());
    }

    #[test]
    fn test_seal_changes_hash() {
        let mut block = Block::new(Hash256::hash(b"parent"), vec![coinbase("a")], 1);
        let unsealed = block.hash;

        block.seal(4, 17);

        assert!(!block.is_genesis());
        assert_ne!(block.hash, unsealed);
        assert!(block.verify_integrity().is_ok());
    }

    #[test]
    fn test_merkle_root_calculation() {
        let transactions = vec![coinbase("one"), coinbase("two"), coinbase("three")];

        let root = Block::calculate_merkle_root(&transactions);
        assert_ne!(root, Hash256::zero());
        assert_eq!(root, Block::calculate_merkle_root(&transactions));
        assert_ne!(root, Block::calculate_merkle_root(&transactions[..2]));
        assert_eq!(Block::calculate_merkle_root(&transactions[..1]), transactions[0].id);
    }

    #[test]
    fn test_integrity_detects_tampering() {
        let block = Block::genesis(coinbase("genesis"));

        let mut bad_hash = block.clone();
        bad_hash.header.nonce += 1;
        assert!(matches!(bad_hash.verify_integrity(), Err(LedgerError::CorruptEncoding(_))));

        let mut bad_tx = block.clone();
        bad_tx.transactions[0].outputs[0].value = 1_000;
        assert!(matches!(bad_tx.verify_integrity(), Err(LedgerError::CorruptEncoding(_))));

        let mut swapped = block;
        swapped.transactions = vec![coinbase("other")];
        assert!(matches!(swapped.verify_integrity(), Err(LedgerError::CorruptEncoding(_))));
    }
}
