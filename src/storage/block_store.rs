//! Content-addressed block table plus the tip pointer.
//!
//! Blocks are keyed by their 32-byte hash; the tip lives under a one-byte
//! reserved key in the same tree so that appending a block and advancing
//! the tip commit in a single sled transaction.

use crate::core::Block;
use crate::crypto::hash::Hash256;
use crate::storage::database::{Database, TREE_BLOCKS};
use crate::{LedgerError, Result};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionResult,
    TransactionalTree,
};
use sled::Tree;

const TIP_KEY: &[u8] = b"l";

#[derive(Debug, Clone)]
pub struct BlockStore {
    tree: Tree,
}

impl BlockStore {
    pub fn new(db: &Database) -> Result<Self> {
        Ok(Self {
            tree: db.get_tree(TREE_BLOCKS)?,
        })
    }

    pub fn get(&self, hash: &Hash256) -> Result<Option<Block>> {
        match self.tree.get(hash.as_bytes())? {
            Some(data) => {
                let block: Block = bincode::deserialize(&data)?;
                if block.hash != *hash {
                    return Err(LedgerError::CorruptEncoding(format!(
                        "Block stored under {} decodes to {}",
                        hash, block.hash
                    )));
                }
                block.verify_integrity()?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    pub fn contains(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.tree.contains_key(hash.as_bytes())?)
    }

    /// Stores `block` without touching the tip. Storing the same block twice
    /// is a no-op; a different payload under an existing hash is rejected.
    pub fn put(&self, block: &Block) -> Result<()> {
        let data = encode_block(block)?;
        let key = &block.hash.as_bytes()[..];

        let result: TransactionResult<(), LedgerError> =
            self.tree.transaction(|tx| put_in(tx, key, &data));
        result?;

        log::debug!("💾 Saved block {} at height {}", block.hash, block.header.height);
        Ok(())
    }

    pub fn get_tip(&self) -> Result<Option<Hash256>> {
        match self.tree.get(TIP_KEY)? {
            Some(bytes) => Hash256::from_slice(&bytes)
                .map(Some)
                .ok_or_else(|| LedgerError::CorruptEncoding("Invalid tip hash length".to_string())),
            None => Ok(None),
        }
    }

    /// Points the tip at an already stored block.
    pub fn set_tip(&self, hash: &Hash256) -> Result<()> {
        let key = &hash.as_bytes()[..];

        let result: TransactionResult<(), LedgerError> = self.tree.transaction(|tx| {
            if tx.get(key)?.is_none() {
                return Err(ConflictableTransactionError::Abort(LedgerError::NotFound(
                    format!("Cannot set tip to unknown block {}", hash),
                )));
            }
            tx.insert(TIP_KEY, key)?;
            Ok(())
        });
        result?;

        log::debug!("📌 Tip set to {}", hash);
        Ok(())
    }

    /// Stores `block` and advances the tip to it atomically.
    pub fn append(&self, block: &Block) -> Result<()> {
        let data = encode_block(block)?;
        let key = &block.hash.as_bytes()[..];

        let result: TransactionResult<(), LedgerError> = self.tree.transaction(|tx| {
            put_in(tx, key, &data)?;
            tx.insert(TIP_KEY, key)?;
            Ok(())
        });
        result?;

        log::debug!("💾 Appended block {} at height {}", block.hash, block.header.height);
        Ok(())
    }

    pub fn block_count(&self) -> Result<usize> {
        let tip_entries = usize::from(self.tree.contains_key(TIP_KEY)?);
        Ok(self.tree.len() - tip_entries)
    }
}

fn encode_block(block: &Block) -> Result<Vec<u8>> {
    bincode::serialize(block)
        .map_err(|e| LedgerError::Storage(format!("Failed to serialize block: {}", e)))
}

fn put_in(
    tx: &TransactionalTree,
    key: &[u8],
    data: &[u8],
) -> ConflictableTransactionResult<(), LedgerError> {
    if let Some(existing) = tx.get(key)? {
        if existing.as_ref() != data {
            return Err(ConflictableTransactionError::Abort(LedgerError::AlreadyExists(
                format!("Block {} is stored with a different payload", hex::encode(key)),
            )));
        }
        return Ok(());
    }

    tx.insert(key, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{Credential, Transaction};
    use tempfile::TempDir;

    fn setup() -> Result<(TempDir, BlockStore)> {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path().join("ledger.db"))?;
        let store = BlockStore::new(&db)?;
        Ok((temp_dir, store))
    }

    fn genesis() -> Block {
        Block::genesis(Transaction::new_coinbase(Credential::from_address("a"), 10, "genesis"))
    }

    #[test]
    fn test_put_and_get() -> Result<()> {
        let (_dir, store) = setup()?;
        let block = genesis();

        assert!(store.get(&block.hash)?.is_none());
        store.put(&block)?;

        assert_eq!(store.get(&block.hash)?, Some(block.clone()));
        assert!(store.contains(&block.hash)?);
        assert_eq!(store.get_tip()?, None);
        assert_eq!(store.block_count()?, 1);

        Ok(())
    }

    #[test]
    fn test_put_is_idempotent() -> Result<()> {
        let (_dir, store) = setup()?;
        let block = genesis();

        store.put(&block)?;
        store.put(&block)?;
        assert_eq!(store.block_count()?, 1);

        Ok(())
    }

    #[test]
    fn test_put_rejects_different_payload() -> Result<()> {
        let (_dir, store) = setup()?;
        let block = genesis();
        store.put(&block)?;

        let mut forged = block.clone();
        forged.header.nonce += 1;

        assert!(matches!(store.put(&forged), Err(LedgerError::AlreadyExists(_))));
        assert_eq!(store.get(&block.hash)?, Some(block));

        Ok(())
    }

    #[test]
    fn test_append_advances_tip() -> Result<()> {
        let (_dir, store) = setup()?;
        let block = genesis();

        store.append(&block)?;

        assert_eq!(store.get_tip()?, Some(block.hash));
        assert_eq!(store.block_count()?, 1);

        Ok(())
    }

    #[test]
    fn test_set_tip_requires_stored_block() -> Result<()> {
        let (_dir, store) = setup()?;
        let block = genesis();

        assert!(matches!(store.set_tip(&block.hash), Err(LedgerError::NotFound(_))));
        assert_eq!(store.get_tip()?, None);

        store.put(&block)?;
        store.set_tip(&block.hash)?;
        assert_eq!(store.get_tip()?, Some(block.hash));

        Ok(())
    }

    #[test]
    fn test_failed_append_leaves_tip_unchanged() -> Result<()> {
        let (_dir, store) = setup()?;
        let block = genesis();
        store.append(&block)?;

        let mut forged = block.clone();
        forged.transactions[0].outputs[0].value = 99;

        assert!(store.append(&forged).is_err());
        assert_eq!(store.get_tip()?, Some(block.hash));
        assert_eq!(store.get(&block.hash)?, Some(block));

        Ok(())
    }

    #[test]
    fn test_corrupt_payload_is_reported() -> Result<()> {
        let (_dir, store) = setup()?;
        let block = genesis();
        store.tree.insert(block.hash.as_bytes(), vec![1u8, 2, 3])?;

        assert!(matches!(store.get(&block.hash), Err(LedgerError::CorruptEncoding(_))));

        Ok(())
    }
}
