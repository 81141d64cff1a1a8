use crate::{LedgerError, Result};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;

// Tree names (equivalent to buckets / column families)
pub const TREE_BLOCKS: &str = "blocks";
pub const TREE_CHAINSTATE: &str = "chainstate";

/// Handle on the single storage location holding both ledger collections.
#[derive(Debug, Clone)]
pub struct Database {
    db: Arc<Db>,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| LedgerError::Storage(format!("Failed to open database: {}", e)))?;

        Ok(Self {
            db: Arc::new(db),
        })
    }

    /// Whether anything has ever been written at `path`. Opening a sled
    /// database creates it, so read-only callers check this first.
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists()
    }

    pub fn get_tree(&self, tree_name: &str) -> Result<Tree> {
        self.db.open_tree(tree_name)
            .map_err(|e| LedgerError::Storage(format!("Failed to open tree {}: {}", tree_name, e)))
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()
            .map_err(|e| LedgerError::Storage(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}
