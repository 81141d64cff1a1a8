use crate::core::transaction::{Credential, TxOutput};
use crate::core::utxo::{UnspentOutputs, UtxoEntry};
use crate::core::{Block, Transaction};
use crate::crypto::hash::Hash256;
use crate::mining::MiningPolicy;
use crate::storage::{BlockStore, Database};
use crate::{LedgerError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Append-only chain of hash-linked blocks. Single writer: the tip only
/// moves through [`Blockchain::mine_block`].
#[derive(Debug, Clone)]
pub struct Blockchain {
    tip: Hash256,
    store: BlockStore,
}

/// Walks the chain from a starting hash back to genesis. Each call to
/// [`Blockchain::iter`] hands out a fresh cursor.
#[derive(Debug)]
pub struct BlockIter<'a> {
    next_hash: Option<Hash256>,
    store: &'a BlockStore,
}

impl Blockchain {
    /// Starts a new ledger whose genesis block holds only `coinbase`.
    pub fn create(db: &Database, coinbase: Transaction, policy: &dyn MiningPolicy) -> Result<Self> {
        let store = BlockStore::new(db)?;
        if let Some(tip) = store.get_tip()? {
            return Err(LedgerError::AlreadyExists(format!(
                "Blockchain already exists with tip {}",
                tip
            )));
        }
        let stored = store.block_count()?;
        if stored > 0 {
            return Err(LedgerError::AlreadyExists(format!(
                "Block table already holds {} blocks",
                stored
            )));
        }

        if !coinbase.is_coinbase() {
            return Err(LedgerError::InvalidInput(
                "Genesis block must be created from a coinbase transaction".to_string(),
            ));
        }

        let genesis = policy.seal(Block::genesis(coinbase))?;
        if !genesis.is_genesis() || !policy.validate(&genesis) {
            return Err(LedgerError::Mining("Mining policy rejected the genesis block".to_string()));
        }

        store.append(&genesis)?;
        log::info!("✅ Created blockchain with genesis block {}", genesis.hash);

        Ok(Self {
            tip: genesis.hash,
            store,
        })
    }

    /// Opens an existing ledger. The stored tip must resolve to a block.
    pub fn open(db: &Database) -> Result<Self> {
        let store = BlockStore::new(db)?;
        let tip = store
            .get_tip()?
            .ok_or_else(|| LedgerError::NotFound("No existing blockchain found".to_string()))?;

        if !store.contains(&tip)? {
            return Err(LedgerError::NotFound(format!("Tip block {} is missing", tip)));
        }

        log::debug!("Opened blockchain at tip {}", tip);
        Ok(Self { tip, store })
    }

    pub fn tip(&self) -> Hash256 {
        self.tip
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Block> {
        self.store
            .get(hash)?
            .ok_or_else(|| LedgerError::NotFound(format!("Block {}", hash)))
    }

    pub fn get_tip_block(&self) -> Result<Block> {
        self.get_block(&self.tip)
    }

    /// Builds a block on top of the stored tip, has `policy` accept it, then
    /// stores it and advances the tip in one transaction. On any failure the
    /// previous tip stays in place.
    pub fn mine_block(
        &mut self,
        transactions: Vec<Transaction>,
        policy: &dyn MiningPolicy,
    ) -> Result<Block> {
        let tip = self
            .store
            .get_tip()?
            .ok_or_else(|| LedgerError::NotFound("No existing blockchain found".to_string()))?;
        let parent = self.get_block(&tip)?;
        self.check_new_transactions(&transactions)?;

        let candidate = Block::new(tip, transactions, parent.header.height + 1);
        let block = policy.seal(candidate)?;

        if block.header.prev_hash != tip || !policy.validate(&block) {
            return Err(LedgerError::Mining(format!(
                "Mining policy returned a block that does not extend tip {}",
                tip
            )));
        }
        block.verify_integrity()?;

        self.store.append(&block)?;
        self.tip = block.hash;

        log::info!(
            "✅ Block {} added at height {} with {} transactions",
            block.hash,
            block.header.height,
            block.transaction_count()
        );
        Ok(block)
    }

    // A transaction id appears at most once on the chain.
    fn check_new_transactions(&self, transactions: &[Transaction]) -> Result<()> {
        let mut ids = HashSet::with_capacity(transactions.len());
        for tx in transactions {
            tx.total_output_value()?;
            if !ids.insert(tx.id) {
                return Err(LedgerError::AlreadyExists(format!(
                    "Transaction {} appears twice in the block",
                    tx.id
                )));
            }
        }

        for block in self.iter() {
            if let Some(tx) = block?.transactions.iter().find(|tx| ids.contains(&tx.id)) {
                return Err(LedgerError::AlreadyExists(format!(
                    "Transaction {} is already on the chain",
                    tx.id
                )));
            }
        }

        Ok(())
    }

    pub fn iter(&self) -> BlockIter<'_> {
        BlockIter {
            next_hash: Some(self.tip),
            store: &self.store,
        }
    }

    /// Every output locked with `credential` that no input unlockable by
    /// `credential` spends, as `(transaction, output index, output)`.
    pub fn find_unspent_transaction_outputs(
        &self,
        credential: &Credential,
    ) -> Result<Vec<(Transaction, u32, TxOutput)>> {
        let mut unspent = Vec::new();
        self.scan_unspent(Some(credential), |tx, index, output| {
            unspent.push((tx.clone(), index, output.clone()));
        })?;
        Ok(unspent)
    }

    /// Every unspent output on the chain, grouped by producing transaction.
    pub fn find_utxo(&self) -> Result<BTreeMap<Hash256, UnspentOutputs>> {
        let mut utxo: BTreeMap<Hash256, UnspentOutputs> = BTreeMap::new();
        self.scan_unspent(None, |tx, index, output| {
            utxo.entry(tx.id).or_default().entries.push(UtxoEntry {
                vout: index,
                output: output.clone(),
            });
        })?;
        Ok(utxo)
    }

    // Single backward pass. Walking tip to genesis (and each block's
    // transactions last to first) reaches every spending input before the
    // output it spends, so `spent` is complete whenever an output is visited.
    // Outputs of a visited transaction are marked too, so an older transaction
    // with the same id is never reported.
    fn scan_unspent<F>(&self, owner: Option<&Credential>, mut visit: F) -> Result<()>
    where
        F: FnMut(&Transaction, u32, &TxOutput),
    {
        let mut spent: HashMap<Hash256, HashSet<u32>> = HashMap::new();

        for block in self.iter() {
            let block = block?;

            for tx in block.transactions.iter().rev() {
                let spent_outputs = spent.get(&tx.id);
                for (index, output) in tx.outputs.iter().enumerate() {
                    let index = index as u32;
                    if spent_outputs.map_or(false, |indices| indices.contains(&index)) {
                        continue;
                    }
                    if owner.map_or(true, |credential| output.is_locked_with(credential)) {
                        visit(tx, index, output);
                    }
                }
                spent
                    .entry(tx.id)
                    .or_default()
                    .extend(0..tx.outputs.len() as u32);

                if tx.is_coinbase() {
                    continue;
                }
                for input in &tx.inputs {
                    if owner.map_or(true, |credential| input.can_unlock(credential)) {
                        spent
                            .entry(input.prev_tx_id)
                            .or_default()
                            .insert(input.output_index);
                    }
                }
            }
        }

        Ok(())
    }

    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction> {
        for block in self.iter() {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.id == *id) {
                return Ok(tx);
            }
        }

        Err(LedgerError::NotFound(format!("Transaction {}", id)))
    }

    /// Checks linkage and heights from tip to genesis and returns the number
    /// of blocks. Per-block integrity is checked as each block is read.
    pub fn verify(&self) -> Result<u64> {
        let mut count = 0u64;
        let mut child: Option<Block> = None;

        for block in self.iter() {
            let block = block?;

            if let Some(child) = &child {
                if child.header.height != block.header.height + 1 {
                    return Err(LedgerError::CorruptEncoding(format!(
                        "Block {} at height {} follows height {}",
                        child.hash, child.header.height, block.header.height
                    )));
                }
            }

            if block.is_genesis() && block.header.height != 0 {
                return Err(LedgerError::CorruptEncoding(format!(
                    "Block {} has no parent but height {}",
                    block.hash, block.header.height
                )));
            }

            count += 1;
            child = Some(block);
        }

        match child {
            Some(last) if last.is_genesis() => {}
            _ => return Err(LedgerError::CorruptEncoding("Chain does not end at a genesis block".to_string())),
        }

        let stored = self.store.block_count()? as u64;
        if stored > count {
            log::warn!("⚠️ {} stored blocks are not reachable from tip {}", stored - count, self.tip);
        }
        Ok(count)
    }
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next_hash.take()?;

        match self.store.get(&hash) {
            Ok(Some(block)) => {
                if !block.is_genesis() {
                    self.next_hash = Some(block.header.prev_hash);
                }
                Some(Ok(block))
            }
            Ok(None) => Some(Err(LedgerError::NotFound(format!("Block {}", hash)))),
            Err(e) => Some(Err(e)),
        }
    }
}
