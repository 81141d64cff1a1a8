use crate::core::transaction::{Credential, TxOutput};
use crate::core::{Block, Blockchain, Transaction};
use crate::crypto::hash::Hash256;
use crate::storage::database::{Database, TREE_CHAINSTATE};
use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use sled::{Batch, Tree};
use std::collections::{BTreeMap, HashMap};

/// One unspent output, remembered with its index in the producing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub vout: u32,
    pub output: TxOutput,
}

/// Value stored under a transaction id in the chainstate tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutputs {
    pub entries: Vec<UtxoEntry>,
}

impl UnspentOutputs {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            entries: tx
                .outputs
                .iter()
                .enumerate()
                .map(|(vout, output)| UtxoEntry {
                    vout: vout as u32,
                    output: output.clone(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops the entry for `vout`; false if it was not there.
    pub fn remove(&mut self, vout: u32) -> bool {
        match self.entries.iter().position(|entry| entry.vout == vout) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| LedgerError::Storage(format!("Failed to serialize UTXO entry: {}", e)))
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Index of spendable outputs kept in the `chainstate` tree, keyed by
/// transaction id.
#[derive(Debug, Clone)]
pub struct UtxoSet {
    db: Database,
}

impl UtxoSet {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn get_tree(&self) -> Result<Tree> {
        self.db.get_tree(TREE_CHAINSTATE)
    }

    /// Rebuilds the index from a full scan of `blockchain`. Stale keys are
    /// removed and rebuilt entries written in one atomic batch, so readers
    /// see either the old index or the new one.
    pub fn reindex(&self, blockchain: &Blockchain) -> Result<()> {
        let utxo = blockchain.find_utxo()?;
        let tree = self.get_tree()?;

        let mut batch = Batch::default();
        let mut stale = 0usize;
        for key in tree.iter().keys() {
            let key = key?;
            if Hash256::from_slice(&key).map_or(true, |txid| !utxo.contains_key(&txid)) {
                batch.remove(key);
                stale += 1;
            }
        }
        for (txid, outputs) in &utxo {
            batch.insert(&txid.as_bytes()[..], outputs.encode()?);
        }
        tree.apply_batch(batch)?;

        log::info!("🔄 Reindexed UTXO set: {} transactions, {} stale keys removed", utxo.len(), stale);
        Ok(())
    }

    /// Absorbs a newly appended block. Inputs of every non-coinbase
    /// transaction are removed and every transaction's outputs are added, in
    /// block order. All changes are staged and land in one atomic batch; if
    /// any input is missing from the index nothing is written.
    pub fn update(&self, block: &Block) -> Result<()> {
        let tree = self.get_tree()?;
        let mut staged: HashMap<Hash256, Option<UnspentOutputs>> = HashMap::new();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let mut outputs = Self::load_staged(&tree, &staged, &input.prev_tx_id)?
                        .ok_or_else(|| {
                            LedgerError::NotFound(format!(
                                "UTXO entry for transaction {} spent by {}",
                                input.prev_tx_id, tx.id
                            ))
                        })?;

                    if !outputs.remove(input.output_index) {
                        return Err(LedgerError::NotFound(format!(
                            "UTXO {}:{} spent by {}",
                            input.prev_tx_id, input.output_index, tx.id
                        )));
                    }

                    let state = if outputs.is_empty() { None } else { Some(outputs) };
                    staged.insert(input.prev_tx_id, state);
                }
            }

            let fresh = UnspentOutputs::from_transaction(tx);
            staged.insert(tx.id, if fresh.is_empty() { None } else { Some(fresh) });
        }

        let mut batch = Batch::default();
        for (txid, state) in &staged {
            match state {
                Some(outputs) => batch.insert(&txid.as_bytes()[..], outputs.encode()?),
                None => batch.remove(&txid.as_bytes()[..]),
            }
        }
        tree.apply_batch(batch)?;

        log::debug!("💾 Applied block {} to UTXO set ({} keys touched)", block.hash, staged.len());
        Ok(())
    }

    fn load_staged(
        tree: &Tree,
        staged: &HashMap<Hash256, Option<UnspentOutputs>>,
        txid: &Hash256,
    ) -> Result<Option<UnspentOutputs>> {
        if let Some(state) = staged.get(txid) {
            return Ok(state.clone());
        }

        match tree.get(txid.as_bytes())? {
            Some(bytes) => Ok(Some(UnspentOutputs::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// First-fit selection in key order: accumulates outputs unlocked by
    /// `credential` and stops as soon as `amount` is covered. A short
    /// result (`accumulated < amount`) means insufficient funds.
    pub fn find_spendable_outputs(
        &self,
        credential: &Credential,
        amount: u64,
    ) -> Result<(u64, BTreeMap<Hash256, Vec<u32>>)> {
        let mut accumulated = 0u64;
        let mut selected: BTreeMap<Hash256, Vec<u32>> = BTreeMap::new();

        if amount == 0 {
            return Ok((accumulated, selected));
        }

        'scan: for item in self.get_tree()?.iter() {
            let (key, value) = item?;
            let txid = decode_key(&key)?;

            for entry in UnspentOutputs::decode(&value)?.entries {
                if entry.output.is_locked_with(credential) {
                    accumulated = accumulated.saturating_add(entry.output.value);
                    selected.entry(txid).or_default().push(entry.vout);

                    if accumulated >= amount {
                        break 'scan;
                    }
                }
            }
        }

        Ok((accumulated, selected))
    }

    /// Every unspent output unlocked by `credential`.
    pub fn find_utxo(&self, credential: &Credential) -> Result<Vec<TxOutput>> {
        let mut utxos = Vec::new();

        for item in self.get_tree()?.iter() {
            let (_, value) = item?;
            utxos.extend(
                UnspentOutputs::decode(&value)?
                    .entries
                    .into_iter()
                    .map(|entry| entry.output)
                    .filter(|output| output.is_locked_with(credential)),
            );
        }

        Ok(utxos)
    }

    pub fn get_balance(&self, credential: &Credential) -> Result<u64> {
        Ok(self
            .find_utxo(credential)?
            .iter()
            .fold(0u64, |total, output| total.saturating_add(output.value)))
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> Result<usize> {
        Ok(self.get_tree()?.len())
    }

    pub fn get(&self, txid: &Hash256) -> Result<Option<UnspentOutputs>> {
        match self.get_tree()?.get(txid.as_bytes())? {
            Some(bytes) => Ok(Some(UnspentOutputs::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The whole index in key order.
    pub fn snapshot(&self) -> Result<BTreeMap<Hash256, UnspentOutputs>> {
        let mut utxo = BTreeMap::new();
        for item in self.get_tree()?.iter() {
            let (key, value) = item?;
            utxo.insert(decode_key(&key)?, UnspentOutputs::decode(&value)?);
        }
        Ok(utxo)
    }
}

fn decode_key(key: &[u8]) -> Result<Hash256> {
    Hash256::from_slice(key)
        .ok_or_else(|| LedgerError::CorruptEncoding(format!("Invalid UTXO key {}", hex::encode(key))))
}
