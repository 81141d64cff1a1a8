use crate::core::utxo::UtxoSet;
use crate::crypto::hash::{Hash160, Hash256, Hashable};
use crate::{LedgerError, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Output index carried by the single input of a coinbase transaction.
pub const COINBASE_OUTPUT_INDEX: u32 = u32::MAX;

/// Opaque ownership proof. The ledger only ever compares credentials for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential(Vec<u8>);

impl Credential {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Stand-in for wallet key derivation used by the command line:
    /// the credential of an address is the HASH160 of its text.
    pub fn from_address(address: &str) -> Self {
        Self(Hash160::hash_sha256(address.as_bytes()).as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_tx_id: Hash256,
    pub output_index: u32,
    pub unlocking_credential: Credential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub locking_credential: Credential,
}

impl TxInput {
    pub fn can_unlock(&self, credential: &Credential) -> bool {
        &self.unlocking_credential == credential
    }
}

impl TxOutput {
    pub fn new(value: u64, locking_credential: Credential) -> Self {
        Self { value, locking_credential }
    }

    pub fn is_locked_with(&self, credential: &Credential) -> bool {
        &self.locking_credential == credential
    }
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.hash();
        tx
    }

    /// Mints `value` to `to`. The input carries `data` in place of an
    /// unlocking credential; empty data is replaced by a timestamped note so
    /// that coinbases paying the same credential never share an id.
    pub fn new_coinbase(to: Credential, value: u64, data: &str) -> Self {
        let data = if data.is_empty() {
            format!(
                "Reward to {} at {}",
                to,
                Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
            )
        } else {
            data.to_string()
        };

        let coinbase_input = TxInput {
            prev_tx_id: Hash256::zero(),
            output_index: COINBASE_OUTPUT_INDEX,
            unlocking_credential: Credential::new(data.into_bytes()),
        };

        Self::new(vec![coinbase_input], vec![TxOutput::new(value, to)])
    }

    /// Builds a payment of `amount` from `from` to `to`, funded by a
    /// first-fit selection over the UTXO set. Any surplus goes back to
    /// `from` as a change output.
    pub fn new_payment(
        from: &Credential,
        to: &Credential,
        amount: u64,
        utxo_set: &UtxoSet,
    ) -> Result<Self> {
        if amount == 0 {
            return Err(LedgerError::InvalidInput("Payment amount must be positive".to_string()));
        }

        let (accumulated, spendable) = utxo_set.find_spendable_outputs(from, amount)?;
        if accumulated < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let inputs = spendable
            .into_iter()
            .flat_map(|(txid, indices)| {
                indices.into_iter().map(move |output_index| TxInput {
                    prev_tx_id: txid,
                    output_index,
                    unlocking_credential: from.clone(),
                })
            })
            .collect();

        let mut outputs = vec![TxOutput::new(amount, to.clone())];
        if accumulated > amount {
            outputs.push(TxOutput::new(accumulated - amount, from.clone()));
        }

        Ok(Self::new(inputs, outputs))
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_tx_id.is_zero()
            && self.inputs[0].output_index == COINBASE_OUTPUT_INDEX
    }

    /// True when the stored id matches the content hash of inputs and outputs.
    pub fn has_valid_id(&self) -> bool {
        self.id == self.hash()
    }

    pub fn total_output_value(&self) -> Result<u64> {
        self.outputs.iter().try_fold(0u64, |total, output| {
            total.checked_add(output.value).ok_or_else(|| {
                LedgerError::InvalidInput(format!("Output values of transaction {} overflow", self.id))
            })
        })
    }
}

impl Hashable for Transaction {
    fn hash(&self) -> Hash256 {
        let mut data = Vec::new();

        data.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            data.extend_from_slice(input.prev_tx_id.as_bytes());
            data.extend_from_slice(&input.output_index.to_le_bytes());
            let credential = input.unlocking_credential.as_bytes();
            data.extend_from_slice(&(credential.len() as u32).to_le_bytes());
            data.extend_from_slice(credential);
        }

        data.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            data.extend_from_slice(&output.value.to_le_bytes());
            let credential = output.locking_credential.as_bytes();
            data.extend_from_slice(&(credential.len() as u32).to_le_bytes());
            data.extend_from_slice(credential);
        }

        Hash256::hash(&data)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", self.id)?;

        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "     Input {}:", i)?;
            writeln!(f, "       TXID:       {}", input.prev_tx_id)?;
            writeln!(f, "       Out:        {}", input.output_index)?;
            writeln!(f, "       Credential: {}", input.unlocking_credential)?;
        }

        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "     Output {}:", i)?;
            writeln!(f, "       Value:      {}", output.value)?;
            writeln!(f, "       Credential: {}", output.locking_credential)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Credential {
        Credential::from_address("alice")
    }

    #[test]
    fn test_coinbase_transaction() {
        let tx = Transaction::new_coinbase(alice(), 10, "genesis");

        assert!(tx.is_coinbase());
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, 10);
        assert!(tx.outputs[0].is_locked_with(&alice()));
        assert!(tx.has_valid_id());
    }

    #[test]
    fn test_coinbase_without_data_gets_unique_id() {
        let a = Transaction::new_coinbase(alice(), 10, "");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Transaction::new_coinbase(alice(), 10, "");

        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_transaction_id_is_content_hash() {
        let tx = Transaction::new_coinbase(alice(), 1000, "test");
        assert_eq!(tx.id, tx.hash());
        assert_ne!(tx.id, Hash256::zero());

        let mut tampered = tx.clone();
        tampered.outputs[0].value = 1001;
        assert!(!tampered.has_valid_id());
    }

    #[test]
    fn test_spending_transaction_is_not_coinbase() {
        let funding = Transaction::new_coinbase(alice(), 10, "fund");
        let spend = Transaction::new(
            vec![TxInput {
                prev_tx_id: funding.id,
                output_index: 0,
                unlocking_credential: alice(),
            }],
            vec![TxOutput::new(10, Credential::from_address("bob"))],
        );

        assert!(!spend.is_coinbase());
        assert!(spend.inputs[0].can_unlock(&alice()));
        assert!(!spend.inputs[0].can_unlock(&Credential::from_address("bob")));
        assert_eq!(spend.total_output_value().unwrap(), 10);
    }

    #[test]
    fn test_total_output_value_overflow() {
        let tx = Transaction::new(
            vec![],
            vec![
                TxOutput::new(u64::MAX, alice()),
                TxOutput::new(1, alice()),
            ],
        );

        assert!(matches!(tx.total_output_value(), Err(LedgerError::InvalidInput(_))));
    }

    #[test]
    fn test_serialization_round_trip_keeps_id() {
        let tx = Transaction::new_coinbase(alice(), 42, "round trip");
        let bytes = bincode::serialize(&tx).unwrap();
        let decoded: Transaction = bincode::deserialize(&bytes).unwrap();

        assert_eq!(decoded, tx);
        assert!(decoded.has_valid_id());
    }
}
