use crate::core::Block;
use crate::crypto::hash::Hashable;
use crate::{LedgerError, Result};

/// Block-acceptance hook consulted before a block is persisted.
///
/// `seal` receives an unsealed candidate and either returns the accepted
/// block (with its final nonce and hash) or an error telling the caller the
/// candidate has to be rebuilt. The ledger never retries on its own.
pub trait MiningPolicy {
    fn seal(&self, candidate: Block) -> Result<Block>;

    fn validate(&self, block: &Block) -> bool;
}

/// Hash-prefix proof of work: the block hash must start with `difficulty`
/// zero bits.
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    pub difficulty: u32,
    pub max_nonce: u64,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> Self {
        Self {
            difficulty,
            max_nonce: u64::MAX,
        }
    }

    pub fn with_max_nonce(difficulty: u32, max_nonce: u64) -> Self {
        Self {
            difficulty,
            max_nonce,
        }
    }

    pub fn meets_difficulty(block: &Block) -> bool {
        block.hash.leading_zero_bits() >= block.header.difficulty
    }
}

impl Default for ProofOfWork {
    fn default() -> Self {
        Self::new(16)
    }
}

impl MiningPolicy for ProofOfWork {
    fn seal(&self, mut candidate: Block) -> Result<Block> {
        if self.difficulty > 256 {
            return Err(LedgerError::Mining(format!(
                "Difficulty {} exceeds the hash width",
                self.difficulty
            )));
        }

        log::debug!(
            "⛏️  Mining block at height {} with difficulty {}",
            candidate.header.height,
            self.difficulty
        );

        let mut nonce = 0u64;
        loop {
            candidate.seal(self.difficulty, nonce);
            if Self::meets_difficulty(&candidate) {
                log::debug!("Found nonce {} for block {}", nonce, candidate.hash);
                return Ok(candidate);
            }

            if nonce == self.max_nonce {
                return Err(LedgerError::Mining(format!(
                    "No nonce up to {} satisfies difficulty {}",
                    self.max_nonce, self.difficulty
                )));
            }
            nonce += 1;
        }
    }

    fn validate(&self, block: &Block) -> bool {
        block.header.difficulty >= self.difficulty
            && block.hash == block.header.hash()
            && Self::meets_difficulty(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{Credential, Transaction};

    fn candidate() -> Block {
        Block::genesis(Transaction::new_coinbase(Credential::from_address("miner"), 10, "pow"))
    }

    #[test]
    fn test_seal_meets_difficulty() -> Result<()> {
        let pow = ProofOfWork::new(8);
        let block = pow.seal(candidate())?;

        assert_eq!(block.header.difficulty, 8);
        assert!(block.hash.leading_zero_bits() >= 8);
        assert!(pow.validate(&block));
        assert!(block.verify_integrity().is_ok());

        Ok(())
    }

    #[test]
    fn test_zero_difficulty_accepts_first_nonce() -> Result<()> {
        let block = ProofOfWork::new(0).seal(candidate())?;

        assert_eq!(block.header.nonce, 0);
        Ok(())
    }

    #[test]
    fn test_validate_rejects_tampered_block() -> Result<()> {
        let pow = ProofOfWork::new(4);
        let mut block = pow.seal(candidate())?;
        block.header.nonce = block.header.nonce.wrapping_add(1);

        assert!(!pow.validate(&block));
        assert!(!ProofOfWork::new(64).validate(&pow.seal(candidate())?));

        Ok(())
    }

    #[test]
    fn test_exhausted_nonce_space_is_an_error() {
        let pow = ProofOfWork::with_max_nonce(200, 16);

        assert!(matches!(pow.seal(candidate()), Err(LedgerError::Mining(_))));
    }
}
