//! Block-acceptance policy

pub mod pow;

pub use pow::{MiningPolicy, ProofOfWork};
