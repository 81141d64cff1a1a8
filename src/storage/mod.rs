//! Persistent storage on sled

pub mod block_store;
pub mod database;

pub use block_store::BlockStore;
pub use database::Database;
