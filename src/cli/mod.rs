//! Command Line Interface for the ledger

pub mod commands;

pub use commands::run_cli;
