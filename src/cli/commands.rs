use crate::config::Config;
use crate::core::{Blockchain, Credential, Transaction, UtxoSet};
use crate::mining::{MiningPolicy, ProofOfWork};
use crate::storage::Database;
use crate::LedgerError;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "utxo-ledger")]
#[command(about = "Single-writer block ledger with an indexed UTXO set")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Data directory")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Proof-of-work difficulty in leading zero bits")]
    pub difficulty: Option<u32>,

    #[arg(long, global = true, help = "Enable debug logging")]
    pub debug: bool,

    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Create a blockchain and send the genesis reward to ADDRESS
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },

    /// Get the balance of ADDRESS
    GetBalance {
        #[arg(long)]
        address: String,
    },

    /// Send AMOUNT from FROM to TO, mining a block that also rewards FROM
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
    },

    /// Print all blocks from tip to genesis
    PrintChain,

    /// Rebuild the UTXO set from the chain
    ReindexUtxo,

    /// Check block integrity and linkage from tip to genesis
    VerifyChain,
}

pub fn run_cli(config: Config) -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging once
    let _ = if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).try_init()
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init()
    };

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => config,
    };

    // Override config with CLI arguments
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(difficulty) = cli.difficulty {
        config.mining.difficulty = difficulty;
    }

    execute(&config, cli.command)
}

pub fn execute(config: &Config, command: Commands) -> anyhow::Result<()> {
    let policy = ProofOfWork::with_max_nonce(config.mining.difficulty, config.mining.max_nonce);

    match command {
        Commands::CreateBlockchain { address } => create_blockchain(config, &policy, &address),
        Commands::GetBalance { address } => get_balance(config, &address),
        Commands::Send { from, to, amount } => send(config, &policy, &from, &to, amount),
        Commands::PrintChain => print_chain(config, &policy),
        Commands::ReindexUtxo => reindex_utxo(config),
        Commands::VerifyChain => verify_chain(config),
    }
}

fn credential(address: &str) -> crate::Result<Credential> {
    if address.trim().is_empty() {
        return Err(LedgerError::InvalidInput("Address must not be empty".to_string()));
    }
    Ok(Credential::from_address(address))
}

fn open_ledger(config: &Config) -> anyhow::Result<(Database, Blockchain)> {
    let path = config.database_path();
    if !Database::exists(&path) {
        return Err(LedgerError::NotFound(format!(
            "No existing blockchain found at {}. Create one first.",
            path.display()
        ))
        .into());
    }

    let db = Database::new(&path)?;
    let chain = Blockchain::open(&db)?;
    Ok((db, chain))
}

fn create_blockchain(config: &Config, policy: &ProofOfWork, address: &str) -> anyhow::Result<()> {
    let owner = credential(address)?;

    std::fs::create_dir_all(&config.storage.data_dir)
        .with_context(|| format!("Failed to create {}", config.storage.data_dir.display()))?;
    let db = Database::new(config.database_path())?;

    let coinbase = Transaction::new_coinbase(
        owner,
        config.ledger.coinbase_reward,
        &config.ledger.genesis_data,
    );
    let chain = Blockchain::create(&db, coinbase, policy)?;
    UtxoSet::new(db.clone()).reindex(&chain)?;
    db.flush()?;

    println!("Done! Genesis block {}", chain.tip());
    Ok(())
}

fn get_balance(config: &Config, address: &str) -> anyhow::Result<()> {
    let owner = credential(address)?;
    let (db, _chain) = open_ledger(config)?;

    let balance = UtxoSet::new(db).get_balance(&owner)?;
    println!("Balance of '{}': {}", address, balance);
    Ok(())
}

fn send(
    config: &Config,
    policy: &ProofOfWork,
    from: &str,
    to: &str,
    amount: u64,
) -> anyhow::Result<()> {
    let sender = credential(from)?;
    let recipient = credential(to)?;
    let (db, mut chain) = open_ledger(config)?;
    let utxo_set = UtxoSet::new(db.clone());

    let payment = Transaction::new_payment(&sender, &recipient, amount, &utxo_set)?;
    let coinbase = Transaction::new_coinbase(sender, config.ledger.coinbase_reward, "");

    let block = chain.mine_block(vec![coinbase, payment], policy)?;
    utxo_set.update(&block)?;
    db.flush()?;

    println!("Success! Block {}", block.hash);
    Ok(())
}

fn print_chain(config: &Config, policy: &ProofOfWork) -> anyhow::Result<()> {
    let (_db, chain) = open_ledger(config)?;

    for block in chain.iter() {
        let block = block?;
        print!("{}", block);
        println!("PoW: {}", policy.validate(&block));
        println!();
    }
    Ok(())
}

fn reindex_utxo(config: &Config) -> anyhow::Result<()> {
    let (db, chain) = open_ledger(config)?;
    let utxo_set = UtxoSet::new(db.clone());

    utxo_set.reindex(&chain)?;
    db.flush()?;

    println!(
        "Done! There are {} transactions in the UTXO set.",
        utxo_set.count_transactions()?
    );
    Ok(())
}

fn verify_chain(config: &Config) -> anyhow::Result<()> {
    let (_db, chain) = open_ledger(config)?;

    let blocks = chain.verify()?;
    println!("Chain OK: {} blocks from {} to genesis", blocks, chain.tip());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().join("data");
        config.mining.difficulty = 1;
        config
    }

    fn balance(config: &Config, address: &str) -> u64 {
        let db = Database::new(config.database_path()).unwrap();
        UtxoSet::new(db).get_balance(&Credential::from_address(address)).unwrap()
    }

    #[test]
    fn test_parse_send() {
        let cli = Cli::try_parse_from([
            "utxo-ledger", "send", "--from", "alice", "--to", "bob", "--amount", "6", "--difficulty", "2",
        ])
        .unwrap();

        assert_eq!(
            cli.command,
            Commands::Send {
                from: "alice".to_string(),
                to: "bob".to_string(),
                amount: 6,
            }
        );
        assert_eq!(cli.difficulty, Some(2));
    }

    #[test]
    fn test_create_send_and_reindex() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        execute(&config, Commands::CreateBlockchain { address: "alice".to_string() }).unwrap();
        assert_eq!(balance(&config, "alice"), 10);

        execute(
            &config,
            Commands::Send {
                from: "alice".to_string(),
                to: "bob".to_string(),
                amount: 6,
            },
        )
        .unwrap();
        assert_eq!(balance(&config, "alice"), 14);
        assert_eq!(balance(&config, "bob"), 6);

        execute(&config, Commands::ReindexUtxo).unwrap();
        assert_eq!(balance(&config, "alice"), 14);
        execute(&config, Commands::VerifyChain).unwrap();
        execute(&config, Commands::PrintChain).unwrap();
    }

    #[test]
    fn test_errors_are_typed() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let missing = execute(&config, Commands::GetBalance { address: "alice".to_string() }).unwrap_err();
        assert!(matches!(missing.downcast_ref::<LedgerError>(), Some(LedgerError::NotFound(_))));

        execute(&config, Commands::CreateBlockchain { address: "alice".to_string() }).unwrap();
        let again = execute(&config, Commands::CreateBlockchain { address: "bob".to_string() }).unwrap_err();
        assert!(matches!(again.downcast_ref::<LedgerError>(), Some(LedgerError::AlreadyExists(_))));

        let short = execute(
            &config,
            Commands::Send {
                from: "alice".to_string(),
                to: "bob".to_string(),
                amount: 50,
            },
        )
        .unwrap_err();
        assert!(matches!(
            short.downcast_ref::<LedgerError>(),
            Some(LedgerError::InsufficientFunds { required: 50, available: 10 })
        ));
    }
}
