use utxo_ledger::cli::commands::run_cli;
use utxo_ledger::config::Config;

fn main() {
    // Load configuration (logging is initialized by the CLI based on the debug flag)
    let config = Config::load().unwrap_or_default();

    if let Err(e) = run_cli(config) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
