//! WeWorkLocal Commission Ledger
//!
//! Operator console over the commission ledger:
//! - Loads and validates configuration (refuses to start on a bad rate table)
//! - Opens the SQLite ledger
//! - Reads commands from stdin until `quit`

use anyhow::{Context, Result};
use std::io;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info};

use weworklocal::console::{self, HELP};
use weworklocal::utils::init_logging;
use weworklocal::{AppConfig, MarketplaceService, SqliteLedgerStore};

// ──────────────────────────────────────────────────────────────────────────────
// MAIN ENTRY POINT
// ──────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    let _log_guard = init_logging(&config.log_filter, config.log_dir.as_deref())?;

    let store = Arc::new(SqliteLedgerStore::new(&config.database_path).await?);
    let service = match MarketplaceService::from_config(store, &config) {
        Ok(service) => service,
        Err(e) => {
            error!("Refusing to start: {}", e);
            return Err(e);
        }
    };
    info!(
        "{} commission ledger started (database {})",
        config.company_name,
        config.database_path.display()
    );

    println!("\n{}", "═".repeat(60));
    println!("{} Commission Ledger v{}", config.company_name, env!("CARGO_PKG_VERSION"));
    println!("{}", "═".repeat(60));
    println!("{}\n", HELP);

    let stdin = BufReader::new(tokio::io::stdin());
    console::run(&service, stdin, &mut io::stdout()).await?;

    info!("Console closed");
    Ok(())
}
