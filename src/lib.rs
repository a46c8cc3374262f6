//! WeWorkLocal Commission Ledger
//!
//! Multi-level referral commissions for the WeWorkLocal marketplace:
//! - Validated configuration (rates, plan prices) from env / YAML
//! - SQLite ledger: users, referrer edges, commission events, wallets
//! - Marketplace service wiring purchases and sales to the calculator
//! - Referral trees and an operator console
//!
//! The pure commission arithmetic lives in the `commission-core` crate.

pub mod config;
pub mod console;
pub mod error;
pub mod ledger;
pub mod referrals;
pub mod service;
pub mod utils;

// Re-exports for convenience
pub use commission_core;
pub use config::AppConfig;
pub use error::LedgerError;
pub use ledger::{LedgerStore, SqliteLedgerStore};
pub use service::MarketplaceService;
