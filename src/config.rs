//! Configuration
//!
//! Values are layered: built-in defaults, then an optional YAML file named by
//! `WEWORKLOCAL_CONFIG`, then individual environment variables (a `.env` file
//! is honoured). Rates are parsed as exact decimals.

use anyhow::{Context, Result};
use commission_core::{
    CommissionError, CommissionRateTable, PlanCatalog, TierPrices, MAX_LEVELS,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable holding the path of the YAML config file.
pub const CONFIG_FILE_VAR: &str = "WEWORKLOCAL_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub company_name: String,
    /// SQLite database holding users, commission events and wallets
    pub database_path: PathBuf,
    /// `tracing` filter directive, used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Directory for the daily rolling log file; console only when unset
    pub log_dir: Option<PathBuf>,
    pub commission: CommissionSettings,
    pub plans: PlanSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionSettings {
    pub level_rates: [Decimal; MAX_LEVELS],
    pub property_rate: Decimal,
    pub company_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanSettings {
    pub customer: TierPrices,
    pub vendor: TierPrices,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            company_name: "WeWorkLocal".to_string(),
            database_path: PathBuf::from("weworklocal.db"),
            log_filter: "weworklocal=info,commission_core=info".to_string(),
            log_dir: None,
            commission: CommissionSettings::default(),
            plans: PlanSettings::default(),
        }
    }
}

impl Default for CommissionSettings {
    fn default() -> Self {
        let table = CommissionRateTable::default();
        Self {
            level_rates: *table.level_rates(),
            property_rate: table.property_rate(),
            company_rate: table.company_rate(),
        }
    }
}

impl Default for PlanSettings {
    fn default() -> Self {
        let catalog = PlanCatalog::default();
        Self {
            customer: catalog.customer(),
            vendor: catalog.vendor(),
        }
    }
}

impl AppConfig {
    /// Load from `.env`, the optional YAML file and the process environment.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match env::var(CONFIG_FILE_VAR) {
            Ok(path) => Self::from_yaml_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Override fields from variables returned by `var`.
    ///
    /// Variable names follow the marketplace settings (`LEVEL_1_COMMISSION`,
    /// `CUSTOMER_GOLD_PRICE`, ...). A present but unparseable value is an error.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = var("COMPANY_NAME") {
            self.company_name = name;
        }
        override_with(&var, "DATABASE_PATH", &mut self.database_path)?;
        override_with(&var, "LOG_FILTER", &mut self.log_filter)?;
        if let Some(dir) = var("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }

        let commission = &mut self.commission;
        override_with(&var, "COMPANY_COMMISSION_RATE", &mut commission.company_rate)?;
        override_with(&var, "PROPERTY_COMMISSION_RATE", &mut commission.property_rate)?;
        for (idx, rate) in commission.level_rates.iter_mut().enumerate() {
            override_with(&var, &format!("LEVEL_{}_COMMISSION", idx + 1), rate)?;
        }

        for (prefix, prices) in [
            ("CUSTOMER", &mut self.plans.customer),
            ("VENDOR", &mut self.plans.vendor),
        ] {
            override_with(&var, &format!("{}_BRONZE_PRICE", prefix), &mut prices.bronze)?;
            override_with(&var, &format!("{}_SILVER_PRICE", prefix), &mut prices.silver)?;
            override_with(&var, &format!("{}_GOLD_PRICE", prefix), &mut prices.gold)?;
        }
        Ok(())
    }

    /// Validated rate table. Startup must stop if this fails.
    pub fn rate_table(&self) -> Result<CommissionRateTable, CommissionError> {
        CommissionRateTable::new(
            self.commission.level_rates,
            self.commission.property_rate,
            self.commission.company_rate,
        )
    }

    pub fn plan_catalog(&self) -> Result<PlanCatalog, CommissionError> {
        PlanCatalog::new(self.plans.customer, self.plans.vendor)
    }
}

fn override_with<F, T>(var: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = var(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value '{}' for {}: {}", raw, key, e))?;
    }
    Ok(())
}
