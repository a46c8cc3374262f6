//! Commission Rate Table
//!
//! Five referral-level rates plus the flat company and property-sale rates.
//! A table is validated once, when it is built, so a configuration that could
//! pay out more than the base amount never reaches the calculator.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::CommissionError;

/// Depth of the referral tree that earns commission.
pub const MAX_LEVELS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommissionRateTable {
    level_rates: [Decimal; MAX_LEVELS],
    property_rate: Decimal,
    company_rate: Decimal,
}

impl CommissionRateTable {
    /// Build a table, rejecting any rate outside `[0, 1]` and any combination
    /// where the level rates plus the company rate exceed 1.
    pub fn new(
        level_rates: [Decimal; MAX_LEVELS],
        property_rate: Decimal,
        company_rate: Decimal,
    ) -> Result<Self, CommissionError> {
        for (idx, rate) in level_rates.iter().enumerate() {
            check_fraction(&format!("level {} rate", idx + 1), *rate)?;
        }
        check_fraction("property commission rate", property_rate)?;
        check_fraction("company commission rate", company_rate)?;

        let table = Self {
            level_rates,
            property_rate,
            company_rate,
        };
        let total = table.total_distributable();
        if total > Decimal::ONE {
            return Err(CommissionError::InvalidRateTable(format!(
                "level rates plus company rate sum to {}, which exceeds 1",
                total
            )));
        }
        Ok(table)
    }

    /// Rate for a 1-based referral level, `None` outside `1..=MAX_LEVELS`.
    pub fn level_rate(&self, level: usize) -> Option<Decimal> {
        level
            .checked_sub(1)
            .and_then(|idx| self.level_rates.get(idx))
            .copied()
    }

    pub fn level_rates(&self) -> &[Decimal; MAX_LEVELS] {
        &self.level_rates
    }

    pub fn property_rate(&self) -> Decimal {
        self.property_rate
    }

    pub fn company_rate(&self) -> Decimal {
        self.company_rate
    }

    /// Fraction of a base amount that can leave the platform's unallocated pool.
    pub fn total_distributable(&self) -> Decimal {
        self.level_rates.iter().copied().sum::<Decimal>() + self.company_rate
    }
}

impl Default for CommissionRateTable {
    /// 15% / 2% / 1% / 1% / 1% across the levels, 20% company, 1% on property sales.
    fn default() -> Self {
        Self {
            level_rates: [
                Decimal::new(15, 2),
                Decimal::new(2, 2),
                Decimal::new(1, 2),
                Decimal::new(1, 2),
                Decimal::new(1, 2),
            ],
            property_rate: Decimal::new(1, 2),
            company_rate: Decimal::new(20, 2),
        }
    }
}

fn check_fraction(name: &str, rate: Decimal) -> Result<(), CommissionError> {
    if rate < Decimal::ZERO {
        return Err(CommissionError::InvalidRateTable(format!(
            "{} is negative ({})",
            name, rate
        )));
    }
    if rate > Decimal::ONE {
        return Err(CommissionError::InvalidRateTable(format!(
            "{} is greater than 1 ({})",
            name, rate
        )));
    }
    Ok(())
}
