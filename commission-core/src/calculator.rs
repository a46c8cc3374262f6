//! Commission Calculator
//!
//! Splits a base amount between up to `MAX_LEVELS` referrers and the platform.
//! Pure: the same amount, chain and rate table always give the same result.

use serde::{Deserialize, Serialize};

use crate::error::CommissionError;
use crate::money::{apply_rate, Amount};
use crate::rates::{CommissionRateTable, MAX_LEVELS};
use crate::referral::UserId;

/// One referrer's share of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionEntry {
    pub beneficiary: UserId,
    /// 1 for the purchaser's direct referrer.
    pub level: u8,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub base_amount: Amount,
    /// Ordered by level.
    pub entries: Vec<DistributionEntry>,
    /// Company cut, carved out of `platform_retained`.
    pub company_share: Amount,
    /// Everything not paid to a referrer, company share included.
    pub platform_retained: Amount,
}

impl Distribution {
    /// Total paid out to referrers.
    pub fn distributed(&self) -> Amount {
        self.entries.iter().map(|e| e.amount).sum()
    }

    /// Retained amount left after the company share: missing levels and rounding residue.
    pub fn unallocated(&self) -> Amount {
        self.platform_retained - self.company_share
    }
}

#[derive(Debug, Clone)]
pub struct CommissionCalculator {
    rates: CommissionRateTable,
}

impl CommissionCalculator {
    pub fn new(rates: CommissionRateTable) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> &CommissionRateTable {
        &self.rates
    }

    /// Distribute `base_amount` over `chain` (nearest referrer first).
    ///
    /// Entries beyond `MAX_LEVELS` are ignored. Each level amount is rounded
    /// half to even and capped at what is still undistributed, so the
    /// retained amount never goes negative.
    pub fn distribute(
        &self,
        base_amount: Amount,
        chain: &[UserId],
    ) -> Result<Distribution, CommissionError> {
        if base_amount <= 0 {
            return Err(CommissionError::InvalidAmount(base_amount));
        }

        let mut remaining = base_amount;
        let mut entries = Vec::with_capacity(chain.len().min(MAX_LEVELS));
        for (idx, beneficiary) in chain.iter().take(MAX_LEVELS).enumerate() {
            let level = idx + 1;
            let rate = self.rates.level_rate(level).unwrap_or_default();
            let amount = apply_rate(base_amount, rate)
                .ok_or(CommissionError::InvalidAmount(base_amount))?
                .min(remaining);
            remaining -= amount;
            entries.push(DistributionEntry {
                beneficiary: *beneficiary,
                level: level as u8,
                amount,
            });
        }

        let company_share = apply_rate(base_amount, self.rates.company_rate())
            .ok_or(CommissionError::InvalidAmount(base_amount))?
            .min(remaining);

        Ok(Distribution {
            base_amount,
            entries,
            company_share,
            platform_retained: remaining,
        })
    }

    /// Commission base for a property sale: the property rate applied to the sale price.
    pub fn property_sale_base(&self, sale_price: Amount) -> Result<Amount, CommissionError> {
        if sale_price <= 0 {
            return Err(CommissionError::InvalidAmount(sale_price));
        }
        match apply_rate(sale_price, self.rates.property_rate()) {
            Some(base) if base > 0 => Ok(base),
            _ => Err(CommissionError::InvalidAmount(sale_price)),
        }
    }
}

impl Default for CommissionCalculator {
    fn default() -> Self {
        Self::new(CommissionRateTable::default())
    }
}
