//! Subscription plan catalog.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CommissionError;
use crate::money::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Bronze,
    Silver,
    Gold,
}

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 3] = [Self::Bronze, Self::Silver, Self::Gold];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Bronze => "bronze",
            SubscriptionTier::Silver => "silver",
            SubscriptionTier::Gold => "gold",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = CommissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bronze" => Ok(SubscriptionTier::Bronze),
            "silver" => Ok(SubscriptionTier::Silver),
            "gold" => Ok(SubscriptionTier::Gold),
            other => Err(CommissionError::UnknownVariant {
                kind: "subscription tier",
                value: other.to_string(),
            }),
        }
    }
}

/// Which side of the marketplace a user buys plans for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyerClass {
    Customer,
    Vendor,
}

impl BuyerClass {
    pub const ALL: [BuyerClass; 2] = [Self::Customer, Self::Vendor];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuyerClass::Customer => "customer",
            BuyerClass::Vendor => "vendor",
        }
    }
}

impl fmt::Display for BuyerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for BuyerClass {
    type Err = CommissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "customer" => Ok(BuyerClass::Customer),
            "vendor" => Ok(BuyerClass::Vendor),
            other => Err(CommissionError::UnknownVariant {
                kind: "buyer class",
                value: other.to_string(),
            }),
        }
    }
}

/// Prices of the three tiers for one buyer class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPrices {
    pub bronze: Amount,
    pub silver: Amount,
    pub gold: Amount,
}

impl TierPrices {
    pub fn price(&self, tier: SubscriptionTier) -> Amount {
        match tier {
            SubscriptionTier::Bronze => self.bronze,
            SubscriptionTier::Silver => self.silver,
            SubscriptionTier::Gold => self.gold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanCatalog {
    customer: TierPrices,
    vendor: TierPrices,
}

impl PlanCatalog {
    pub fn new(customer: TierPrices, vendor: TierPrices) -> Result<Self, CommissionError> {
        let catalog = Self { customer, vendor };
        for (class, tier, price) in catalog.iter() {
            if price <= 0 {
                return Err(CommissionError::InvalidPlanPrice { class, tier, price });
            }
        }
        Ok(catalog)
    }

    pub fn customer(&self) -> TierPrices {
        self.customer
    }

    pub fn vendor(&self) -> TierPrices {
        self.vendor
    }

    pub fn price(&self, class: BuyerClass, tier: SubscriptionTier) -> Amount {
        match class {
            BuyerClass::Customer => self.customer.price(tier),
            BuyerClass::Vendor => self.vendor.price(tier),
        }
    }

    /// Every (class, tier, price) triple, customers first, cheapest tier first.
    pub fn iter(&self) -> impl Iterator<Item = (BuyerClass, SubscriptionTier, Amount)> + '_ {
        BuyerClass::ALL.into_iter().flat_map(move |class| {
            SubscriptionTier::ALL
                .into_iter()
                .map(move |tier| (class, tier, self.price(class, tier)))
        })
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            customer: TierPrices {
                bronze: 499,
                silver: 799,
                gold: 999,
            },
            vendor: TierPrices {
                bronze: 999,
                silver: 1999,
                gold: 2999,
            },
        }
    }
}
