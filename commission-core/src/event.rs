//! Commission event records.
//!
//! A `CommissionEvent` is the audit record of one distribution. It is built
//! once, when a purchase or sale is processed, and stored append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calculator::{Distribution, DistributionEntry};
use crate::money::Amount;
use crate::plans::{BuyerClass, SubscriptionTier};
use crate::property::PropertyId;
use crate::referral::UserId;

/// What triggered a distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    SubscriptionPurchase {
        tier: SubscriptionTier,
        class: BuyerClass,
    },
    PropertySale {
        property: PropertyId,
        sale_price: Amount,
    },
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::SubscriptionPurchase { .. } => "subscription_purchase",
            EventKind::PropertySale { .. } => "property_sale",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub purchaser: UserId,
    pub base_amount: Amount,
    pub entries: Vec<DistributionEntry>,
    pub company_share: Amount,
    pub platform_retained: Amount,
    pub created_at: DateTime<Utc>,
}

impl CommissionEvent {
    /// Stamp a computed distribution with a fresh id and the current time.
    pub fn new(kind: EventKind, purchaser: UserId, distribution: Distribution) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            purchaser,
            base_amount: distribution.base_amount,
            entries: distribution.entries,
            company_share: distribution.company_share,
            platform_retained: distribution.platform_retained,
            created_at: Utc::now(),
        }
    }

    pub fn distribution(&self) -> Distribution {
        Distribution {
            base_amount: self.base_amount,
            entries: self.entries.clone(),
            company_share: self.company_share,
            platform_retained: self.platform_retained,
        }
    }

    /// Amount credited to `user` by this event, zero if they are not a beneficiary.
    pub fn credited_to(&self, user: UserId) -> Amount {
        self.entries
            .iter()
            .filter(|e| e.beneficiary == user)
            .map(|e| e.amount)
            .sum()
    }
}
