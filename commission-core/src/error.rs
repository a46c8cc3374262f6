//! Error types for commission computation and referral graph maintenance.

use thiserror::Error;

use crate::money::Amount;
use crate::plans::{BuyerClass, SubscriptionTier};
use crate::referral::UserId;

/// Validation failures raised before any distribution is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommissionError {
    /// The rate table could over-distribute a base amount. Fatal at startup.
    #[error("invalid commission rate table: {0}")]
    InvalidRateTable(String),

    /// A triggering event carried a zero or negative amount.
    #[error("invalid amount {0}: must be greater than zero")]
    InvalidAmount(Amount),

    #[error("invalid price {price} for {class} {tier} plan: must be greater than zero")]
    InvalidPlanPrice {
        class: BuyerClass,
        tier: SubscriptionTier,
        price: Amount,
    },

    #[error("unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },
}

/// Failures while editing a referral graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferralError {
    #[error("unknown user {0}")]
    UnknownUser(UserId),

    #[error("user {0} already exists")]
    DuplicateUser(UserId),

    #[error("assigning referrer {referrer} to user {user} would create a referral cycle")]
    Cycle { user: UserId, referrer: UserId },
}
