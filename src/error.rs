//! Ledger Errors
//!
//! Domain failures raised by the store and the marketplace service. They
//! travel inside `anyhow::Error`; callers recover them with
//! `err.downcast_ref::<LedgerError>()`.

use commission_core::{Amount, CommissionError, PropertyId, ReferralError, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown user {0}")]
    UnknownUser(UserId),

    #[error("username '{0}' is already taken")]
    DuplicateUsername(String),

    #[error("assigning referrer {referrer} to user {user} would create a referral cycle")]
    ReferralCycle { user: UserId, referrer: UserId },

    #[error("insufficient funds for user {user}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        user: UserId,
        balance: Amount,
        requested: Amount,
    },

    #[error("unknown property {0}")]
    UnknownProperty(PropertyId),

    #[error("user {seller} does not own property {property}")]
    NotPropertyOwner { property: PropertyId, seller: UserId },

    #[error("property {0} has already been sold")]
    PropertyAlreadySold(PropertyId),

    #[error(transparent)]
    Commission(#[from] CommissionError),
}

impl From<ReferralError> for LedgerError {
    fn from(err: ReferralError) -> Self {
        match err {
            ReferralError::UnknownUser(id) => LedgerError::UnknownUser(id),
            ReferralError::DuplicateUser(id) => LedgerError::DuplicateUsername(id.to_string()),
            ReferralError::Cycle { user, referrer } => {
                LedgerError::ReferralCycle { user, referrer }
            }
        }
    }
}
