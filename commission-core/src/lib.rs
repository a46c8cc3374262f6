//! Commission Core
//!
//! Pure building blocks of the WeWorkLocal referral economy:
//! - Validated commission rate table (five referral levels + company cut)
//! - Subscription plan catalog (three tiers for customers and vendors)
//! - Bounded referrer-chain walk over any `ReferrerLookup`
//! - Deterministic commission distribution with banker's rounding
//! - Immutable commission event records
//! - Property ids and listing status
//!
//! Nothing in this crate performs I/O. Persisting a distribution is the
//! caller's job.

pub mod calculator;
pub mod error;
pub mod event;
pub mod money;
pub mod plans;
pub mod property;
pub mod rates;
pub mod referral;

pub use calculator::{CommissionCalculator, Distribution, DistributionEntry};
pub use error::{CommissionError, ReferralError};
pub use event::{CommissionEvent, EventKind};
pub use money::Amount;
pub use plans::{BuyerClass, PlanCatalog, SubscriptionTier, TierPrices};
pub use property::{PropertyId, PropertyStatus};
pub use rates::{CommissionRateTable, MAX_LEVELS};
pub use referral::{creates_cycle, referrer_chain, ReferralGraph, ReferrerLookup, UserId};
