//! Ledger Store Interface
//!
//! Persistence collaborator for the commission engine: users and their
//! referrer edges, purchase records, commission events and wallet
//! transactions. Commission events and wallet transactions are append-only.

pub mod sqlite;

pub use sqlite::SqliteLedgerStore;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use commission_core::{Amount, BuyerClass, CommissionEvent, PropertyId, PropertyStatus, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub class: BuyerClass,
    /// Weak back-reference to whoever referred this user
    pub referrer: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// A property on the marketplace. Listed until its owner reports the sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub owner: UserId,
    pub title: String,
    pub listing_price: Amount,
    pub status: PropertyStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    CommissionCredit,
    Withdrawal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::CommissionCredit => "commission_credit",
            TransactionKind::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "commission_credit" => Ok(TransactionKind::CommissionCredit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            other => Err(anyhow!("Unknown wallet transaction kind '{}'", other)),
        }
    }
}

/// One wallet movement. Credits are positive, withdrawals negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user: UserId,
    pub kind: TransactionKind,
    pub amount: Amount,
    /// Commission event that produced a credit
    pub event_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A commission entry seen from the beneficiary's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionEarning {
    pub event_id: Uuid,
    pub level: u8,
    pub amount: Amount,
    /// User whose purchase or sale triggered the event
    pub source: UserId,
    pub created_at: DateTime<Utc>,
}

/// Storage interface for the marketplace ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create a user. The referrer, if any, must already exist.
    async fn register_user(
        &self,
        username: &str,
        class: BuyerClass,
        referrer: Option<UserId>,
    ) -> Result<User>;

    async fn user(&self, id: UserId) -> Result<Option<User>>;

    /// Re-point a user's referrer, refusing anything that closes a loop.
    async fn assign_referrer(&self, user: UserId, referrer: UserId) -> Result<()>;

    /// The user's ancestors, nearest first, at most `MAX_LEVELS` long.
    async fn referrer_chain(&self, user: UserId) -> Result<Vec<UserId>>;

    async fn direct_referrals(&self, user: UserId) -> Result<Vec<User>>;

    async fn list_property(
        &self,
        owner: UserId,
        title: &str,
        listing_price: Amount,
    ) -> Result<Property>;

    async fn property(&self, id: PropertyId) -> Result<Option<Property>>;

    async fn properties_for_owner(&self, owner: UserId) -> Result<Vec<Property>>;

    /// Persist the purchase record, the event, its entries and the wallet
    /// credits as one unit. Nothing is written if any part fails.
    ///
    /// A property sale must come from the owner of a listed property, which
    /// is marked sold in the same transaction.
    async fn record_commission(&self, event: &CommissionEvent) -> Result<()>;

    async fn events_for_purchaser(&self, user: UserId) -> Result<Vec<CommissionEvent>>;

    async fn commission_earnings(&self, user: UserId) -> Result<Vec<CommissionEarning>>;

    async fn wallet_transactions(&self, user: UserId) -> Result<Vec<WalletTransaction>>;

    async fn balance(&self, user: UserId) -> Result<Amount>;

    /// Debit the wallet if the balance covers `amount`.
    async fn withdraw(
        &self,
        user: UserId,
        amount: Amount,
        description: &str,
    ) -> Result<WalletTransaction>;
}
