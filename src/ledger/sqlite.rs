//! SQLite Ledger Store
//!
//! Every call opens its own connection on the blocking pool. Multi-row writes
//! run in one transaction, so a commission event and its wallet credits land
//! together or not at all.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use commission_core::{
    creates_cycle, referrer_chain, Amount, BuyerClass, CommissionError, CommissionEvent,
    DistributionEntry, EventKind, PropertyId, PropertyStatus, ReferrerLookup, UserId,
};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CommissionEarning, LedgerStore, Property, TransactionKind, User, WalletTransaction};
use crate::error::LedgerError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    buyer_class TEXT NOT NULL,
    referrer_id INTEGER REFERENCES users(id),
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_users_referrer ON users(referrer_id);

CREATE TABLE IF NOT EXISTS properties (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL REFERENCES users(id),
    title TEXT NOT NULL,
    listing_price INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_properties_owner ON properties(owner_id);

CREATE TABLE IF NOT EXISTS commission_events (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    detail TEXT NOT NULL,
    purchaser_id INTEGER NOT NULL REFERENCES users(id),
    base_amount INTEGER NOT NULL,
    company_share INTEGER NOT NULL,
    platform_retained INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_purchaser ON commission_events(purchaser_id);

CREATE TABLE IF NOT EXISTS commission_entries (
    event_id TEXT NOT NULL REFERENCES commission_events(id),
    level INTEGER NOT NULL,
    beneficiary_id INTEGER NOT NULL REFERENCES users(id),
    amount INTEGER NOT NULL,
    PRIMARY KEY (event_id, level)
);
CREATE INDEX IF NOT EXISTS idx_entries_beneficiary ON commission_entries(beneficiary_id);

CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    tier TEXT NOT NULL,
    buyer_class TEXT NOT NULL,
    price INTEGER NOT NULL,
    event_id TEXT NOT NULL UNIQUE REFERENCES commission_events(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS property_sales (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    property_id INTEGER NOT NULL UNIQUE REFERENCES properties(id),
    seller_id INTEGER NOT NULL REFERENCES users(id),
    sale_price INTEGER NOT NULL,
    commission_base INTEGER NOT NULL,
    event_id TEXT NOT NULL UNIQUE REFERENCES commission_events(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS wallet_transactions (
    id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id),
    kind TEXT NOT NULL,
    amount INTEGER NOT NULL,
    event_id TEXT REFERENCES commission_events(id),
    description TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_wallet_user ON wallet_transactions(user_id);

CREATE TRIGGER IF NOT EXISTS properties_sold_is_final BEFORE UPDATE ON properties
WHEN OLD.status = 'sold'
BEGIN SELECT RAISE(ABORT, 'sold properties cannot change'); END;
CREATE TRIGGER IF NOT EXISTS commission_events_no_update BEFORE UPDATE ON commission_events
BEGIN SELECT RAISE(ABORT, 'commission events are append-only'); END;
CREATE TRIGGER IF NOT EXISTS commission_events_no_delete BEFORE DELETE ON commission_events
BEGIN SELECT RAISE(ABORT, 'commission events are append-only'); END;
CREATE TRIGGER IF NOT EXISTS commission_entries_no_update BEFORE UPDATE ON commission_entries
BEGIN SELECT RAISE(ABORT, 'commission entries are append-only'); END;
CREATE TRIGGER IF NOT EXISTS commission_entries_no_delete BEFORE DELETE ON commission_entries
BEGIN SELECT RAISE(ABORT, 'commission entries are append-only'); END;
CREATE TRIGGER IF NOT EXISTS wallet_transactions_no_update BEFORE UPDATE ON wallet_transactions
BEGIN SELECT RAISE(ABORT, 'wallet transactions are append-only'); END;
CREATE TRIGGER IF NOT EXISTS wallet_transactions_no_delete BEFORE DELETE ON wallet_transactions
BEGIN SELECT RAISE(ABORT, 'wallet transactions are append-only'); END;
"#;

const USER_COLUMNS: &str = "id, username, buyer_class, referrer_id, created_at";
const PROPERTY_COLUMNS: &str = "id, owner_id, title, listing_price, status, created_at";

type UserRow = (i64, String, String, Option<i64>, String);
type PropertyRow = (i64, i64, String, i64, String, String);
type EventRow = (String, String, i64, i64, i64, i64, String);
type WalletRow = (String, i64, String, i64, Option<String>, String, String);

#[derive(Clone)]
pub struct SqliteLedgerStore {
    db_path: PathBuf,
}

impl SqliteLedgerStore {
    /// Open (or create) the database and make sure the schema exists.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let path_clone = path.clone();

        task::spawn_blocking(move || {
            let conn = open(&path_clone)?;
            conn.execute_batch(SCHEMA)
                .context("Failed to create ledger schema")?;
            Ok::<_, anyhow::Error>(())
        })
        .await??;

        info!("Ledger store ready at {}", path.display());
        Ok(Self { db_path: path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.db_path.clone();
        task::spawn_blocking(move || {
            let mut conn = open(&path)?;
            f(&mut conn)
        })
        .await?
    }
}

fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open ledger database {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

/// Referrer lookups straight from the `users` table.
struct SqlReferrers<'a>(&'a Connection);

impl ReferrerLookup for SqlReferrers<'_> {
    type Error = rusqlite::Error;

    fn get_referrer(&self, user: UserId) -> rusqlite::Result<Option<UserId>> {
        let referrer: Option<Option<i64>> = self
            .0
            .query_row(
                "SELECT referrer_id FROM users WHERE id = ?1",
                params![user.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(referrer.flatten().map(UserId))
    }
}

fn timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Bad timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

fn user_exists(conn: &Connection, id: UserId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM users WHERE id = ?1", params![id.0], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn ensure_user(conn: &Connection, id: UserId) -> Result<()> {
    if user_exists(conn, id)? {
        Ok(())
    } else {
        Err(LedgerError::UnknownUser(id).into())
    }
}

fn read_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn user_from_row(row: UserRow) -> Result<User> {
    let (id, username, class, referrer, created_at) = row;
    Ok(User {
        id: UserId(id),
        username,
        class: class.parse::<BuyerClass>()?,
        referrer: referrer.map(UserId),
        created_at: timestamp(&created_at)?,
    })
}

fn read_property_row(row: &Row<'_>) -> rusqlite::Result<PropertyRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn property_from_row(row: PropertyRow) -> Result<Property> {
    let (id, owner, title, listing_price, status, created_at) = row;
    Ok(Property {
        id: PropertyId(id),
        owner: UserId(owner),
        title,
        listing_price,
        status: status.parse::<PropertyStatus>()?,
        created_at: timestamp(&created_at)?,
    })
}

fn load_property(conn: &Connection, id: PropertyId) -> Result<Option<Property>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM properties WHERE id = ?1", PROPERTY_COLUMNS),
            params![id.0],
            read_property_row,
        )
        .optional()?;
    row.map(property_from_row).transpose()
}

/// Only the owner may sell, and only while the property is listed.
fn mark_sold(conn: &Connection, property: PropertyId, seller: UserId) -> Result<()> {
    let found = load_property(conn, property)?.ok_or(LedgerError::UnknownProperty(property))?;
    if found.owner != seller {
        return Err(LedgerError::NotPropertyOwner { property, seller }.into());
    }
    if !found.status.is_listed() {
        return Err(LedgerError::PropertyAlreadySold(property).into());
    }
    conn.execute(
        "UPDATE properties SET status = ?1 WHERE id = ?2",
        params![PropertyStatus::Sold.as_str(), property.0],
    )?;
    Ok(())
}

fn balance_of(conn: &Connection, user: UserId) -> Result<Amount> {
    let balance: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM wallet_transactions WHERE user_id = ?1",
        params![user.0],
        |row| row.get(0),
    )?;
    Ok(balance)
}

fn insert_wallet_tx(conn: &Connection, record: &WalletTransaction) -> Result<()> {
    conn.execute(
        "INSERT INTO wallet_transactions
         (id, user_id, kind, amount, event_id, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.id.to_string(),
            record.user.0,
            record.kind.as_str(),
            record.amount,
            record.event_id.map(|id| id.to_string()),
            &record.description,
            record.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn load_entries(conn: &Connection, event_id: &str) -> Result<Vec<DistributionEntry>> {
    let mut stmt = conn.prepare(
        "SELECT level, beneficiary_id, amount FROM commission_entries
         WHERE event_id = ?1 ORDER BY level",
    )?;
    let rows = stmt
        .query_map(params![event_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut entries = Vec::with_capacity(rows.len());
    for (level, beneficiary, amount) in rows {
        entries.push(DistributionEntry {
            beneficiary: UserId(beneficiary),
            level: u8::try_from(level).context("Commission level out of range")?,
            amount,
        });
    }
    Ok(entries)
}

fn event_from_row(conn: &Connection, row: EventRow) -> Result<CommissionEvent> {
    let (id, detail, purchaser, base_amount, company_share, platform_retained, created_at) = row;
    let kind: EventKind = serde_json::from_str(&detail)
        .with_context(|| format!("Bad detail for commission event {}", id))?;
    Ok(CommissionEvent {
        id: Uuid::parse_str(&id)?,
        kind,
        purchaser: UserId(purchaser),
        base_amount,
        entries: load_entries(conn, &id)?,
        company_share,
        platform_retained,
        created_at: timestamp(&created_at)?,
    })
}

fn wallet_from_row(row: WalletRow) -> Result<WalletTransaction> {
    let (id, user, kind, amount, event_id, description, created_at) = row;
    Ok(WalletTransaction {
        id: Uuid::parse_str(&id)?,
        user: UserId(user),
        kind: kind.parse()?,
        amount,
        event_id: event_id.as_deref().map(Uuid::parse_str).transpose()?,
        description,
        created_at: timestamp(&created_at)?,
    })
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn register_user(
        &self,
        username: &str,
        class: BuyerClass,
        referrer: Option<UserId>,
    ) -> Result<User> {
        let username = username.trim().to_string();
        if username.is_empty() {
            anyhow::bail!("Username must not be empty");
        }

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if let Some(referrer) = referrer {
                ensure_user(&tx, referrer)?;
            }
            let taken: Option<i64> = tx
                .query_row(
                    "SELECT id FROM users WHERE username = ?1",
                    params![&username],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                return Err(LedgerError::DuplicateUsername(username).into());
            }

            let now = Utc::now();
            tx.execute(
                "INSERT INTO users (username, buyer_class, referrer_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    &username,
                    class.as_str(),
                    referrer.map(|r| r.0),
                    now.to_rfc3339()
                ],
            )?;
            let id = UserId(tx.last_insert_rowid());
            tx.commit()?;

            Ok(User {
                id,
                username,
                class,
                referrer,
                created_at: now,
            })
        })
        .await
    }

    async fn user(&self, id: UserId) -> Result<Option<User>> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                    params![id.0],
                    read_user_row,
                )
                .optional()?;
            row.map(user_from_row).transpose()
        })
        .await
    }

    async fn assign_referrer(&self, user: UserId, referrer: UserId) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            ensure_user(&tx, user)?;
            ensure_user(&tx, referrer)?;
            if creates_cycle(&SqlReferrers(&tx), user, referrer)? {
                return Err(LedgerError::ReferralCycle { user, referrer }.into());
            }
            tx.execute(
                "UPDATE users SET referrer_id = ?1 WHERE id = ?2",
                params![referrer.0, user.0],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn referrer_chain(&self, user: UserId) -> Result<Vec<UserId>> {
        self.with_conn(move |conn| Ok(referrer_chain(&SqlReferrers(&*conn), user)?))
            .await
    }

    async fn direct_referrals(&self, user: UserId) -> Result<Vec<User>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users WHERE referrer_id = ?1 ORDER BY id",
                USER_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![user.0], read_user_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut users = Vec::with_capacity(rows.len());
            for row in rows {
                users.push(user_from_row(row)?);
            }
            Ok(users)
        })
        .await
    }

    async fn list_property(
        &self,
        owner: UserId,
        title: &str,
        listing_price: Amount,
    ) -> Result<Property> {
        let title = title.trim().to_string();
        if title.is_empty() {
            anyhow::bail!("Property title must not be empty");
        }
        if listing_price <= 0 {
            return Err(
                LedgerError::Commission(CommissionError::InvalidAmount(listing_price)).into(),
            );
        }

        self.with_conn(move |conn| {
            ensure_user(conn, owner)?;
            let now = Utc::now();
            conn.execute(
                "INSERT INTO properties (owner_id, title, listing_price, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    owner.0,
                    &title,
                    listing_price,
                    PropertyStatus::Listed.as_str(),
                    now.to_rfc3339()
                ],
            )?;

            Ok(Property {
                id: PropertyId(conn.last_insert_rowid()),
                owner,
                title,
                listing_price,
                status: PropertyStatus::Listed,
                created_at: now,
            })
        })
        .await
    }

    async fn property(&self, id: PropertyId) -> Result<Option<Property>> {
        self.with_conn(move |conn| load_property(conn, id)).await
    }

    async fn properties_for_owner(&self, owner: UserId) -> Result<Vec<Property>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM properties WHERE owner_id = ?1 ORDER BY id",
                PROPERTY_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![owner.0], read_property_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut properties = Vec::with_capacity(rows.len());
            for row in rows {
                properties.push(property_from_row(row)?);
            }
            Ok(properties)
        })
        .await
    }

    async fn record_commission(&self, event: &CommissionEvent) -> Result<()> {
        let event = event.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            ensure_user(&tx, event.purchaser)?;
            for entry in &event.entries {
                ensure_user(&tx, entry.beneficiary)?;
            }

            let event_id = event.id.to_string();
            let created_at = event.created_at.to_rfc3339();
            tx.execute(
                "INSERT INTO commission_events
                 (id, kind, detail, purchaser_id, base_amount,
                  company_share, platform_retained, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    &event_id,
                    event.kind.label(),
                    serde_json::to_string(&event.kind)?,
                    event.purchaser.0,
                    event.base_amount,
                    event.company_share,
                    event.platform_retained,
                    &created_at,
                ],
            )?;

            match &event.kind {
                EventKind::SubscriptionPurchase { tier, class } => {
                    tx.execute(
                        "INSERT INTO subscriptions
                         (user_id, tier, buyer_class, price, event_id, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            event.purchaser.0,
                            tier.as_str(),
                            class.as_str(),
                            event.base_amount,
                            &event_id,
                            &created_at,
                        ],
                    )?;
                }
                EventKind::PropertySale {
                    property,
                    sale_price,
                } => {
                    mark_sold(&tx, *property, event.purchaser)?;
                    tx.execute(
                        "INSERT INTO property_sales
                         (property_id, seller_id, sale_price, commission_base, event_id, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            property.0,
                            event.purchaser.0,
                            sale_price,
                            event.base_amount,
                            &event_id,
                            &created_at,
                        ],
                    )?;
                }
            }

            for entry in &event.entries {
                tx.execute(
                    "INSERT INTO commission_entries (event_id, level, beneficiary_id, amount)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![&event_id, i64::from(entry.level), entry.beneficiary.0, entry.amount],
                )?;
                // Zero-amount levels stay on the event but do not touch the wallet.
                if entry.amount > 0 {
                    insert_wallet_tx(
                        &tx,
                        &WalletTransaction {
                            id: Uuid::new_v4(),
                            user: entry.beneficiary,
                            kind: TransactionKind::CommissionCredit,
                            amount: entry.amount,
                            event_id: Some(event.id),
                            description: format!(
                                "Level {} commission on {} by user {}",
                                entry.level,
                                event.kind.label(),
                                event.purchaser
                            ),
                            created_at: event.created_at,
                        },
                    )?;
                }
            }

            tx.commit()?;
            debug!(
                "Recorded commission event {} ({} entries)",
                event_id,
                event.entries.len()
            );
            Ok(())
        })
        .await
    }

    async fn events_for_purchaser(&self, user: UserId) -> Result<Vec<CommissionEvent>> {
        self.with_conn(move |conn| {
            let rows: Vec<EventRow> = {
                let mut stmt = conn.prepare(
                    "SELECT id, detail, purchaser_id, base_amount,
                            company_share, platform_retained, created_at
                     FROM commission_events WHERE purchaser_id = ?1
                     ORDER BY created_at, rowid",
                )?;
                let rows = stmt
                    .query_map(params![user.0], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };

            let mut events = Vec::with_capacity(rows.len());
            for row in rows {
                events.push(event_from_row(conn, row)?);
            }
            Ok(events)
        })
        .await
    }

    async fn commission_earnings(&self, user: UserId) -> Result<Vec<CommissionEarning>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT e.event_id, e.level, e.amount, ev.purchaser_id, ev.created_at
                 FROM commission_entries e
                 JOIN commission_events ev ON ev.id = e.event_id
                 WHERE e.beneficiary_id = ?1
                 ORDER BY ev.created_at, ev.rowid",
            )?;
            let rows = stmt
                .query_map(params![user.0], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut earnings = Vec::with_capacity(rows.len());
            for (event_id, level, amount, source, created_at) in rows {
                earnings.push(CommissionEarning {
                    event_id: Uuid::parse_str(&event_id)?,
                    level: u8::try_from(level).context("Commission level out of range")?,
                    amount,
                    source: UserId(source),
                    created_at: timestamp(&created_at)?,
                });
            }
            Ok(earnings)
        })
        .await
    }

    async fn wallet_transactions(&self, user: UserId) -> Result<Vec<WalletTransaction>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, kind, amount, event_id, description, created_at
                 FROM wallet_transactions WHERE user_id = ?1
                 ORDER BY created_at, rowid",
            )?;
            let rows = stmt
                .query_map(params![user.0], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<WalletRow>>>()?;

            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                records.push(wallet_from_row(row)?);
            }
            Ok(records)
        })
        .await
    }

    async fn balance(&self, user: UserId) -> Result<Amount> {
        self.with_conn(move |conn| balance_of(conn, user)).await
    }

    async fn withdraw(
        &self,
        user: UserId,
        amount: Amount,
        description: &str,
    ) -> Result<WalletTransaction> {
        if amount <= 0 {
            return Err(LedgerError::Commission(CommissionError::InvalidAmount(amount)).into());
        }
        let description = description.to_string();

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            ensure_user(&tx, user)?;
            let balance = balance_of(&tx, user)?;
            if balance < amount {
                return Err(LedgerError::InsufficientFunds {
                    user,
                    balance,
                    requested: amount,
                }
                .into());
            }

            let record = WalletTransaction {
                id: Uuid::new_v4(),
                user,
                kind: TransactionKind::Withdrawal,
                amount: -amount,
                event_id: None,
                description,
                created_at: Utc::now(),
            };
            insert_wallet_tx(&tx, &record)?;
            tx.commit()?;
            Ok(record)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commission_core::{CommissionCalculator, SubscriptionTier};
    use tempfile::NamedTempFile;

    async fn store() -> Result<(NamedTempFile, SqliteLedgerStore)> {
        let temp_file = NamedTempFile::new()?;
        let store = SqliteLedgerStore::new(temp_file.path()).await?;
        Ok((temp_file, store))
    }

    /// root <- u1 <- u2 <- ... <- u{depth}; returns ids root first.
    async fn line(store: &SqliteLedgerStore, depth: usize) -> Result<Vec<UserId>> {
        let mut ids = Vec::new();
        let mut referrer = None;
        for i in 0..=depth {
            let user = store
                .register_user(&format!("user{}", i), BuyerClass::Customer, referrer)
                .await?;
            referrer = Some(user.id);
            ids.push(user.id);
        }
        Ok(ids)
    }

    fn subscription_event(purchaser: UserId, chain: &[UserId], base: Amount) -> CommissionEvent {
        let dist = CommissionCalculator::default().distribute(base, chain).unwrap();
        CommissionEvent::new(
            EventKind::SubscriptionPurchase {
                tier: SubscriptionTier::Gold,
                class: BuyerClass::Customer,
            },
            purchaser,
            dist,
        )
    }

    fn sale_event(
        seller: UserId,
        chain: &[UserId],
        property: PropertyId,
        sale_price: Amount,
    ) -> CommissionEvent {
        let calc = CommissionCalculator::default();
        let base = calc.property_sale_base(sale_price).unwrap();
        let dist = calc.distribute(base, chain).unwrap();
        CommissionEvent::new(
            EventKind::PropertySale {
                property,
                sale_price,
            },
            seller,
            dist,
        )
    }

    fn ledger_error(err: &anyhow::Error) -> &LedgerError {
        err.downcast_ref::<LedgerError>().expect("Should be a ledger error")
    }

    #[tokio::test]
    async fn test_register_and_chain() -> Result<()> {
        let (_file, store) = store().await?;
        let ids = line(&store, 7).await?;

        let last = *ids.last().unwrap();
        let chain = store.referrer_chain(last).await?;
        assert_eq!(chain.len(), 5);
        assert_eq!(chain[0], ids[6]);
        assert_eq!(chain[4], ids[2]);

        let user = store.user(ids[1]).await?.expect("Should exist");
        assert_eq!(user.username, "user1");
        assert_eq!(user.referrer, Some(ids[0]));
        assert!(store.user(UserId(999)).await?.is_none());

        let children = store.direct_referrals(ids[0]).await?;
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, ids[1]);
        Ok(())
    }

    #[tokio::test]
    async fn test_register_validation() -> Result<()> {
        let (_file, store) = store().await?;
        store.register_user("alice", BuyerClass::Vendor, None).await?;

        let err = store
            .register_user("alice", BuyerClass::Customer, None)
            .await
            .unwrap_err();
        assert!(matches!(
            ledger_error(&err),
            LedgerError::DuplicateUsername(name) if name == "alice"
        ));

        let err = store
            .register_user("bob", BuyerClass::Customer, Some(UserId(42)))
            .await
            .unwrap_err();
        assert!(matches!(ledger_error(&err), LedgerError::UnknownUser(UserId(42))));
        Ok(())
    }

    #[tokio::test]
    async fn test_assign_referrer_rejects_cycle() -> Result<()> {
        let (_file, store) = store().await?;
        let ids = line(&store, 2).await?;

        let err = store.assign_referrer(ids[0], ids[2]).await.unwrap_err();
        assert!(matches!(ledger_error(&err), LedgerError::ReferralCycle { .. }));
        let err = store.assign_referrer(ids[1], ids[1]).await.unwrap_err();
        assert!(matches!(ledger_error(&err), LedgerError::ReferralCycle { .. }));

        let outsider = store.register_user("outsider", BuyerClass::Vendor, None).await?;
        store.assign_referrer(ids[0], outsider.id).await?;
        assert_eq!(
            store.referrer_chain(ids[2]).await?,
            vec![ids[1], ids[0], outsider.id]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_record_commission_credits_wallets() -> Result<()> {
        let (_file, store) = store().await?;
        let ids = line(&store, 2).await?;
        let buyer = ids[2];
        let chain = store.referrer_chain(buyer).await?;

        let event = subscription_event(buyer, &chain, 1000);
        store.record_commission(&event).await?;

        assert_eq!(store.balance(ids[1]).await?, 150);
        assert_eq!(store.balance(ids[0]).await?, 20);
        assert_eq!(store.balance(buyer).await?, 0);

        let events = store.events_for_purchaser(buyer).await?;
        assert_eq!(events, vec![event.clone()]);

        let earnings = store.commission_earnings(ids[0]).await?;
        assert_eq!(earnings.len(), 1);
        assert_eq!(earnings[0].level, 2);
        assert_eq!(earnings[0].source, buyer);
        assert_eq!(earnings[0].event_id, event.id);

        let txs = store.wallet_transactions(ids[1]).await?;
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].kind, TransactionKind::CommissionCredit);
        assert_eq!(txs[0].event_id, Some(event.id));

        // Same event twice is refused and leaves balances alone.
        assert!(store.record_commission(&event).await.is_err());
        assert_eq!(store.balance(ids[1]).await?, 150);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_record_writes_nothing() -> Result<()> {
        let (_file, store) = store().await?;
        let ids = line(&store, 1).await?;

        // Second beneficiary does not exist.
        let event = subscription_event(ids[1], &[ids[0], UserId(77)], 1000);
        let err = store.record_commission(&event).await.unwrap_err();
        assert!(matches!(ledger_error(&err), LedgerError::UnknownUser(UserId(77))));

        assert_eq!(store.balance(ids[0]).await?, 0);
        assert!(store.events_for_purchaser(ids[1]).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_commission_rows_are_append_only() -> Result<()> {
        let (file, store) = store().await?;
        let ids = line(&store, 1).await?;
        let event = subscription_event(ids[1], &[ids[0]], 999);
        store.record_commission(&event).await?;

        let conn = open(file.path())?;
        assert!(conn
            .execute("UPDATE commission_events SET base_amount = 1", [])
            .is_err());
        assert!(conn.execute("DELETE FROM commission_entries", []).is_err());
        assert!(conn.execute("DELETE FROM wallet_transactions", []).is_err());
        assert_eq!(store.balance(ids[0]).await?, 150);
        Ok(())
    }

    #[tokio::test]
    async fn test_withdraw() -> Result<()> {
        let (_file, store) = store().await?;
        let ids = line(&store, 1).await?;
        store
            .record_commission(&subscription_event(ids[1], &[ids[0]], 1000))
            .await?;

        let err = store.withdraw(ids[0], 151, "payout").await.unwrap_err();
        assert!(matches!(
            ledger_error(&err),
            LedgerError::InsufficientFunds { balance: 150, requested: 151, .. }
        ));
        let err = store.withdraw(ids[0], 0, "payout").await.unwrap_err();
        assert!(matches!(
            ledger_error(&err),
            LedgerError::Commission(CommissionError::InvalidAmount(0))
        ));

        let debit = store.withdraw(ids[0], 100, "payout").await?;
        assert_eq!(debit.amount, -100);
        assert_eq!(debit.kind, TransactionKind::Withdrawal);
        assert_eq!(store.balance(ids[0]).await?, 50);
        assert_eq!(store.wallet_transactions(ids[0]).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_property_sells_once() -> Result<()> {
        let (_file, store) = store().await?;
        let ids = line(&store, 1).await?;
        let seller = ids[1];

        let listing = store.list_property(seller, "  Plot 7, Ring Road ", 2_600_000).await?;
        assert_eq!(listing.title, "Plot 7, Ring Road");
        assert_eq!(listing.status, PropertyStatus::Listed);
        assert_eq!(store.properties_for_owner(seller).await?, vec![listing.clone()]);
        assert!(store.properties_for_owner(ids[0]).await?.is_empty());

        store
            .record_commission(&sale_event(seller, &[ids[0]], listing.id, 2_500_000))
            .await?;
        assert_eq!(store.balance(ids[0]).await?, 3750);
        let sold = store.property(listing.id).await?.expect("Should exist");
        assert_eq!(sold.status, PropertyStatus::Sold);

        let again = sale_event(seller, &[ids[0]], listing.id, 2_500_000);
        let err = store.record_commission(&again).await.unwrap_err();
        assert!(matches!(
            ledger_error(&err),
            LedgerError::PropertyAlreadySold(id) if *id == listing.id
        ));
        assert_eq!(store.balance(ids[0]).await?, 3750);
        assert_eq!(store.events_for_purchaser(seller).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_sale_requires_owner_and_known_property() -> Result<()> {
        let (_file, store) = store().await?;
        let ids = line(&store, 2).await?;
        let listing = store.list_property(ids[1], "Shop 3", 900_000).await?;

        let err = store
            .record_commission(&sale_event(ids[2], &ids[..2], listing.id, 900_000))
            .await
            .unwrap_err();
        assert!(matches!(
            ledger_error(&err),
            LedgerError::NotPropertyOwner { seller, .. } if *seller == ids[2]
        ));

        let err = store
            .record_commission(&sale_event(ids[1], &[ids[0]], PropertyId(404), 900_000))
            .await
            .unwrap_err();
        assert!(matches!(
            ledger_error(&err),
            LedgerError::UnknownProperty(PropertyId(404))
        ));

        let untouched = store.property(listing.id).await?.expect("Should exist");
        assert_eq!(untouched.status, PropertyStatus::Listed);
        assert_eq!(store.balance(ids[0]).await?, 0);
        assert_eq!(store.balance(ids[1]).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_property_validation() -> Result<()> {
        let (_file, store) = store().await?;
        let owner = store.register_user("owner", BuyerClass::Vendor, None).await?;

        let err = store.list_property(UserId(55), "Villa", 1000).await.unwrap_err();
        assert!(matches!(ledger_error(&err), LedgerError::UnknownUser(UserId(55))));

        let err = store.list_property(owner.id, "Villa", 0).await.unwrap_err();
        assert!(matches!(
            ledger_error(&err),
            LedgerError::Commission(CommissionError::InvalidAmount(0))
        ));

        assert!(store.list_property(owner.id, "   ", 1000).await.is_err());
        assert!(store.properties_for_owner(owner.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_withdrawals_never_overdraw() -> Result<()> {
        let (_file, store) = store().await?;
        let ids = line(&store, 1).await?;
        for _ in 0..3 {
            store
                .record_commission(&subscription_event(ids[1], &[ids[0]], 1000))
                .await?;
        }
        assert_eq!(store.balance(ids[0]).await?, 450);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let user = ids[0];
                tokio::spawn(async move { store.withdraw(user, 100, "payout").await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await? {
                Ok(_) => successes += 1,
                Err(err) => assert!(matches!(
                    ledger_error(&err),
                    LedgerError::InsufficientFunds { requested: 100, .. }
                )),
            }
        }

        assert_eq!(successes, 4);
        assert_eq!(store.balance(ids[0]).await?, 50);
        Ok(())
    }
}
