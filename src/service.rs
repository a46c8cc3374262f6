//! Marketplace Service
//!
//! Wires purchases and property sales to the commission calculator and the
//! ledger: load the referrer chain, compute the distribution, then persist
//! the event and its wallet credits as one unit.

use anyhow::Result;
use commission_core::{
    Amount, BuyerClass, CommissionCalculator, CommissionEvent, EventKind, PlanCatalog, PropertyId,
    SubscriptionTier, UserId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::LedgerError;
use crate::ledger::{LedgerStore, Property, User, WalletTransaction};
use crate::referrals::{self, ReferralSummary, ReferralTree};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSummary {
    pub user: UserId,
    pub balance: Amount,
    pub transactions: Vec<WalletTransaction>,
}

pub struct MarketplaceService {
    store: Arc<dyn LedgerStore>,
    calculator: CommissionCalculator,
    plans: PlanCatalog,
}

impl MarketplaceService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        calculator: CommissionCalculator,
        plans: PlanCatalog,
    ) -> Self {
        Self {
            store,
            calculator,
            plans,
        }
    }

    /// Build from configuration, failing fast on an invalid rate table or catalog.
    pub fn from_config(store: Arc<dyn LedgerStore>, config: &AppConfig) -> Result<Self> {
        let rates = config.rate_table().map_err(LedgerError::from)?;
        let plans = config.plan_catalog().map_err(LedgerError::from)?;
        Ok(Self::new(store, CommissionCalculator::new(rates), plans))
    }

    pub fn calculator(&self) -> &CommissionCalculator {
        &self.calculator
    }

    pub fn plans(&self) -> &PlanCatalog {
        &self.plans
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub async fn register_user(
        &self,
        username: &str,
        class: BuyerClass,
        referrer: Option<UserId>,
    ) -> Result<User> {
        let user = self.store.register_user(username, class, referrer).await?;
        info!(
            "Registered {} user {} ({}), referrer: {:?}",
            user.class, user.id, user.username, user.referrer
        );
        Ok(user)
    }

    /// Charge the plan price for the user's buyer class and distribute it.
    pub async fn purchase_subscription(
        &self,
        user: UserId,
        tier: SubscriptionTier,
    ) -> Result<CommissionEvent> {
        let buyer = self.require_user(user).await?;
        let price = self.plans.price(buyer.class, tier);
        let kind = EventKind::SubscriptionPurchase {
            tier,
            class: buyer.class,
        };
        self.settle(user, kind, price).await
    }

    pub async fn list_property(
        &self,
        owner: UserId,
        title: &str,
        listing_price: Amount,
    ) -> Result<Property> {
        let property = self.store.list_property(owner, title, listing_price).await?;
        info!(
            "User {} listed property {} '{}' at {}",
            owner, property.id, property.title, property.listing_price
        );
        Ok(property)
    }

    pub async fn properties_for_owner(&self, owner: UserId) -> Result<Vec<Property>> {
        self.require_user(owner).await?;
        self.store.properties_for_owner(owner).await
    }

    /// Distribute the platform's commission on the sale of a listed property.
    ///
    /// The store re-checks ownership and status when it marks the property
    /// sold, so a racing second report still fails.
    pub async fn report_property_sale(
        &self,
        seller: UserId,
        property: PropertyId,
        sale_price: Amount,
    ) -> Result<CommissionEvent> {
        self.require_user(seller).await?;
        if let Err(e) = self.check_saleable(seller, property).await {
            warn!("Rejected sale of property {} by user {}: {}", property, seller, e);
            return Err(e);
        }

        let base = match self.calculator.property_sale_base(sale_price) {
            Ok(base) => base,
            Err(e) => {
                warn!("Rejected sale of property {} by user {}: {}", property, seller, e);
                return Err(LedgerError::from(e).into());
            }
        };
        let kind = EventKind::PropertySale {
            property,
            sale_price,
        };
        self.settle(seller, kind, base).await
    }

    async fn check_saleable(&self, seller: UserId, property: PropertyId) -> Result<()> {
        let found = self
            .store
            .property(property)
            .await?
            .ok_or(LedgerError::UnknownProperty(property))?;
        if found.owner != seller {
            return Err(LedgerError::NotPropertyOwner { property, seller }.into());
        }
        if !found.status.is_listed() {
            return Err(LedgerError::PropertyAlreadySold(property).into());
        }
        Ok(())
    }

    async fn settle(
        &self,
        purchaser: UserId,
        kind: EventKind,
        base: Amount,
    ) -> Result<CommissionEvent> {
        let chain = self.store.referrer_chain(purchaser).await?;
        let distribution = match self.calculator.distribute(base, &chain) {
            Ok(distribution) => distribution,
            Err(e) => {
                warn!("Rejected {} by user {}: {}", kind.label(), purchaser, e);
                return Err(LedgerError::from(e).into());
            }
        };

        let event = CommissionEvent::new(kind, purchaser, distribution);
        self.store.record_commission(&event).await?;
        info!(
            "Commission event {}: {} by user {}, base {}, {} referrer(s) paid {}, \
             platform retained {} (company share {})",
            event.id,
            event.kind.label(),
            purchaser,
            event.base_amount,
            event.entries.len(),
            event.base_amount - event.platform_retained,
            event.platform_retained,
            event.company_share
        );
        Ok(event)
    }

    pub async fn wallet_summary(&self, user: UserId) -> Result<WalletSummary> {
        self.require_user(user).await?;
        Ok(WalletSummary {
            user,
            balance: self.store.balance(user).await?,
            transactions: self.store.wallet_transactions(user).await?,
        })
    }

    pub async fn withdraw(&self, user: UserId, amount: Amount) -> Result<WalletTransaction> {
        let record = self
            .store
            .withdraw(user, amount, "Withdrawal request")
            .await
            .inspect_err(|e| warn!("Withdrawal of {} for user {} refused: {}", amount, user, e))?;
        info!("User {} withdrew {}", user, amount);
        Ok(record)
    }

    pub async fn purchase_history(&self, user: UserId) -> Result<Vec<CommissionEvent>> {
        self.require_user(user).await?;
        self.store.events_for_purchaser(user).await
    }

    pub async fn referral_tree(&self, user: UserId) -> Result<ReferralTree> {
        self.require_user(user).await?;
        referrals::build_tree(self.store.as_ref(), user).await
    }

    /// Dashboard numbers for the root of an already built `tree`.
    pub async fn referral_summary(&self, tree: &ReferralTree) -> Result<ReferralSummary> {
        let user = tree.root;
        let level_counts = tree.level_counts();
        let total_earned: Amount = self
            .store
            .commission_earnings(user)
            .await?
            .iter()
            .map(|e| e.amount)
            .sum();
        Ok(ReferralSummary {
            user,
            direct_referrals: level_counts[0],
            level_counts,
            total_referrals: tree.total(),
            total_earned,
        })
    }

    async fn require_user(&self, user: UserId) -> Result<User> {
        match self.store.user(user).await? {
            Some(found) => Ok(found),
            None => Err(LedgerError::UnknownUser(user).into()),
        }
    }
}
