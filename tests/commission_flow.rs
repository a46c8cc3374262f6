use anyhow::Result;
use std::sync::Arc;
use tempfile::NamedTempFile;

use weworklocal::commission_core::{
    BuyerClass, CommissionError, EventKind, PropertyId, PropertyStatus, SubscriptionTier, UserId,
};
use weworklocal::console::{self, Command};
use weworklocal::{AppConfig, LedgerError, MarketplaceService, SqliteLedgerStore};

async fn service_with(config: &AppConfig) -> Result<(NamedTempFile, MarketplaceService)> {
    let temp_file = NamedTempFile::new()?;
    let store = Arc::new(SqliteLedgerStore::new(temp_file.path()).await?);
    let service = MarketplaceService::from_config(store, config)?;
    Ok((temp_file, service))
}

async fn service() -> Result<(NamedTempFile, MarketplaceService)> {
    service_with(&AppConfig::default()).await
}

/// A chain of `len` customers, each referred by the previous one.
async fn chain(service: &MarketplaceService, len: usize) -> Result<Vec<UserId>> {
    let mut ids = Vec::new();
    let mut referrer = None;
    for i in 0..len {
        let user = service
            .register_user(&format!("member{}", i), BuyerClass::Customer, referrer)
            .await?;
        referrer = Some(user.id);
        ids.push(user.id);
    }
    Ok(ids)
}

fn ledger_error(err: &anyhow::Error) -> &LedgerError {
    err.downcast_ref::<LedgerError>().expect("Should be a ledger error")
}

#[tokio::test]
async fn test_subscription_pays_two_levels() -> Result<()> {
    let mut config = AppConfig::default();
    config.plans.customer.gold = 1000;
    let (_file, service) = service_with(&config).await?;
    let ids = chain(&service, 3).await?;
    let buyer = ids[2];

    let event = service.purchase_subscription(buyer, SubscriptionTier::Gold).await?;
    assert_eq!(event.base_amount, 1000);
    let paid: Vec<(UserId, u8, i64)> = event
        .entries
        .iter()
        .map(|e| (e.beneficiary, e.level, e.amount))
        .collect();
    assert_eq!(paid, vec![(ids[1], 1, 150), (ids[0], 2, 20)]);
    assert_eq!(event.platform_retained, 830);
    assert_eq!(event.company_share, 200);

    assert_eq!(service.wallet_summary(ids[1]).await?.balance, 150);
    assert_eq!(service.wallet_summary(ids[0]).await?.balance, 20);
    assert_eq!(service.purchase_history(buyer).await?, vec![event]);
    Ok(())
}

#[tokio::test]
async fn test_no_referrer_keeps_everything() -> Result<()> {
    let (_file, service) = service().await?;
    let solo = service.register_user("solo", BuyerClass::Vendor, None).await?;

    let event = service
        .purchase_subscription(solo.id, SubscriptionTier::Bronze)
        .await?;
    assert_eq!(event.base_amount, 999);
    assert!(event.entries.is_empty());
    assert_eq!(event.platform_retained, 999);
    Ok(())
}

#[tokio::test]
async fn test_deep_chain_pays_five_levels() -> Result<()> {
    let (_file, service) = service().await?;
    let ids = chain(&service, 8).await?;
    let buyer = *ids.last().unwrap();

    let event = service.purchase_subscription(buyer, SubscriptionTier::Silver).await?;
    assert_eq!(event.entries.len(), 5);
    let levels: Vec<u8> = event.entries.iter().map(|e| e.level).collect();
    assert_eq!(levels, vec![1, 2, 3, 4, 5]);
    let distributed: i64 = event.entries.iter().map(|e| e.amount).sum();
    assert_eq!(distributed + event.platform_retained, 799);

    // Level six and beyond earn nothing.
    assert_eq!(service.wallet_summary(ids[1]).await?.balance, 0);
    assert_eq!(service.wallet_summary(ids[0]).await?.balance, 0);
    Ok(())
}

#[tokio::test]
async fn test_property_sale_uses_property_rate() -> Result<()> {
    let (_file, service) = service().await?;
    let ids = chain(&service, 2).await?;
    let plot = service.list_property(ids[1], "Plot 17", 2_600_000).await?;

    let event = service
        .report_property_sale(ids[1], plot.id, 2_500_000)
        .await?;
    assert_eq!(event.base_amount, 25_000);
    assert_eq!(
        event.kind,
        EventKind::PropertySale {
            property: plot.id,
            sale_price: 2_500_000,
        }
    );
    assert_eq!(event.entries[0].amount, 3_750);
    assert_eq!(service.wallet_summary(ids[0]).await?.balance, 3_750);

    let other = service.list_property(ids[1], "Plot 18", 10_000).await?;
    let err = service
        .report_property_sale(ids[1], other.id, 0)
        .await
        .unwrap_err();
    assert!(matches!(
        ledger_error(&err),
        LedgerError::Commission(CommissionError::InvalidAmount(0))
    ));
    assert_eq!(service.purchase_history(ids[1]).await?.len(), 1);

    let listed: Vec<PropertyStatus> = service
        .properties_for_owner(ids[1])
        .await?
        .iter()
        .map(|p| p.status)
        .collect();
    assert_eq!(listed, vec![PropertyStatus::Sold, PropertyStatus::Listed]);
    Ok(())
}

#[tokio::test]
async fn test_property_pays_the_upline_once() -> Result<()> {
    let (_file, service) = service().await?;
    let ids = chain(&service, 2).await?;
    let outsider = service.register_user("outsider", BuyerClass::Vendor, Some(ids[0])).await?;
    let plot = service.list_property(ids[1], "Plot 1", 2_500_000).await?;

    service.report_property_sale(ids[1], plot.id, 2_500_000).await?;

    let err = service
        .report_property_sale(ids[1], plot.id, 2_500_000)
        .await
        .unwrap_err();
    assert!(matches!(ledger_error(&err), LedgerError::PropertyAlreadySold(_)));

    let err = service
        .report_property_sale(outsider.id, plot.id, 2_500_000)
        .await
        .unwrap_err();
    assert!(matches!(
        ledger_error(&err),
        LedgerError::NotPropertyOwner { seller, .. } if *seller == outsider.id
    ));

    let err = service
        .report_property_sale(ids[1], PropertyId(999), 2_500_000)
        .await
        .unwrap_err();
    assert!(matches!(
        ledger_error(&err),
        LedgerError::UnknownProperty(PropertyId(999))
    ));

    assert_eq!(service.wallet_summary(ids[0]).await?.balance, 3_750);
    assert!(service.purchase_history(outsider.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_non_owner_cannot_sell_a_listed_property() -> Result<()> {
    let (_file, service) = service().await?;
    let ids = chain(&service, 3).await?;
    let plot = service.list_property(ids[1], "Shop 4", 800_000).await?;

    let err = service
        .report_property_sale(ids[2], plot.id, 800_000)
        .await
        .unwrap_err();
    assert!(matches!(ledger_error(&err), LedgerError::NotPropertyOwner { .. }));

    let still = service.properties_for_owner(ids[1]).await?;
    assert_eq!(still[0].status, PropertyStatus::Listed);
    assert_eq!(service.wallet_summary(ids[1]).await?.balance, 0);
    assert_eq!(service.wallet_summary(ids[0]).await?.balance, 0);
    Ok(())
}

#[tokio::test]
async fn test_unknown_user_is_rejected() -> Result<()> {
    let (_file, service) = service().await?;
    let err = service
        .purchase_subscription(UserId(404), SubscriptionTier::Gold)
        .await
        .unwrap_err();
    assert!(matches!(ledger_error(&err), LedgerError::UnknownUser(UserId(404))));
    Ok(())
}

#[tokio::test]
async fn test_invalid_rate_table_refuses_to_build() -> Result<()> {
    let mut config = AppConfig::default();
    config.commission.company_rate = "0.85".parse()?;
    let temp_file = NamedTempFile::new()?;
    let store = Arc::new(SqliteLedgerStore::new(temp_file.path()).await?);

    let err = MarketplaceService::from_config(store, &config)
        .err()
        .expect("Should refuse an over-distributing table");
    assert!(matches!(
        ledger_error(&err),
        LedgerError::Commission(CommissionError::InvalidRateTable(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_withdraw_and_referral_summary() -> Result<()> {
    let (_file, service) = service().await?;
    let ids = chain(&service, 3).await?;
    let side = service
        .register_user("side", BuyerClass::Vendor, Some(ids[0]))
        .await?;

    service.purchase_subscription(ids[2], SubscriptionTier::Gold).await?;
    service.purchase_subscription(side.id, SubscriptionTier::Gold).await?;

    // ids[0] earns level 2 on ids[2] (999 -> 20) and level 1 on side (2999 -> 450)
    let tree = service.referral_tree(ids[0]).await?;
    let summary = service.referral_summary(&tree).await?;
    assert_eq!(summary.direct_referrals, 2);
    assert_eq!(summary.level_counts, [2, 1, 0, 0, 0]);
    assert_eq!(summary.total_referrals, 3);
    assert_eq!(summary.total_earned, 470);

    let err = service.withdraw(ids[0], 471).await.unwrap_err();
    assert!(matches!(
        ledger_error(&err),
        LedgerError::InsufficientFunds { balance: 470, .. }
    ));
    service.withdraw(ids[0], 400).await?;
    let wallet = service.wallet_summary(ids[0]).await?;
    assert_eq!(wallet.balance, 70);
    assert_eq!(wallet.transactions.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_console_round() -> Result<()> {
    let (_file, service) = service().await?;

    let out = console::execute(&service, "register root customer".parse()?).await?;
    assert!(out.contains("user #1"));
    console::execute(&service, "register leaf customer 1".parse()?).await?;

    let out = console::execute(&service, "subscribe 2 silver".parse()?).await?;
    assert!(out.contains("L1 -> user 1: 120"));

    let out = console::execute(&service, "wallet 1".parse()?).await?;
    assert!(out.contains("balance 120"));

    let out = console::execute(&service, "list 2 900000 Corner shop".parse()?).await?;
    assert!(out.contains("Listed property #1 'Corner shop'"));
    let out = console::execute(&service, "sale 2 1 1000000".parse()?).await?;
    assert!(out.contains("commission base 10000"));
    assert!(out.contains("L1 -> user 1: 1500"));
    assert!(console::execute(&service, "sale 2 1 1000000".parse()?).await.is_err());

    let out = console::execute(&service, "properties 2".parse()?).await?;
    assert!(out.contains("sold"));
    assert!(out.contains("Corner shop"));

    let out = console::execute(&service, "wallet 1".parse()?).await?;
    assert!(out.contains("balance 1620"));

    let out = console::execute(&service, "tree 1".parse()?).await?;
    assert!(out.contains("L1 #2 leaf"));

    let out = console::execute(&service, Command::Rates).await?;
    assert!(out.contains("Level 1: 15%"));
    assert!(out.contains("Company: 20%"));
    Ok(())
}

#[tokio::test]
async fn test_console_session_stops_at_quit() -> Result<()> {
    let (_file, service) = service().await?;
    let script = "register root customer\n\
                  \n\
                  bogus\n\
                  subscribe 9 gold\n\
                  register leaf customer 1\n\
                  quit\n\
                  register late customer\n";

    let mut out = Vec::new();
    console::run(&service, script.as_bytes(), &mut out).await?;
    let text = String::from_utf8(out)?;

    assert!(text.contains("Registered root as user #1"));
    assert!(text.contains("unknown command 'bogus'"));
    assert!(text.contains("unknown user 9"));
    assert!(text.contains("Registered leaf as user #2"));
    assert!(!text.contains("Registered late"));
    assert!(service.wallet_summary(UserId(3)).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_console_session_ends_with_input() -> Result<()> {
    let (_file, service) = service().await?;
    let mut out = Vec::new();
    console::run(&service, &b"register solo vendor"[..], &mut out).await?;

    assert!(String::from_utf8(out)?.contains("Registered solo as user #1"));
    Ok(())
}
