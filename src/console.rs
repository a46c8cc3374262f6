//! Operator Console
//!
//! Line commands for running the ledger by hand: register users, record
//! purchases and sales, inspect wallets and referral trees.

use anyhow::{anyhow, bail, Context, Result};
use commission_core::{Amount, BuyerClass, PropertyId, SubscriptionTier, UserId};
use rust_decimal::Decimal;
use std::fmt::Write as _;
use std::io;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::service::MarketplaceService;

pub const HELP: &str = "\
Commands:
  register <username> <customer|vendor> [referrer_id]
  subscribe <user_id> <bronze|silver|gold>
  list <owner_id> <listing_price> <title...>
  properties <owner_id>
  sale <user_id> <property_id> <sale_price>
  wallet <user_id>
  withdraw <user_id> <amount>
  tree <user_id>
  events <user_id>
  plans | rates | help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register {
        username: String,
        class: BuyerClass,
        referrer: Option<UserId>,
    },
    Subscribe {
        user: UserId,
        tier: SubscriptionTier,
    },
    List {
        owner: UserId,
        listing_price: Amount,
        title: String,
    },
    Properties(UserId),
    Sale {
        user: UserId,
        property: PropertyId,
        sale_price: Amount,
    },
    Wallet(UserId),
    Withdraw {
        user: UserId,
        amount: Amount,
    },
    Tree(UserId),
    Events(UserId),
    Plans,
    Rates,
    Help,
    Quit,
}

fn user_arg(raw: Option<&str>) -> Result<UserId> {
    let raw = raw.ok_or_else(|| anyhow!("missing user id"))?;
    let id = raw
        .parse::<i64>()
        .with_context(|| format!("'{}' is not a user id", raw))?;
    Ok(UserId(id))
}

fn property_arg(raw: Option<&str>) -> Result<PropertyId> {
    let raw = raw.ok_or_else(|| anyhow!("missing property id"))?;
    let id = raw
        .parse::<i64>()
        .with_context(|| format!("'{}' is not a property id", raw))?;
    Ok(PropertyId(id))
}

fn amount_arg(raw: Option<&str>, what: &str) -> Result<Amount> {
    let raw = raw.ok_or_else(|| anyhow!("missing {}", what))?;
    raw.parse::<Amount>()
        .with_context(|| format!("'{}' is not a valid {}", raw, what))
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| anyhow!("empty command"))?
            .to_lowercase();

        let command = match verb.as_str() {
            "register" => {
                let username = words
                    .next()
                    .ok_or_else(|| anyhow!("missing username"))?
                    .to_string();
                let class = words
                    .next()
                    .ok_or_else(|| anyhow!("missing buyer class"))?
                    .parse::<BuyerClass>()?;
                let referrer = match words.next() {
                    Some(raw) => Some(user_arg(Some(raw))?),
                    None => None,
                };
                Command::Register {
                    username,
                    class,
                    referrer,
                }
            }
            "subscribe" => Command::Subscribe {
                user: user_arg(words.next())?,
                tier: words
                    .next()
                    .ok_or_else(|| anyhow!("missing tier"))?
                    .parse::<SubscriptionTier>()?,
            },
            "list" => {
                let owner = user_arg(words.next())?;
                let listing_price = amount_arg(words.next(), "listing price")?;
                let title = words.by_ref().collect::<Vec<_>>().join(" ");
                if title.is_empty() {
                    bail!("missing property title");
                }
                Command::List {
                    owner,
                    listing_price,
                    title,
                }
            }
            "properties" => Command::Properties(user_arg(words.next())?),
            "sale" => Command::Sale {
                user: user_arg(words.next())?,
                property: property_arg(words.next())?,
                sale_price: amount_arg(words.next(), "sale price")?,
            },
            "wallet" => Command::Wallet(user_arg(words.next())?),
            "withdraw" => Command::Withdraw {
                user: user_arg(words.next())?,
                amount: amount_arg(words.next(), "amount")?,
            },
            "tree" => Command::Tree(user_arg(words.next())?),
            "events" => Command::Events(user_arg(words.next())?),
            "plans" => Command::Plans,
            "rates" => Command::Rates,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => bail!("unknown command '{}'", other),
        };

        if let Some(extra) = words.next() {
            bail!("unexpected argument '{}'", extra);
        }
        Ok(command)
    }
}

fn percent(rate: Decimal) -> String {
    format!("{}%", (rate * Decimal::ONE_HUNDRED).normalize())
}

/// Run one command and return what to print. `Quit` is the caller's business.
pub async fn execute(service: &MarketplaceService, command: Command) -> Result<String> {
    let mut out = String::new();
    match command {
        Command::Register {
            username,
            class,
            referrer,
        } => {
            let user = service.register_user(&username, class, referrer).await?;
            writeln!(out, "Registered {} as user #{} ({})", user.username, user.id, user.class)?;
        }
        Command::Subscribe { user, tier } => {
            let event = service.purchase_subscription(user, tier).await?;
            writeln!(out, "Subscription {} charged {}", tier, event.base_amount)?;
            write_distribution(&mut out, &event)?;
        }
        Command::List {
            owner,
            listing_price,
            title,
        } => {
            let property = service.list_property(owner, &title, listing_price).await?;
            writeln!(
                out,
                "Listed property #{} '{}' at {} for user {}",
                property.id, property.title, property.listing_price, owner
            )?;
        }
        Command::Properties(owner) => {
            let properties = service.properties_for_owner(owner).await?;
            if properties.is_empty() {
                writeln!(out, "No properties listed by user {}", owner)?;
            }
            for property in &properties {
                writeln!(
                    out,
                    "  #{:<5} {:<6} {:>12} {}",
                    property.id, property.status, property.listing_price, property.title
                )?;
            }
        }
        Command::Sale {
            user,
            property,
            sale_price,
        } => {
            let event = service
                .report_property_sale(user, property, sale_price)
                .await?;
            writeln!(
                out,
                "Property #{} sold for {}, commission base {}",
                property, sale_price, event.base_amount
            )?;
            write_distribution(&mut out, &event)?;
        }
        Command::Wallet(user) => {
            let wallet = service.wallet_summary(user).await?;
            writeln!(out, "Wallet of user {}: balance {}", user, wallet.balance)?;
            for tx in &wallet.transactions {
                writeln!(
                    out,
                    "  {} {:>10} {:<18} {}",
                    tx.created_at.format("%Y-%m-%d %H:%M"),
                    tx.amount,
                    tx.kind,
                    tx.description
                )?;
            }
        }
        Command::Withdraw { user, amount } => {
            service.withdraw(user, amount).await?;
            let wallet = service.wallet_summary(user).await?;
            writeln!(out, "Withdrew {} for user {}, balance {}", amount, user, wallet.balance)?;
        }
        Command::Tree(user) => {
            let tree = service.referral_tree(user).await?;
            let summary = service.referral_summary(&tree).await?;
            out.push_str(&tree.render());
            writeln!(
                out,
                "Per level: {:?}  total: {}  earned: {}",
                summary.level_counts, summary.total_referrals, summary.total_earned
            )?;
        }
        Command::Events(user) => {
            let events = service.purchase_history(user).await?;
            if events.is_empty() {
                writeln!(out, "No commission events for user {}", user)?;
            }
            for event in &events {
                writeln!(out, "{}", serde_json::to_string(event)?)?;
            }
        }
        Command::Plans => {
            for (class, tier, price) in service.plans().iter() {
                writeln!(out, "{:<9} {:<7} {}", class, tier, price)?;
            }
        }
        Command::Rates => {
            let rates = service.calculator().rates();
            for (idx, rate) in rates.level_rates().iter().enumerate() {
                writeln!(out, "Level {}: {}", idx + 1, percent(*rate))?;
            }
            writeln!(out, "Company: {}", percent(rates.company_rate()))?;
            writeln!(out, "Property sale: {}", percent(rates.property_rate()))?;
        }
        Command::Help | Command::Quit => out.push_str(HELP),
    }
    Ok(out)
}

/// Read commands line by line until `quit` or end of input.
///
/// Bad input and failed commands are reported to `out`; only I/O errors end
/// the loop early.
pub async fn run<R, W>(service: &MarketplaceService, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: io::Write,
{
    let mut lines = input.lines();
    loop {
        write!(out, "ledger> ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                writeln!(out, "⚠️  {}\n{}", e, HELP)?;
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        match execute(service, command).await {
            Ok(output) => write!(out, "{}", output)?,
            Err(e) => writeln!(out, "❌ {}", e)?,
        }
    }
    Ok(())
}

fn write_distribution(out: &mut String, event: &commission_core::CommissionEvent) -> Result<()> {
    for entry in &event.entries {
        writeln!(
            out,
            "  L{} -> user {}: {}",
            entry.level, entry.beneficiary, entry.amount
        )?;
    }
    writeln!(
        out,
        "  platform retained {} (company share {})",
        event.platform_retained, event.company_share
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "register asha vendor 3".parse::<Command>().unwrap(),
            Command::Register {
                username: "asha".to_string(),
                class: BuyerClass::Vendor,
                referrer: Some(UserId(3)),
            }
        );
        assert_eq!(
            "SUBSCRIBE 4 Gold".parse::<Command>().unwrap(),
            Command::Subscribe {
                user: UserId(4),
                tier: SubscriptionTier::Gold,
            }
        );
        assert_eq!(
            "list 2 2600000 Plot 7,  Ring Road".parse::<Command>().unwrap(),
            Command::List {
                owner: UserId(2),
                listing_price: 2_600_000,
                title: "Plot 7, Ring Road".to_string(),
            }
        );
        assert_eq!(
            "sale 2 7 2500000".parse::<Command>().unwrap(),
            Command::Sale {
                user: UserId(2),
                property: PropertyId(7),
                sale_price: 2_500_000,
            }
        );
        assert_eq!("properties 2".parse::<Command>().unwrap(), Command::Properties(UserId(2)));
        assert_eq!("q".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<Command>().is_err());
        assert!("register asha".parse::<Command>().is_err());
        assert!("subscribe x gold".parse::<Command>().is_err());
        assert!("subscribe 1 platinum".parse::<Command>().is_err());
        assert!("wallet 1 2".parse::<Command>().is_err());
        assert!("list 1 5000".parse::<Command>().is_err());
        assert!("sale 1 PLOT-7 2500000".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(Decimal::new(15, 2)), "15%");
        assert_eq!(percent(Decimal::new(5, 3)), "0.5%");
    }
}
