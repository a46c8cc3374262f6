//! Minor-unit money arithmetic.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Monetary amount in the currency's minor unit.
pub type Amount = i64;

/// Multiply `amount` by `rate` and round to the minor unit, half to even.
///
/// Returns `None` only when the product does not fit back into an `Amount`.
pub fn apply_rate(amount: Amount, rate: Decimal) -> Option<Amount> {
    Decimal::from(amount)
        .checked_mul(rate)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
        .to_i64()
}
