//! Trade parameters: the immutable-per-run configuration record.
//!
//! Built once from the wizard or a persisted preset, validated against a
//! fresh balance snapshot and the latest traded price, and then never
//! mutated for the lifetime of the run.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::exchange::ExchangeGateway;
use crate::types::{normalize_asset, split_pair, Balances, OrderKind};

/// Discount levels offered for limit buys, as fractions of the last
/// traded price: 0.1%, 0.2% and 0.5% below market. Limit orders are
/// clamped to these so a buy is never priced above market.
const LIMIT_DISCOUNTS: [Decimal; 3] = [dec!(0.999), dec!(0.998), dec!(0.995)];

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// What to do when there is neither quote currency to buy with nor base
/// asset to fall back on. The two observed behaviors are genuinely
/// different terminal policies and are never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoFundsPolicy {
    /// End the run via the shutdown handler.
    Shutdown,
    /// Log, wait one poll interval, and re-evaluate.
    WaitAndRetry,
}

impl fmt::Display for NoFundsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoFundsPolicy::Shutdown => write!(f, "shutdown"),
            NoFundsPolicy::WaitAndRetry => write!(f, "wait-and-retry"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Immutable-per-run trading configuration.
///
/// This is also the persisted preset record: loading a saved preset and
/// re-saving it unchanged yields a field-for-field identical file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeParameters {
    /// Asset pair, `BASE/QUOTE`, e.g. `XBT/USD`.
    pub pair: String,
    /// Base asset code to trade. Must exist in the balance snapshot.
    pub currency: String,
    /// Quantity of `currency` earmarked for the run.
    pub balance_to_use: Decimal,
    /// Base quantity reserved for emergency liquidation. `None` means
    /// the entire available base balance is fair game.
    #[serde(default)]
    pub fallback_sell_amount: Option<Decimal>,
    pub order_type: OrderKind,
    /// Set from a snapshot-derived suggestion when `order_type` is limit.
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Upper bound, in quote currency, per buy order.
    pub max_quote_spend: Decimal,
    /// Minimum absolute profit (quote currency) before closing a position.
    pub sell_trigger_profit: Decimal,
    /// Cumulative realized-profit threshold that ends the run.
    /// `None` means the run continues until interrupted.
    #[serde(default)]
    pub pool_target: Option<Decimal>,
    /// Currency the final pool is converted into at shutdown.
    pub pool_currency: String,
    pub no_funds_policy: NoFundsPolicy,
    /// Whether fallback-sale gains are credited to the profit pool.
    pub credit_fallback_to_pool: bool,
    /// Whether an open position is flattened with a market sell before exit.
    pub flatten_on_shutdown: bool,
    /// Price-polling granularity, seconds.
    pub poll_interval_secs: u64,
    /// Emit a log line for every observed poll price.
    pub verbose: bool,
}

impl TradeParameters {
    /// Base asset code of the pair.
    pub fn base(&self) -> &str {
        split_pair(&self.pair).map(|(b, _)| b).unwrap_or(&self.pair)
    }

    /// Quote currency code of the pair.
    pub fn quote(&self) -> &str {
        split_pair(&self.pair).map(|(_, q)| q).unwrap_or("USD")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Validate against a balance snapshot and the latest traded price.
    pub fn validate(&self, balances: &Balances, last_price: Decimal) -> Result<(), ValidationError> {
        let (_, _) = split_pair(&self.pair)
            .ok_or_else(|| ValidationError::MalformedPair(self.pair.clone()))?;

        let currency = normalize_asset(&self.currency);
        let available = match balances.get(&currency) {
            Some(amount) => *amount,
            None => return Err(ValidationError::UnknownCurrency(currency)),
        };

        if self.balance_to_use < Decimal::ZERO || self.balance_to_use > available {
            return Err(ValidationError::OutOfRange {
                field: "balance_to_use",
                reason: format!("must be within 0..={available}"),
            });
        }
        if let Some(reserved) = self.fallback_sell_amount {
            if reserved < Decimal::ZERO || reserved > available {
                return Err(ValidationError::OutOfRange {
                    field: "fallback_sell_amount",
                    reason: format!("must be within 0..={available}"),
                });
            }
        }
        if self.max_quote_spend <= Decimal::ZERO {
            return Err(ValidationError::OutOfRange {
                field: "max_quote_spend",
                reason: "must be positive".into(),
            });
        }
        if self.sell_trigger_profit <= Decimal::ZERO {
            return Err(ValidationError::OutOfRange {
                field: "sell_trigger_profit",
                reason: "must be positive".into(),
            });
        }
        if let Some(target) = self.pool_target {
            if target <= Decimal::ZERO {
                return Err(ValidationError::OutOfRange {
                    field: "pool_target",
                    reason: "must be positive".into(),
                });
            }
        }
        if self.pool_currency.trim().is_empty() {
            return Err(ValidationError::OutOfRange {
                field: "pool_currency",
                reason: "must not be empty".into(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ValidationError::OutOfRange {
                field: "poll_interval_secs",
                reason: "must be positive".into(),
            });
        }

        if self.order_type == OrderKind::Limit {
            let price = self
                .limit_price
                .ok_or(ValidationError::MissingLimitPrice)?;
            if !suggest_limit_prices(last_price).contains(&price) {
                return Err(ValidationError::StaleLimitPrice { price, last_price });
            }
        }

        Ok(())
    }
}

/// The three suggested limit prices below the latest traded price.
pub fn suggest_limit_prices(last_price: Decimal) -> [Decimal; 3] {
    [
        last_price * LIMIT_DISCOUNTS[0],
        last_price * LIMIT_DISCOUNTS[1],
        last_price * LIMIT_DISCOUNTS[2],
    ]
}

/// Build validated parameters from a freshly collected or persisted record.
///
/// Reads the balance snapshot and the ticker exactly once. A failed
/// balance fetch here is setup-fatal; a [`ValidationError`] means the
/// record should be rejected and the operator re-prompted.
pub async fn build_parameters(
    gateway: &dyn ExchangeGateway,
    source: TradeParameters,
) -> Result<TradeParameters> {
    let balances = gateway
        .get_balances()
        .await
        .context("fetching balances for parameter validation")?;
    let last_price = gateway
        .get_ticker(&source.pair)
        .await
        .context("fetching ticker for parameter validation")?;

    source.validate(&balances, last_price)?;
    Ok(source)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Malformed or out-of-range configuration, detected before the trading
/// loop is entered.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("pair must be BASE/QUOTE, got '{0}'")]
    MalformedPair(String),
    #[error("currency '{0}' not present in the balance snapshot")]
    UnknownCurrency(String),
    #[error("{field}: {reason}")]
    OutOfRange { field: &'static str, reason: String },
    #[error("limit order type requires a limit price")]
    MissingLimitPrice,
    #[error("limit price {price} is not one of the suggested discounts below {last_price}")]
    StaleLimitPrice { price: Decimal, last_price: Decimal },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
