//! Shared types for the SCALPER bot.
//!
//! These types form the data model used across all modules: order
//! primitives, the run state owned by the trading session, and the
//! asset-code normalization that Kraken's prefixed codes require.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Asset code → available amount, normalized and filtered to positive amounts.
pub type Balances = HashMap<String, Decimal>;

// ---------------------------------------------------------------------------
// Asset codes
// ---------------------------------------------------------------------------

/// Normalize an exchange asset code for lookups.
///
/// Kraken prefixes classic assets with `X` (crypto) or `Z` (fiat), e.g.
/// `XXBT` and `ZUSD`. Uppercases and strips the prefix from codes of four
/// or more characters, so `XXBT`, `xbt` and `XBT` all map to `XBT`.
/// Idempotent: normalizing twice yields the same code.
pub fn normalize_asset(code: &str) -> String {
    let upper = code.trim().to_uppercase();
    if upper.len() >= 4 && (upper.starts_with('X') || upper.starts_with('Z')) {
        upper[1..].to_string()
    } else {
        upper
    }
}

/// Split a `BASE/QUOTE` pair identifier into its two asset codes.
pub fn split_pair(pair: &str) -> Option<(&str, &str)> {
    let (base, quote) = pair.split_once('/')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    Some((base, quote))
}

// ---------------------------------------------------------------------------
// Order primitives
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Order kind: immediate execution at best price, or priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Market => write!(f, "market"),
            OrderKind::Limit => write!(f, "limit"),
        }
    }
}

impl std::str::FromStr for OrderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "market" => Ok(OrderKind::Market),
            "limit" => Ok(OrderKind::Limit),
            _ => Err(anyhow::anyhow!("Unknown order kind: {s}")),
        }
    }
}

/// A request to place an order on the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub pair: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub volume: Decimal,
    /// Required for limit orders, ignored for market orders.
    pub limit_price: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(pair: &str, side: OrderSide, volume: Decimal) -> Self {
        Self {
            pair: pair.to_string(),
            side,
            kind: OrderKind::Market,
            volume,
            limit_price: None,
        }
    }

    pub fn limit(pair: &str, side: OrderSide, volume: Decimal, price: Decimal) -> Self {
        Self {
            pair: pair.to_string(),
            side,
            kind: OrderKind::Limit,
            volume,
            limit_price: Some(price),
        }
    }
}

impl fmt::Display for OrderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.kind, self.side, self.volume, self.pair)?;
        if let Some(p) = self.limit_price {
            write!(f, " @ {p}")?;
        }
        Ok(())
    }
}

/// Receipt returned after the exchange accepts an order.
///
/// Only acceptance is tracked; fills and cancellations are out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub txid: String,
    pub pair: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub volume: Decimal,
    pub limit_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// The exchange accepted the request but rejected the order itself.
///
/// Raised through `anyhow` so the trading loop can surface the exchange's
/// own message; handled like any other transient error (log, back off,
/// re-enter the iteration).
#[derive(Debug, thiserror::Error)]
#[error("order rejected by exchange: {0}")]
pub struct OrderRejected(pub String);

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// An open position between a buy (or fallback reservation) and its
/// matching sell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub entry_price: Decimal,
    pub volume: Decimal,
    pub target_price: Decimal,
}

impl Position {
    /// Open a position with its sell target derived from the absolute
    /// profit trigger: `target = entry + trigger / volume`. Larger
    /// positions need a smaller price move.
    pub fn open(entry_price: Decimal, volume: Decimal, trigger_profit: Decimal) -> Self {
        Self {
            entry_price,
            volume,
            target_price: entry_price + trigger_profit / volume,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} (sell ≥ {})",
            self.volume, self.entry_price, self.target_price
        )
    }
}

/// Mutable state of a trading run. Owned exclusively by the trading
/// session and destroyed at process exit; never persisted.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    /// Cumulative realized profit in quote currency. Monotonically
    /// non-decreasing across closed positions.
    pub profit_pool: Decimal,
    /// At most one open position exists at any time.
    pub current_position: Option<Position>,
    pub cycles_completed: u64,
    pub orders_placed: u64,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit realized profit to the pool and return the new total.
    pub fn credit(&mut self, profit: Decimal) -> Decimal {
        self.profit_pool += profit;
        self.profit_pool
    }

    /// Whether the cumulative pool has met the configured target.
    pub fn target_reached(&self, pool_target: Option<Decimal>) -> bool {
        match pool_target {
            Some(target) => self.profit_pool >= target,
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Machine states
// ---------------------------------------------------------------------------

/// States of the trading state machine, tracked for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Idle,
    Evaluating,
    Buying,
    FallbackSelling,
    AwaitingSellTrigger,
    Selling,
    ShuttingDown,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineState::Idle => write!(f, "idle"),
            MachineState::Evaluating => write!(f, "evaluating"),
            MachineState::Buying => write!(f, "buying"),
            MachineState::FallbackSelling => write!(f, "fallback-selling"),
            MachineState::AwaitingSellTrigger => write!(f, "awaiting-sell-trigger"),
            MachineState::Selling => write!(f, "selling"),
            MachineState::ShuttingDown => write!(f, "shutting-down"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
