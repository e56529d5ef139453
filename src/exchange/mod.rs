//! Exchange integration.
//!
//! Defines the `ExchangeGateway` trait the trading engine is written
//! against, and provides the Kraken REST implementation. Network I/O,
//! rate limits, and authentication all live behind this seam.

pub mod kraken;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{Balances, OrderReceipt, OrderRequest};

/// Abstraction over a spot exchange.
///
/// All calls are one-shot request/response; the engine owns every retry
/// decision. Order rejection is reported as a [`crate::types::OrderRejected`]
/// error so the exchange's own message survives to the logs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Latest traded price for the pair. Accepts `BASE/QUOTE` or the
    /// exchange's condensed form.
    async fn get_ticker(&self, pair: &str) -> Result<Decimal>;

    /// Current balances, keyed by normalized asset code, positive
    /// amounts only.
    async fn get_balances(&self) -> Result<Balances>;

    /// Place an order. Returns a receipt once the exchange accepts it;
    /// fill tracking is out of scope.
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderReceipt>;

    /// Exchange name for logging and identification.
    fn name(&self) -> &str;
}
