//! Price waiter.
//!
//! A reusable blocking primitive: sleep a fixed interval, poll the
//! ticker, test a predicate, repeat until it holds. There is
//! deliberately no iteration bound — a position may stay open
//! indefinitely. The only way out besides the trigger is the operator's
//! shutdown signal, which is observed at every sleep and surfaces as a
//! distinct outcome rather than an error.

use anyhow::Result;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::exchange::ExchangeGateway;

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaitOutcome {
    /// The predicate held; carries the price that triggered it.
    Triggered(Decimal),
    /// The shutdown signal fired before the predicate held.
    Cancelled,
}

pub struct PriceWaiter<'a> {
    gateway: &'a dyn ExchangeGateway,
    interval: Duration,
    verbose: bool,
}

impl<'a> PriceWaiter<'a> {
    pub fn new(gateway: &'a dyn ExchangeGateway, interval: Duration, verbose: bool) -> Self {
        Self {
            gateway,
            interval,
            verbose,
        }
    }

    /// Poll until `predicate(price)` holds or the shutdown signal fires.
    ///
    /// Sleeps first, then queries — the first price check happens one
    /// full interval after the call. Ticker errors propagate to the
    /// caller's iteration boundary; they do not end the wait as
    /// cancelled or triggered.
    pub async fn wait_until(
        &self,
        pair: &str,
        cancel: &mut watch::Receiver<bool>,
        predicate: impl Fn(Decimal) -> bool,
    ) -> Result<WaitOutcome> {
        if *cancel.borrow() {
            return Ok(WaitOutcome::Cancelled);
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                // Err means the sender is gone; treat as shutdown too.
                _ = cancel.changed() => return Ok(WaitOutcome::Cancelled),
            }

            let price = self.gateway.get_ticker(pair).await?;
            if self.verbose {
                info!(pair, price = %price, "Price check");
            } else {
                debug!(pair, price = %price, "Price check");
            }

            if predicate(price) {
                return Ok(WaitOutcome::Triggered(price));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
