//! The trading state machine.
//!
//! One sequential loop: inspect balances, branch into a normal buy or a
//! fallback liquidation, wait for the sell trigger, close, account the
//! profit, repeat. All exchange calls are awaited in order — the sell is
//! never issued before its matching buy has been accepted — and the only
//! suspension points are the waiter's sleeps and the error backoff, both
//! of which observe the shutdown signal.
//!
//! Error policy: everything that goes wrong inside an iteration is
//! caught at the iteration boundary, logged, and retried after a fixed
//! backoff. Balances are re-checked on re-entry so no stale state is
//! assumed. Only setup (before the loop) is allowed to be fatal.

use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{NoFundsPolicy, TradeParameters};
use crate::engine::waiter::{PriceWaiter, WaitOutcome};
use crate::exchange::ExchangeGateway;
use crate::types::{
    normalize_asset, MachineState, OrderKind, OrderReceipt, OrderRequest, OrderSide, Position,
    RunState,
};

/// Fixed delay before re-entering the loop after an in-iteration error.
/// Independent of the poll interval.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Session results
// ---------------------------------------------------------------------------

/// Why the trading loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The cumulative pool met the configured target.
    PoolTargetReached,
    /// Nothing left to buy with and nothing to fall back on
    /// (only under `NoFundsPolicy::Shutdown`).
    NoFunds,
    /// The operator asked for a stop.
    Interrupted,
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEnd::PoolTargetReached => write!(f, "pool target reached"),
            SessionEnd::NoFunds => write!(f, "out of funds"),
            SessionEnd::Interrupted => write!(f, "operator interrupt"),
        }
    }
}

/// Final state of a finished session, handed to the shutdown handler.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub state: RunState,
    pub end: SessionEnd,
}

enum Flow {
    Continue,
    Finished(SessionEnd),
}

enum Pause {
    Elapsed,
    Cancelled,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A single trading run. Owns the run state exclusively; nothing else
/// mutates the pool or the open position.
pub struct TradeSession<'a> {
    gateway: &'a dyn ExchangeGateway,
    params: &'a TradeParameters,
    cancel: watch::Receiver<bool>,
    state: RunState,
    machine: MachineState,
}

impl<'a> TradeSession<'a> {
    pub fn new(
        gateway: &'a dyn ExchangeGateway,
        params: &'a TradeParameters,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gateway,
            params,
            cancel,
            state: RunState::new(),
            machine: MachineState::Idle,
        }
    }

    /// Run until a terminal condition holds. Never panics out of an
    /// iteration: in-loop errors are logged and retried.
    pub async fn run(mut self) -> SessionReport {
        info!(
            pair = %self.params.pair,
            exchange = self.gateway.name(),
            pool_target = ?self.params.pool_target,
            "Entering trading loop"
        );

        loop {
            if self.state.target_reached(self.params.pool_target) {
                info!(
                    pool = %self.state.profit_pool,
                    target = ?self.params.pool_target,
                    "Pool target reached"
                );
                return self.finish(SessionEnd::PoolTargetReached);
            }
            if *self.cancel.borrow() {
                return self.finish(SessionEnd::Interrupted);
            }

            match self.iteration().await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Finished(end)) => return self.finish(end),
                Err(e) => {
                    error!(
                        error = %format!("{e:#}"),
                        backoff_secs = ERROR_BACKOFF.as_secs(),
                        "Trade cycle failed; retrying"
                    );
                    if let Pause::Cancelled = self.pause(ERROR_BACKOFF).await {
                        return self.finish(SessionEnd::Interrupted);
                    }
                }
            }
        }
    }

    fn finish(mut self, end: SessionEnd) -> SessionReport {
        self.transition(MachineState::ShuttingDown);
        info!(
            end = %end,
            pool = %self.state.profit_pool,
            cycles = self.state.cycles_completed,
            orders = self.state.orders_placed,
            "Trading loop finished"
        );
        SessionReport {
            state: self.state,
            end,
        }
    }

    /// One pass of the evaluate, trade, account sequence.
    async fn iteration(&mut self) -> Result<Flow> {
        self.transition(MachineState::Evaluating);

        let balances = self
            .gateway
            .get_balances()
            .await
            .context("querying balances")?;

        let quote = normalize_asset(self.params.quote());
        let quote_available = balances.get(&quote).copied().unwrap_or_default();

        if quote_available < self.params.max_quote_spend {
            let base = normalize_asset(&self.params.currency);
            let base_available = balances.get(&base).copied().unwrap_or_default();
            return self.fallback_sell(quote_available, base_available).await;
        }

        self.buy_sell_cycle().await
    }

    /// Normal branch: open a position sized to `max_quote_spend`, wait
    /// for the trigger, close at market.
    async fn buy_sell_cycle(&mut self) -> Result<Flow> {
        let params = self.params;

        let price = self
            .gateway
            .get_ticker(&params.pair)
            .await
            .context("querying ticker before buy")?;

        if price <= Decimal::ZERO {
            warn!(price = %price, "Degenerate ticker price; waiting before retry");
            return self.wait_and_continue().await;
        }
        let volume = params.max_quote_spend / price;
        if volume <= Decimal::ZERO {
            warn!(volume = %volume, "Degenerate buy volume; waiting before retry");
            return self.wait_and_continue().await;
        }

        self.transition(MachineState::Buying);
        let order = match params.order_type {
            OrderKind::Market => OrderRequest::market(&params.pair, OrderSide::Buy, volume),
            OrderKind::Limit => {
                let limit = params
                    .limit_price
                    .ok_or_else(|| anyhow!("limit order type without a limit price"))?;
                OrderRequest::limit(&params.pair, OrderSide::Buy, volume, limit)
            }
        };
        let receipt = self.place(order).await?;
        info!(
            txid = %receipt.txid,
            volume = %volume,
            price = %price,
            "Buy order placed"
        );

        let position = Position::open(price, volume, params.sell_trigger_profit);
        self.state.current_position = Some(position);
        info!(target = %position.target_price, "Will sell when price reaches target");

        let trigger_price = match self.await_trigger(position.target_price).await? {
            Some(p) => p,
            // Position intentionally left open; the shutdown handler
            // applies the flatten policy.
            None => return Ok(Flow::Finished(SessionEnd::Interrupted)),
        };

        self.transition(MachineState::Selling);
        let sell = OrderRequest::market(&params.pair, OrderSide::Sell, volume);
        let receipt = self.place(sell).await?;

        let profit = (trigger_price - position.entry_price) * position.volume;
        self.state.current_position = None;
        let pool = self.state.credit(profit);
        self.state.cycles_completed += 1;
        info!(
            txid = %receipt.txid,
            sell_price = %trigger_price,
            profit = %profit,
            pool = %pool,
            "Position closed"
        );

        Ok(Flow::Continue)
    }

    /// Fallback branch: quote currency can't cover a buy, so liquidate
    /// reserved base holdings — or apply the configured no-funds policy
    /// when there is nothing to liquidate either.
    async fn fallback_sell(
        &mut self,
        quote_available: Decimal,
        base_available: Decimal,
    ) -> Result<Flow> {
        let params = self.params;

        let volume = match params.fallback_sell_amount {
            Some(reserved) => reserved.min(base_available),
            None => base_available,
        };

        if volume <= Decimal::ZERO {
            return match params.no_funds_policy {
                NoFundsPolicy::Shutdown => {
                    warn!(
                        quote = params.quote(),
                        base = %params.currency,
                        "No quote currency to buy with and no base asset to sell; shutting down"
                    );
                    Ok(Flow::Finished(SessionEnd::NoFunds))
                }
                NoFundsPolicy::WaitAndRetry => {
                    warn!(
                        quote = params.quote(),
                        base = %params.currency,
                        "No funds on either side; waiting one interval"
                    );
                    self.wait_and_continue().await
                }
            };
        }

        self.transition(MachineState::FallbackSelling);
        warn!(
            available = %quote_available,
            needed = %params.max_quote_spend,
            volume = %volume,
            "Insufficient quote currency; selling existing base holdings"
        );

        let reference = self
            .gateway
            .get_ticker(&params.pair)
            .await
            .context("querying ticker for fallback sale")?;
        let position = Position::open(reference, volume, params.sell_trigger_profit);
        self.state.current_position = Some(position);
        info!(
            volume = %volume,
            target = %position.target_price,
            "Will liquidate when price reaches target"
        );

        let trigger_price = match self.await_trigger(position.target_price).await? {
            Some(p) => p,
            None => return Ok(Flow::Finished(SessionEnd::Interrupted)),
        };

        self.transition(MachineState::Selling);
        let sell = OrderRequest::market(&params.pair, OrderSide::Sell, volume);
        let receipt = self.place(sell).await?;
        self.state.current_position = None;
        self.state.cycles_completed += 1;

        if params.credit_fallback_to_pool {
            let profit = (trigger_price - reference) * volume;
            let pool = self.state.credit(profit);
            info!(
                txid = %receipt.txid,
                profit = %profit,
                pool = %pool,
                "Fallback sale credited to pool"
            );
        } else {
            info!(
                txid = %receipt.txid,
                volume = %volume,
                price = %trigger_price,
                "Fallback sale completed (not credited to pool)"
            );
        }

        Ok(Flow::Continue)
    }

    /// Wait for the sell trigger. `None` means the operator interrupted.
    async fn await_trigger(&mut self, target: Decimal) -> Result<Option<Decimal>> {
        self.transition(MachineState::AwaitingSellTrigger);
        let waiter = PriceWaiter::new(
            self.gateway,
            self.params.poll_interval(),
            self.params.verbose,
        );
        match waiter
            .wait_until(&self.params.pair, &mut self.cancel, |p| p >= target)
            .await?
        {
            WaitOutcome::Triggered(price) => Ok(Some(price)),
            WaitOutcome::Cancelled => Ok(None),
        }
    }

    async fn place(&mut self, order: OrderRequest) -> Result<OrderReceipt> {
        debug!(order = %order, "Placing order");
        let receipt = self
            .gateway
            .place_order(&order)
            .await
            .with_context(|| format!("placing order: {order}"))?;
        self.state.orders_placed += 1;
        Ok(receipt)
    }

    async fn wait_and_continue(&mut self) -> Result<Flow> {
        match self.pause(self.params.poll_interval()).await {
            Pause::Cancelled => Ok(Flow::Finished(SessionEnd::Interrupted)),
            Pause::Elapsed => Ok(Flow::Continue),
        }
    }

    /// Interruptible sleep.
    async fn pause(&mut self, duration: Duration) -> Pause {
        if *self.cancel.borrow() {
            return Pause::Cancelled;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Pause::Elapsed,
            _ = self.cancel.changed() => Pause::Cancelled,
        }
    }

    fn transition(&mut self, next: MachineState) {
        if self.machine != next {
            debug!(from = %self.machine, to = %next, "State transition");
            self.machine = next;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
