//! End-to-end trading session tests against the mock exchange.
//!
//! Each test scripts a price sequence and a starting balance sheet,
//! runs a full `TradeSession`, and checks the orders the exchange saw
//! plus the final report. All tests run on a paused tokio clock, so
//! poll intervals and backoffs elapse instantly.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::sync::watch;

use scalper::config::{NoFundsPolicy, TradeParameters};
use scalper::engine::shutdown;
use scalper::engine::trader::{SessionEnd, TradeSession};
use scalper::types::{Balances, OrderKind, OrderSide};

use crate::mock_gateway::MockGateway;

fn balances(entries: &[(&str, Decimal)]) -> Balances {
    entries
        .iter()
        .map(|(code, amount)| (code.to_string(), *amount))
        .collect()
}

fn base_params() -> TradeParameters {
    TradeParameters {
        pair: "XBT/USD".into(),
        currency: "XBT".into(),
        balance_to_use: dec!(0.05),
        fallback_sell_amount: None,
        order_type: OrderKind::Market,
        limit_price: None,
        max_quote_spend: dec!(10),
        sell_trigger_profit: dec!(1),
        pool_target: Some(dec!(1)),
        pool_currency: "USD".into(),
        no_funds_policy: NoFundsPolicy::Shutdown,
        credit_fallback_to_pool: true,
        flatten_on_shutdown: false,
        poll_interval_secs: 30,
        verbose: false,
    }
}

fn session_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

// ---------------------------------------------------------------------------
// Normal buy/sell cycles
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_market_cycle_sizes_buy_and_credits_profit() {
    // 10 USD at 50000 buys 0.0002 XBT; the sell trigger of 1 USD puts
    // the target at exactly 55000.
    let gateway = MockGateway::new(
        vec![dec!(50000), dec!(55000)],
        balances(&[("USD", dec!(200)), ("XBT", dec!(0.05))]),
    );
    let params = base_params();
    let (_tx, rx) = session_channel();

    let report = TradeSession::new(&gateway, &params, rx).run().await;

    assert_eq!(report.end, SessionEnd::PoolTargetReached);
    assert_eq!(report.state.profit_pool, dec!(1));
    assert_eq!(report.state.cycles_completed, 1);
    assert_eq!(report.state.orders_placed, 2);
    assert!(report.state.current_position.is_none());

    let orders = gateway.recorded_orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[0].kind, OrderKind::Market);
    assert_eq!(orders[0].volume, dec!(0.0002));
    assert_eq!(orders[1].side, OrderSide::Sell);
    assert_eq!(orders[1].volume, dec!(0.0002));
}

#[tokio::test(start_paused = true)]
async fn test_limit_buy_carries_configured_price() {
    let gateway = MockGateway::new(
        vec![dec!(50000), dec!(55000)],
        balances(&[("USD", dec!(200))]),
    );
    let mut params = base_params();
    params.order_type = OrderKind::Limit;
    params.limit_price = Some(dec!(49950));
    let (_tx, rx) = session_channel();

    let report = TradeSession::new(&gateway, &params, rx).run().await;
    assert_eq!(report.end, SessionEnd::PoolTargetReached);

    let orders = gateway.recorded_orders();
    assert_eq!(orders[0].kind, OrderKind::Limit);
    assert_eq!(orders[0].limit_price, Some(dec!(49950)));
    // The closing sell is always at market.
    assert_eq!(orders[1].kind, OrderKind::Market);
    assert_eq!(orders[1].limit_price, None);
}

#[tokio::test(start_paused = true)]
async fn test_pool_accumulates_across_cycles() {
    // Two 26-USD cycles overshoot the 50 USD target; the session stops
    // at the first loop entry where the pool is at or above target.
    let gateway = MockGateway::new(
        vec![dec!(100), dec!(126), dec!(100), dec!(126)],
        balances(&[("USD", dec!(1000))]),
    );
    let mut params = base_params();
    params.max_quote_spend = dec!(100);
    params.sell_trigger_profit = dec!(26);
    params.pool_target = Some(dec!(50));
    let (_tx, rx) = session_channel();

    let report = TradeSession::new(&gateway, &params, rx).run().await;

    assert_eq!(report.end, SessionEnd::PoolTargetReached);
    assert_eq!(report.state.profit_pool, dec!(52));
    assert_eq!(report.state.cycles_completed, 2);
    assert_eq!(gateway.recorded_orders().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_buy_is_retried_after_backoff() {
    // First AddOrder bounces with an exchange error; the iteration is
    // retried from the top and succeeds on fresh data.
    let gateway = MockGateway::new(
        vec![dec!(50000), dec!(50000), dec!(55000)],
        balances(&[("USD", dec!(200))]),
    );
    gateway.reject_next_orders(1);
    let params = base_params();
    let (_tx, rx) = session_channel();

    let report = TradeSession::new(&gateway, &params, rx).run().await;

    assert_eq!(report.end, SessionEnd::PoolTargetReached);
    assert_eq!(report.state.profit_pool, dec!(1));
    assert_eq!(gateway.rejection_count(), 1);
    // Only accepted orders count.
    assert_eq!(report.state.orders_placed, 2);
    assert_eq!(gateway.recorded_orders().len(), 2);
}

// ---------------------------------------------------------------------------
// Fallback liquidation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_fallback_sells_base_when_quote_is_short() {
    // 3 USD cannot cover a 10 USD buy, so the whole 0.01 XBT holding is
    // put up for sale; with trigger 1 the target is 50100.
    let gateway = MockGateway::new(
        vec![dec!(50000), dec!(50100)],
        balances(&[("USD", dec!(3)), ("XBT", dec!(0.01))]),
    );
    let params = base_params();
    let (_tx, rx) = session_channel();

    let report = TradeSession::new(&gateway, &params, rx).run().await;

    assert_eq!(report.end, SessionEnd::PoolTargetReached);
    assert_eq!(report.state.profit_pool, dec!(1));
    assert_eq!(report.state.cycles_completed, 1);

    let orders = gateway.recorded_orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, OrderSide::Sell);
    assert_eq!(orders[0].volume, dec!(0.01));
}

#[tokio::test(start_paused = true)]
async fn test_fallback_respects_reserved_amount() {
    let gateway = MockGateway::new(
        vec![dec!(50000), dec!(50250)],
        balances(&[("USD", dec!(3)), ("XBT", dec!(0.01))]),
    );
    let mut params = base_params();
    params.fallback_sell_amount = Some(dec!(0.004));
    let (_tx, rx) = session_channel();

    let report = TradeSession::new(&gateway, &params, rx).run().await;

    // target = 50000 + 1 / 0.004 = 50250; profit = 250 * 0.004 = 1.
    assert_eq!(report.end, SessionEnd::PoolTargetReached);
    assert_eq!(report.state.profit_pool, dec!(1));
    assert_eq!(gateway.recorded_orders()[0].volume, dec!(0.004));
}

#[tokio::test(start_paused = true)]
async fn test_uncredited_fallback_leaves_pool_untouched() {
    // With crediting off the sale completes but the pool stays at zero;
    // the base balance is gone afterwards, so the shutdown policy ends
    // the run out of funds.
    let gateway = MockGateway::new(
        vec![dec!(50000), dec!(50100)],
        balances(&[("USD", dec!(3)), ("XBT", dec!(0.01))]),
    );
    gateway.schedule_balances(1, balances(&[("USD", dec!(3))]));
    let mut params = base_params();
    params.credit_fallback_to_pool = false;
    let (_tx, rx) = session_channel();

    let report = TradeSession::new(&gateway, &params, rx).run().await;

    assert_eq!(report.end, SessionEnd::NoFunds);
    assert_eq!(report.state.profit_pool, Decimal::ZERO);
    assert_eq!(report.state.cycles_completed, 1);
    assert_eq!(gateway.recorded_orders().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_and_retry_polls_until_interrupted() {
    // Broke on both sides under the retry policy: no orders, no
    // shutdown, just interval sleeps until the operator pulls the plug.
    let gateway = MockGateway::new(vec![dec!(100)], Balances::new());
    let mut params = base_params();
    params.no_funds_policy = NoFundsPolicy::WaitAndRetry;
    params.pool_target = None;
    let (tx, rx) = session_channel();

    let session = TradeSession::new(&gateway, &params, rx);
    let (report, _) = tokio::join!(session.run(), async {
        tokio::time::sleep(Duration::from_secs(95)).await;
        let _ = tx.send(true);
    });

    assert_eq!(report.end, SessionEnd::Interrupted);
    assert!(gateway.recorded_orders().is_empty());
}

// ---------------------------------------------------------------------------
// Interrupt and shutdown handling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_interrupt_mid_wait_leaves_position_open() {
    // The trigger never fires; an interrupt during the wait must end
    // the session without a sell and without touching the pool.
    let gateway = MockGateway::new(
        vec![dec!(50000), dec!(50001)],
        balances(&[("USD", dec!(200))]),
    );
    let params = base_params();
    let (tx, rx) = session_channel();

    let session = TradeSession::new(&gateway, &params, rx);
    let (report, _) = tokio::join!(session.run(), async {
        tokio::time::sleep(Duration::from_secs(300)).await;
        let _ = tx.send(true);
    });

    assert_eq!(report.end, SessionEnd::Interrupted);
    assert_eq!(report.state.profit_pool, Decimal::ZERO);
    assert_eq!(gateway.recorded_orders().len(), 1);

    let position = report.state.current_position.unwrap();
    assert_eq!(position.entry_price, dec!(50000));
    assert_eq!(position.volume, dec!(0.0002));

    // Default policy: the position is reported, not flattened.
    shutdown::run(&gateway, &params, &report).await;
    assert_eq!(gateway.recorded_orders().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flattens_position_when_configured() {
    let gateway = MockGateway::new(
        vec![dec!(50000), dec!(50001)],
        balances(&[("USD", dec!(200))]),
    );
    let mut params = base_params();
    params.flatten_on_shutdown = true;
    let (tx, rx) = session_channel();

    let session = TradeSession::new(&gateway, &params, rx);
    let (report, _) = tokio::join!(session.run(), async {
        tokio::time::sleep(Duration::from_secs(120)).await;
        let _ = tx.send(true);
    });
    assert_eq!(report.end, SessionEnd::Interrupted);

    shutdown::run(&gateway, &params, &report).await;

    let orders = gateway.recorded_orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[1].side, OrderSide::Sell);
    assert_eq!(orders[1].kind, OrderKind::Market);
    assert_eq!(orders[1].volume, dec!(0.0002));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_converts_pool_to_configured_currency() {
    // Pool kept in XBT: the shutdown handler spends the 52 USD pool on
    // XBT at the last traded price.
    let gateway = MockGateway::new(
        vec![dec!(100), dec!(126), dec!(100), dec!(126)],
        balances(&[("USD", dec!(1000))]),
    );
    let mut params = base_params();
    params.max_quote_spend = dec!(100);
    params.sell_trigger_profit = dec!(26);
    params.pool_target = Some(dec!(50));
    params.pool_currency = "XBT".into();
    let (_tx, rx) = session_channel();

    let report = TradeSession::new(&gateway, &params, rx).run().await;
    assert_eq!(report.end, SessionEnd::PoolTargetReached);

    shutdown::run(&gateway, &params, &report).await;

    let orders = gateway.recorded_orders();
    assert_eq!(orders.len(), 5);
    let conversion = &orders[4];
    assert_eq!(conversion.pair, "XBT/USD");
    assert_eq!(conversion.side, OrderSide::Buy);
    assert_eq!(conversion.volume, dec!(52) / dec!(126));
}
