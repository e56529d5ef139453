//! Mock exchange gateway for integration testing.
//!
//! A deterministic `ExchangeGateway` implementation: ticker prices come
//! from a scripted sequence (the last price repeats once the script is
//! exhausted), balances are fully controllable, and every accepted
//! order is recorded — all in-memory with no external dependencies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Mutex;

use scalper::exchange::ExchangeGateway;
use scalper::types::{Balances, OrderReceipt, OrderRejected, OrderRequest};

pub struct MockGateway {
    prices: Mutex<VecDeque<Decimal>>,
    balances: Mutex<Balances>,
    orders: Mutex<Vec<OrderRequest>>,
    /// Reject the next N AddOrder calls with an exchange error payload.
    reject_next: Mutex<u32>,
    rejections: Mutex<u32>,
    /// Balance snapshots to install once N orders have been accepted.
    scheduled_balances: Mutex<Vec<(usize, Balances)>>,
    /// If set, ticker and balance queries fail with this message.
    force_error: Mutex<Option<String>>,
}

impl MockGateway {
    pub fn new(prices: Vec<Decimal>, balances: Balances) -> Self {
        Self {
            prices: Mutex::new(prices.into()),
            balances: Mutex::new(balances),
            orders: Mutex::new(Vec::new()),
            reject_next: Mutex::new(0),
            rejections: Mutex::new(0),
            scheduled_balances: Mutex::new(Vec::new()),
            force_error: Mutex::new(None),
        }
    }

    /// All orders the exchange accepted, in placement order.
    pub fn recorded_orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    pub fn reject_next_orders(&self, count: u32) {
        *self.reject_next.lock().unwrap() = count;
    }

    pub fn rejection_count(&self) -> u32 {
        *self.rejections.lock().unwrap()
    }

    /// Install `balances` once `after_orders` orders have been accepted.
    pub fn schedule_balances(&self, after_orders: usize, balances: Balances) {
        self.scheduled_balances
            .lock()
            .unwrap()
            .push((after_orders, balances));
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    fn check_error(&self) -> Result<()> {
        if let Some(msg) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{msg}"));
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn get_ticker(&self, _pair: &str) -> Result<Decimal> {
        self.check_error()?;
        let mut prices = self.prices.lock().unwrap();
        match prices.len() {
            0 => Err(anyhow!("price script exhausted")),
            1 => Ok(prices[0]),
            _ => Ok(prices.pop_front().unwrap()),
        }
    }

    async fn get_balances(&self) -> Result<Balances> {
        self.check_error()?;
        Ok(self.balances.lock().unwrap().clone())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderReceipt> {
        {
            let mut reject = self.reject_next.lock().unwrap();
            if *reject > 0 {
                *reject -= 1;
                *self.rejections.lock().unwrap() += 1;
                return Err(OrderRejected("EOrder:Insufficient funds".into()).into());
            }
        }

        let accepted = {
            let mut orders = self.orders.lock().unwrap();
            orders.push(order.clone());
            orders.len()
        };

        let mut scheduled = self.scheduled_balances.lock().unwrap();
        for (after, balances) in scheduled.iter() {
            if *after == accepted {
                *self.balances.lock().unwrap() = balances.clone();
            }
        }
        scheduled.retain(|(after, _)| *after != accepted);

        Ok(OrderReceipt {
            txid: format!("MOCK-{accepted}"),
            pair: order.pair.clone(),
            side: order.side,
            kind: order.kind,
            volume: order.volume,
            limit_price: order.limit_price,
            timestamp: chrono::Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use scalper::types::OrderSide;

    fn usd(amount: Decimal) -> Balances {
        let mut b = Balances::new();
        b.insert("USD".to_string(), amount);
        b
    }

    #[tokio::test]
    async fn test_price_script_repeats_last() {
        let gw = MockGateway::new(vec![dec!(100), dec!(110)], usd(dec!(50)));
        assert_eq!(gw.get_ticker("XBT/USD").await.unwrap(), dec!(100));
        assert_eq!(gw.get_ticker("XBT/USD").await.unwrap(), dec!(110));
        assert_eq!(gw.get_ticker("XBT/USD").await.unwrap(), dec!(110));
    }

    #[tokio::test]
    async fn test_orders_recorded_and_rejections_counted() {
        let gw = MockGateway::new(vec![dec!(100)], usd(dec!(50)));
        gw.reject_next_orders(1);

        let order = OrderRequest::market("XBT/USD", OrderSide::Buy, dec!(1));
        assert!(gw.place_order(&order).await.is_err());
        assert!(gw.place_order(&order).await.is_ok());

        assert_eq!(gw.rejection_count(), 1);
        assert_eq!(gw.recorded_orders().len(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_balances_swap_in() {
        let gw = MockGateway::new(vec![dec!(100)], usd(dec!(50)));
        gw.schedule_balances(1, usd(dec!(0)));

        assert_eq!(gw.get_balances().await.unwrap()["USD"], dec!(50));
        let order = OrderRequest::market("XBT/USD", OrderSide::Sell, dec!(1));
        gw.place_order(&order).await.unwrap();
        assert_eq!(gw.get_balances().await.unwrap()["USD"], dec!(0));
    }

    #[tokio::test]
    async fn test_forced_error() {
        let gw = MockGateway::new(vec![dec!(100)], usd(dec!(50)));
        gw.set_error("simulated outage");
        assert!(gw.get_ticker("XBT/USD").await.is_err());
        assert!(gw.get_balances().await.is_err());
        gw.clear_error();
        assert!(gw.get_ticker("XBT/USD").await.is_ok());
    }
}
