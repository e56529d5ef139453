//! Graceful shutdown.
//!
//! Optionally flattens an open position (explicit policy, off by
//! default), converts the accumulated pool into the configured pool
//! currency, and says goodbye. Nothing in here is allowed to block
//! exit: every failure is logged and the process still terminates
//! cleanly.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::config::TradeParameters;
use crate::engine::trader::SessionReport;
use crate::exchange::ExchangeGateway;
use crate::types::{normalize_asset, OrderReceipt, OrderRequest, OrderSide};

/// Run the shutdown sequence. Always returns; the caller exits 0.
pub async fn run(gateway: &dyn ExchangeGateway, params: &TradeParameters, report: &SessionReport) {
    let pool = report.state.profit_pool;
    info!(end = %report.end, pool = %pool, "🌅 Graceful shutdown initiated");

    if let Some(position) = report.state.current_position {
        if params.flatten_on_shutdown {
            info!(position = %position, "Flattening open position before exit");
            let sell = OrderRequest::market(&params.pair, OrderSide::Sell, position.volume);
            match gateway.place_order(&sell).await {
                Ok(receipt) => info!(txid = %receipt.txid, "Open position flattened"),
                Err(e) => {
                    error!(error = %format!("{e:#}"), "Failed to flatten open position")
                }
            }
        } else {
            warn!(position = %position, "Open position left unresolved at shutdown");
        }
    }

    let pool_currency = normalize_asset(&params.pool_currency);
    if pool_currency != normalize_asset(params.quote()) && pool > Decimal::ZERO {
        info!(
            amount = %pool,
            currency = %pool_currency,
            "Converting profit pool at market price"
        );
        match convert_pool(gateway, params, pool).await {
            Ok(receipt) => info!(
                txid = %receipt.txid,
                volume = %receipt.volume,
                currency = %pool_currency,
                "Pool converted"
            ),
            Err(e) => error!(error = %format!("{e:#}"), "Pool conversion failed; exiting anyway"),
        }
    }

    info!("Good luck, and may your scalps be sharp ✨");
}

/// Buy `pool / price` of the pool currency with the accumulated quote.
async fn convert_pool(
    gateway: &dyn ExchangeGateway,
    params: &TradeParameters,
    pool: Decimal,
) -> Result<OrderReceipt> {
    let pair = format!(
        "{}/{}",
        normalize_asset(&params.pool_currency),
        normalize_asset(params.quote())
    );
    let price = gateway
        .get_ticker(&pair)
        .await
        .context("querying ticker for pool conversion")?;
    if price <= Decimal::ZERO {
        bail!("conversion price for {pair} is not positive: {price}");
    }
    let volume = pool / price;
    if volume <= Decimal::ZERO {
        bail!("conversion volume for {pair} is not positive: {volume}");
    }

    gateway
        .place_order(&OrderRequest::market(&pair, OrderSide::Buy, volume))
        .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
