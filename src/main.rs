//! SCALPER — cyclic buy-low/sell-high scalping bot for Kraken.
//!
//! Entry point. Loads credentials and the saved preset (or runs the
//! first-run wizard), validates parameters against a live snapshot,
//! and runs the buy→wait→sell loop with graceful shutdown.

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use scalper::config::{self, TradeParameters, ValidationError};
use scalper::credentials::{self, FileCredentialStore};
use scalper::engine::shutdown;
use scalper::engine::trader::TradeSession;
use scalper::exchange::kraken::KrakenClient;
use scalper::exchange::ExchangeGateway;
use scalper::{storage, wizard};

const BANNER: &str = r#"
  ____   ____    _    _     ____  _____ ____
 / ___| / ___|  / \  | |   |  _ \| ____|  _ \
 \___ \| |     / _ \ | |   | |_) |  _| | |_) |
  ___) | |___ / ___ \| |___|  __/| |___|  _ <
 |____/ \____/_/   \_\_____|_|   |_____|_| \_\

  Buy low, wait, sell high, pool the difference
  v0.1.0 — Kraken scalping bot
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();
    println!("{BANNER}");

    // -- Setup: anything that fails here is fatal (exit 1) ---------------

    let mut store = FileCredentialStore::open(None)?;
    let api_credentials = credentials::obtain(&mut store)?;
    let gateway = KrakenClient::new(api_credentials)?;

    let params = setup_parameters(&gateway).await?;

    info!(
        pair = %params.pair,
        order_type = %params.order_type,
        max_quote_spend = %params.max_quote_spend,
        pool_target = ?params.pool_target,
        interval_secs = params.poll_interval_secs,
        "✨ Starting scalper. Press Ctrl+C to stop."
    );

    // -- Trading loop ------------------------------------------------------

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received.");
            let _ = cancel_tx.send(true);
        }
    });

    let report = TradeSession::new(&gateway, &params, cancel_rx).run().await;

    // In-loop errors never reach here; whatever ended the run, the
    // shutdown handler gets the final word and we exit 0.
    shutdown::run(&gateway, &params, &report).await;

    info!(
        pool = %report.state.profit_pool,
        cycles = report.state.cycles_completed,
        orders = report.state.orders_placed,
        "SCALPER shut down cleanly."
    );

    Ok(())
}

/// Build validated parameters from the saved preset, or the wizard.
///
/// A preset that fails validation is discarded in favour of the wizard;
/// wizard answers that fail validation re-prompt. Snapshot failures
/// (balance or ticker fetch) propagate — trading never starts blind.
async fn setup_parameters(gateway: &dyn ExchangeGateway) -> Result<TradeParameters> {
    if let Some(preset) = storage::load_preset(None)? {
        if wizard::confirm("Load saved preset?", true)? {
            match config::build_parameters(gateway, preset).await {
                Ok(params) => return Ok(params),
                Err(e) if e.downcast_ref::<ValidationError>().is_some() => {
                    warn!(error = %e, "Saved preset failed validation; starting wizard");
                }
                Err(e) => return Err(e),
            }
        }
    }

    let params = loop {
        let draft = wizard::collect(gateway).await?;
        match config::build_parameters(gateway, draft).await {
            Ok(params) => break params,
            Err(e) if e.downcast_ref::<ValidationError>().is_some() => {
                warn!(error = %e, "Parameters rejected; let's go again");
            }
            Err(e) => return Err(e),
        }
    };

    if wizard::confirm("Save these settings as preset?", true)? {
        storage::save_preset(&params, None)?;
        info!("Preset saved.");
    }

    Ok(params)
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scalper=info"));

    let json_logging = std::env::var("SCALPER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
