//! Interactive parameter setup wizard.
//!
//! Collects a full `TradeParameters` record over stdin on first run (or
//! when a saved preset fails validation). Every answer has a sensible
//! default; limit prices are restricted to the three suggested discounts
//! so a limit buy can never be priced above market.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::io::Write;
use std::str::FromStr;

use crate::config::{suggest_limit_prices, NoFundsPolicy, TradeParameters};
use crate::exchange::ExchangeGateway;
use crate::types::{normalize_asset, split_pair, OrderKind};

const DEFAULT_PAIR: &str = "XBT/USD";

/// Run the wizard against a live gateway and return a draft record
/// (still subject to `build_parameters` validation).
pub async fn collect(gateway: &dyn ExchangeGateway) -> Result<TradeParameters> {
    println!("\n--- Parameter Setup Wizard ---\n");

    let pair = prompt_or("Trading pair? (e.g. XBT/USD)", DEFAULT_PAIR)?.to_uppercase();
    let (default_base, default_quote) = match split_pair(&pair) {
        Some((b, q)) => (b.to_string(), q.to_string()),
        None => ("XBT".to_string(), "USD".to_string()),
    };

    let balances = gateway
        .get_balances()
        .await
        .context("fetching balances for the setup wizard")?;
    println!("Available balances:");
    let mut codes: Vec<_> = balances.keys().collect();
    codes.sort();
    for code in codes {
        println!("  {code}: {}", balances[code]);
    }

    let mut currency = normalize_asset(&prompt_or("Currency to use?", &default_base)?);
    if !balances.contains_key(&currency) {
        println!("{currency} not in balances, defaulting to {default_base}");
        currency = normalize_asset(&default_base);
    }
    let available = balances.get(&currency).copied().unwrap_or_default();

    let balance_to_use = prompt_decimal(
        &format!("Amount of {currency} to trade (max {available})"),
        available,
    )?
    .min(available);

    let order_type = match prompt_or("Order type—1) Market  2) Limit", "1")?.as_str() {
        "2" => OrderKind::Limit,
        _ => OrderKind::Market,
    };
    let limit_price = if order_type == OrderKind::Limit {
        let last = gateway
            .get_ticker(&pair)
            .await
            .context("fetching ticker for limit price suggestions")?;
        let suggestions = suggest_limit_prices(last);
        println!("Suggested limit prices (below last trade at {last}):");
        for (i, price) in suggestions.iter().enumerate() {
            println!("  {}) {price}", i + 1);
        }
        let choice = prompt_choice("Choose suggestion", suggestions.len(), 1)?;
        Some(suggestions[choice - 1])
    } else {
        None
    };

    let max_quote_spend =
        prompt_decimal(&format!("Max trade size ({default_quote})"), dec!(10))?;
    let sell_trigger_profit = prompt_decimal(
        &format!("Profit per trade to trigger sell ({default_quote})"),
        dec!(1),
    )?;

    let pool_target = prompt_pool_target(&default_quote)?;
    let pool_currency = prompt_or(
        &format!("Profit-pool currency—e.g. {default_quote}, XBT, ETH"),
        &default_quote,
    )?
    .to_uppercase();

    let no_funds_policy =
        match prompt_or("When funds run out—1) Shut down  2) Wait and retry", "1")?.as_str() {
            "2" => NoFundsPolicy::WaitAndRetry,
            _ => NoFundsPolicy::Shutdown,
        };
    let credit_fallback_to_pool = confirm("Credit fallback-sale profit to the pool?", true)?;
    let flatten_on_shutdown = confirm("Flatten an open position at shutdown?", false)?;
    let fallback_sell_amount = prompt_optional_decimal(&format!(
        "{currency} reserved for fallback sells (blank = entire balance)"
    ))?;

    let poll_interval_secs = prompt_parse("Polling interval in seconds", 30u64)?;
    let verbose = prompt_or("Logging detail—1) Minimal  2) Verbose", "1")? == "2";

    Ok(TradeParameters {
        pair,
        currency,
        balance_to_use,
        fallback_sell_amount,
        order_type,
        limit_price,
        max_quote_spend,
        sell_trigger_profit,
        pool_target,
        pool_currency,
        no_funds_policy,
        credit_fallback_to_pool,
        flatten_on_shutdown,
        poll_interval_secs,
        verbose,
    })
}

/// Yes/no question; empty answer takes the default.
pub fn confirm(question: &str, default_yes: bool) -> Result<bool> {
    let hint = if default_yes { "Y/n" } else { "y/N" };
    let answer = prompt(&format!("{question} ({hint})"))?.to_lowercase();
    Ok(match answer.as_str() {
        "" => default_yes,
        "y" | "yes" => true,
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// Prompt helpers
// ---------------------------------------------------------------------------

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    std::io::stdout().flush().context("Failed to flush stdout")?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn prompt_or(label: &str, default: &str) -> Result<String> {
    let answer = prompt(&format!("{label} [default {default}]"))?;
    Ok(if answer.is_empty() {
        default.to_string()
    } else {
        answer
    })
}

fn prompt_parse<T: FromStr + std::fmt::Display + Copy>(label: &str, default: T) -> Result<T> {
    loop {
        let raw = prompt_or(label, &default.to_string())?;
        match raw.parse() {
            Ok(value) => return Ok(value),
            Err(_) => println!("Could not parse '{raw}', try again."),
        }
    }
}

fn prompt_decimal(label: &str, default: Decimal) -> Result<Decimal> {
    prompt_parse(label, default)
}

/// Decimal prompt where an empty answer means "no value".
fn prompt_optional_decimal(label: &str) -> Result<Option<Decimal>> {
    loop {
        let raw = prompt(label)?;
        if raw.is_empty() {
            return Ok(None);
        }
        match raw.parse() {
            Ok(value) => return Ok(Some(value)),
            Err(_) => println!("Could not parse '{raw}', try again."),
        }
    }
}

/// Numbered menu choice, 1-based.
fn prompt_choice(label: &str, count: usize, default: usize) -> Result<usize> {
    loop {
        let raw = prompt_or(label, &default.to_string())?;
        match raw.parse::<usize>() {
            Ok(choice) if (1..=count).contains(&choice) => return Ok(choice),
            _ => println!("Enter a number between 1 and {count}."),
        }
    }
}

fn prompt_pool_target(quote: &str) -> Result<Option<Decimal>> {
    loop {
        let raw = prompt(&format!(
            "Target profit-pool before shutdown ({quote}) [default 50, 'none' to run until interrupted]"
        ))?;
        match parse_pool_target(&raw) {
            Ok(target) => return Ok(target),
            Err(_) => println!("Could not parse '{raw}', try again."),
        }
    }
}

/// Blank → the default target; `none` → run until interrupted.
fn parse_pool_target(raw: &str) -> Result<Option<Decimal>> {
    match raw.trim().to_lowercase().as_str() {
        "" => Ok(Some(dec!(50))),
        "none" => Ok(None),
        other => Ok(Some(other.parse::<Decimal>()?)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
