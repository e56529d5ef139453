//! Kraken REST integration.
//!
//! Public ticker plus the private Balance and AddOrder endpoints. Private
//! calls carry the standard Kraken signature: `API-Sign` is
//! HMAC-SHA512(path ‖ SHA256(nonce ‖ postdata)) keyed with the
//! base64-decoded API secret.
//!
//! API docs: https://docs.kraken.com/rest/
//! Base URL: https://api.kraken.com

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use tracing::debug;

use super::ExchangeGateway;
use crate::credentials::ApiCredentials;
use crate::types::{normalize_asset, Balances, OrderKind, OrderReceipt, OrderRejected, OrderRequest};

const BASE_URL: &str = "https://api.kraken.com";
const EXCHANGE_NAME: &str = "kraken";

// ---------------------------------------------------------------------------
// API response types (Kraken JSON → Rust)
// ---------------------------------------------------------------------------

/// Every Kraken response wraps the payload with an error array; a
/// non-empty array means the request failed even when HTTP says 200.
#[derive(Debug, Deserialize)]
struct KrakenResponse<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

impl<T> KrakenResponse<T> {
    fn into_result(self, operation: &str) -> Result<T> {
        if !self.error.is_empty() {
            bail!("{operation} failed: {}", self.error.join("; "));
        }
        self.result
            .ok_or_else(|| anyhow!("{operation} returned no result"))
    }
}

/// One pair entry from `/0/public/Ticker`. We only need `c`, the
/// last-trade-closed `[price, lot volume]` array.
#[derive(Debug, Deserialize)]
struct TickerEntry {
    c: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AddOrderResult {
    #[serde(default)]
    txid: Vec<String>,
}

/// Extract the last traded price from a ticker result map.
fn last_price(result: HashMap<String, TickerEntry>) -> Result<Decimal> {
    let entry = result
        .into_values()
        .next()
        .ok_or_else(|| anyhow!("Ticker response contained no pairs"))?;
    let raw = entry
        .c
        .first()
        .ok_or_else(|| anyhow!("Ticker entry missing last-trade price"))?;
    raw.parse::<Decimal>()
        .with_context(|| format!("Failed to parse last price '{raw}'"))
}

/// Compute the `API-Sign` header value for a private request.
fn sign_request(secret_b64: &str, path: &str, nonce: &str, post: &str) -> Result<String> {
    let secret = BASE64
        .decode(secret_b64)
        .context("API secret is not valid base64")?;

    let mut hasher = Sha256::new();
    hasher.update(nonce.as_bytes());
    hasher.update(post.as_bytes());
    let digest = hasher.finalize();

    let mut mac = Hmac::<Sha512>::new_from_slice(&secret)
        .map_err(|_| anyhow!("API secret has an invalid length"))?;
    mac.update(path.as_bytes());
    mac.update(&digest);

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Kraken exchange client.
pub struct KrakenClient {
    http: Client,
    api_key: SecretString,
    api_secret: SecretString,
}

impl KrakenClient {
    pub fn new(credentials: ApiCredentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("scalper/0.1.0 (kraken-scalping-bot)")
            .build()
            .context("Failed to build HTTP client for Kraken")?;

        Ok(Self {
            http,
            api_key: credentials.key,
            api_secret: credentials.secret,
        })
    }

    /// Kraken's condensed pair form: `XBT/USD` → `XBTUSD`.
    fn pair_code(pair: &str) -> String {
        pair.replace('/', "").to_uppercase()
    }

    /// POST a signed private request and return the raw wrapped response.
    async fn private_post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<KrakenResponse<T>> {
        let nonce = Utc::now().timestamp_millis().to_string();

        let mut post = format!("nonce={nonce}");
        for (key, value) in params {
            post.push('&');
            post.push_str(key);
            post.push('=');
            post.push_str(&urlencoding::encode(value));
        }

        let signature = sign_request(self.api_secret.expose_secret(), path, &nonce, &post)?;

        debug!(path, "Kraken private request");

        let resp = self
            .http
            .post(format!("{BASE_URL}{path}"))
            .header("API-Key", self.api_key.expose_secret())
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(post)
            .send()
            .await
            .with_context(|| format!("Kraken request to {path} failed"))?;

        resp.json::<KrakenResponse<T>>()
            .await
            .with_context(|| format!("Failed to parse Kraken response from {path}"))
    }
}

#[async_trait]
impl ExchangeGateway for KrakenClient {
    async fn get_ticker(&self, pair: &str) -> Result<Decimal> {
        let code = Self::pair_code(pair);
        let url = format!("{BASE_URL}/0/public/Ticker?pair={}", urlencoding::encode(&code));

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Ticker request for {code} failed"))?;

        let wrapped: KrakenResponse<HashMap<String, TickerEntry>> = resp
            .json()
            .await
            .context("Failed to parse Ticker response")?;

        let price = last_price(wrapped.into_result("Ticker")?)?;
        debug!(pair = %code, price = %price, "Ticker");
        Ok(price)
    }

    async fn get_balances(&self) -> Result<Balances> {
        let wrapped: KrakenResponse<HashMap<String, String>> =
            self.private_post("/0/private/Balance", &[]).await?;
        let raw = wrapped.into_result("Balance")?;

        let mut balances = Balances::new();
        for (code, value) in raw {
            let amount = value
                .parse::<Decimal>()
                .with_context(|| format!("Failed to parse balance '{value}' for {code}"))?;
            if amount > Decimal::ZERO {
                balances.insert(normalize_asset(&code), amount);
            }
        }
        Ok(balances)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderReceipt> {
        let code = Self::pair_code(&order.pair);

        let mut params = vec![
            ("pair", code.clone()),
            ("type", order.side.to_string()),
            ("ordertype", order.kind.to_string()),
            ("volume", order.volume.normalize().to_string()),
        ];
        if order.kind == OrderKind::Limit {
            let price = order
                .limit_price
                .ok_or_else(|| anyhow!("limit order without a limit price"))?;
            params.push(("price", price.normalize().to_string()));
        }

        let wrapped: KrakenResponse<AddOrderResult> =
            self.private_post("/0/private/AddOrder", &params).await?;

        // AddOrder errors are the exchange rejecting the order itself.
        if !wrapped.error.is_empty() {
            return Err(OrderRejected(wrapped.error.join("; ")).into());
        }
        let result = wrapped
            .result
            .ok_or_else(|| anyhow!("AddOrder returned no result"))?;
        let txid = result
            .txid
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("AddOrder returned no transaction id"))?;

        Ok(OrderReceipt {
            txid,
            pair: order.pair.clone(),
            side: order.side,
            kind: order.kind,
            volume: order.volume,
            limit_price: order.limit_price,
            timestamp: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        EXCHANGE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
