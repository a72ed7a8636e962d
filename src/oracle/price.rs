//! Fiat price source backed by the CryptoCompare HTTP API

use crate::error::{SwapError, SwapResult};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Live price lookup of `symbol` quoted in `fiat`
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(&self, symbol: &str, fiat: &str) -> SwapResult<Decimal>;
}

pub struct CryptoCompare {
    client: Client,
    base_url: String,
    api_key: String,
}

impl CryptoCompare {
    pub fn new(base_url: &str, api_key: &str) -> SwapResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SwapError::PriceFeed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl PriceSource for CryptoCompare {
    async fn fetch_price(&self, symbol: &str, fiat: &str) -> SwapResult<Decimal> {
        debug!("Fetching {} price in {}", symbol, fiat);

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("fsym", symbol), ("tsyms", fiat), ("api_key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| SwapError::PriceFeed(format!("API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SwapError::PriceFeed(format!(
                "API returned error status {}: {}",
                status, body
            )));
        }

        let quotes = response
            .json::<HashMap<String, Decimal>>()
            .await
            .map_err(|e| SwapError::PriceFeed(format!("Failed to parse response: {}", e)))?;

        quotes
            .get(fiat)
            .copied()
            .ok_or_else(|| SwapError::PriceFeed(format!("No {} quote for {}", fiat, symbol)))
    }
}
