//! Multi-endpoint JSON-RPC transport
//!
//! Every call picks one of the configured endpoints at random to spread load
//! across external nodes. Calls that need endpoint-local state (mempool
//! lookups after a broadcast) address a specific endpoint by url.

use crate::error::{SwapError, SwapResult};

use ethers::providers::{Http, Provider};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, warn};

/// The configured RPC endpoints of one platform
pub struct RpcEndpoints {
    platform: String,
    endpoints: Vec<(String, Provider<Http>)>,
}

impl RpcEndpoints {
    /// Create the endpoint set, skipping urls that do not parse
    pub fn new(platform: &str, urls: &[String]) -> SwapResult<Self> {
        let mut endpoints = Vec::new();

        for url in urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    endpoints.push((url.clone(), provider));
                    debug!("Added RPC endpoint for {}: {}", platform, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if endpoints.is_empty() {
            return Err(SwapError::Config(format!(
                "No valid RPC endpoints configured for {}",
                platform
            )));
        }

        Ok(Self {
            platform: platform.to_string(),
            endpoints,
        })
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn urls(&self) -> Vec<String> {
        self.endpoints.iter().map(|(url, _)| url.clone()).collect()
    }

    /// A random endpoint for load distribution
    pub fn pick(&self) -> (&str, &Provider<Http>) {
        let idx = rand::thread_rng().gen_range(0..self.endpoints.len());
        let (url, provider) = &self.endpoints[idx];
        (url.as_str(), provider)
    }

    /// The endpoint registered under `url`
    pub fn endpoint(&self, url: &str) -> SwapResult<&Provider<Http>> {
        self.endpoints
            .iter()
            .find(|(candidate, _)| candidate == url)
            .map(|(_, provider)| provider)
            .ok_or_else(|| SwapError::Config(format!("Unknown endpoint {} for {}", url, self.platform)))
    }

    /// JSON-RPC call against a random endpoint
    pub async fn request<P, R>(&self, method: &str, params: P) -> SwapResult<R>
    where
        P: Debug + Serialize + Send + Sync,
        R: Serialize + DeserializeOwned + Debug + Send,
    {
        self.request_with_endpoint(method, params)
            .await
            .map(|(result, _)| result)
    }

    /// JSON-RPC call against a random endpoint, reporting which one served it
    pub async fn request_with_endpoint<P, R>(&self, method: &str, params: P) -> SwapResult<(R, String)>
    where
        P: Debug + Serialize + Send + Sync,
        R: Serialize + DeserializeOwned + Debug + Send,
    {
        let (url, provider) = self.pick();
        let result = provider
            .request(method, params)
            .await
            .map_err(|e| self.connection_error(method, url, e))?;
        Ok((result, url.to_string()))
    }

    /// JSON-RPC call against a specific endpoint
    pub async fn request_at<P, R>(&self, url: &str, method: &str, params: P) -> SwapResult<R>
    where
        P: Debug + Serialize + Send + Sync,
        R: Serialize + DeserializeOwned + Debug + Send,
    {
        self.endpoint(url)?
            .request(method, params)
            .await
            .map_err(|e| self.connection_error(method, url, e))
    }

    fn connection_error(&self, method: &str, url: &str, e: impl std::fmt::Display) -> SwapError {
        SwapError::ChainConnection {
            platform: self.platform.clone(),
            message: format!("{} via {} failed: {}", method, url, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_an_endpoint() {
        let err = RpcEndpoints::new("neo", &[]).err().unwrap();
        assert!(matches!(err, SwapError::Config(_)));
    }

    #[test]
    fn test_pick_stays_within_configured_set() {
        let urls = vec![
            "http://seed1.example:10332".to_string(),
            "http://seed2.example:10332".to_string(),
        ];
        let endpoints = RpcEndpoints::new("neo", &urls).unwrap();

        for _ in 0..16 {
            let (url, _) = endpoints.pick();
            assert!(urls.iter().any(|u| u == url));
        }
        assert!(endpoints.endpoint("http://seed2.example:10332").is_ok());
        assert!(endpoints.endpoint("http://other.example").is_err());
    }
}
