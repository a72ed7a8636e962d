//! Configuration management for the interop swapper
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::interop::address::neo_script_hash_from_address;

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub swapper: SwapperConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    pub node: NodeConfig,
    pub platforms: HashMap<String, PlatformConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapperConfig {
    pub poll_interval_ms: u64,
    pub health_check_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    #[serde(default = "default_verify_delay_secs")]
    pub verify_delay_secs: u64,
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,
}

impl SwapperConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// CryptoCompare key; empty after substitution means unset
    #[serde(default)]
    pub price_api_key: Option<String>,
    #[serde(default = "default_price_url")]
    pub price_url: String,
    #[serde(default = "default_fiat_symbol")]
    pub fiat_symbol: String,
    #[serde(default = "default_staking_symbol")]
    pub staking_symbol: String,
    #[serde(default = "default_fuel_symbol")]
    pub fuel_symbol: String,
    #[serde(default = "default_fuel_price_divisor")]
    pub fuel_price_divisor: u32,
    #[serde(default = "default_cache_ttl_secs")]
    pub fee_ttl_secs: i64,
    #[serde(default = "default_cache_ttl_secs")]
    pub price_ttl_secs: i64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            price_api_key: None,
            price_url: default_price_url(),
            fiat_symbol: default_fiat_symbol(),
            staking_symbol: default_staking_symbol(),
            fuel_symbol: default_fuel_symbol(),
            fuel_price_divisor: default_fuel_price_divisor(),
            fee_ttl_secs: default_cache_ttl_secs(),
            price_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl OracleConfig {
    pub fn api_key(&self) -> Option<&str> {
        self.price_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Native chain node the swapper settles inbound swaps on
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub rpc_urls: Vec<String>,
    pub signer_url: String,
    #[serde(default = "default_chain")]
    pub chain: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Neo,
    Ethereum,
}

impl PlatformKind {
    /// Canonical textual form of an external address on this platform
    pub fn normalize_address(&self, address: &str) -> String {
        match self {
            PlatformKind::Neo => address.trim().to_string(),
            PlatformKind::Ethereum => address.trim().to_lowercase(),
        }
    }

    pub fn is_valid_address(&self, address: &str) -> bool {
        match self {
            PlatformKind::Neo => neo_script_hash_from_address(address.trim()).is_some(),
            PlatformKind::Ethereum => address.trim().parse::<Address>().is_ok(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    pub kind: PlatformKind,
    #[serde(default = "default_chain")]
    pub chain: String,
    pub enabled: bool,
    /// Platform index embedded in interop-kind native addresses
    pub platform_id: u8,
    pub rpc_urls: Vec<String>,
    #[serde(default)]
    pub interop_height: u64,
    #[serde(default)]
    pub quick_sync: bool,
    #[serde(default)]
    pub quick_sync_contract: Option<String>,
    #[serde(default)]
    pub swap_addresses: Vec<SwapAddressConfig>,
    #[serde(default)]
    pub cold_storage: Option<String>,
    /// Allow-listed assets keyed by asset id or token contract
    #[serde(default)]
    pub assets: HashMap<String, AssetConfig>,
    #[serde(default)]
    pub native_asset: Option<AssetConfig>,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Gas limit of a token (ERC20) settlement
    #[serde(default = "default_token_gas_limit")]
    pub token_gas_limit: u64,
    /// Flat fee in fiat units for platforms without a gas market
    #[serde(default = "default_fixed_fee")]
    pub fixed_fee: u64,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub private_key_env: Option<String>,
}

impl PlatformConfig {
    pub fn asset(&self, id: &str) -> Option<&AssetConfig> {
        self.assets.get(&normalize_asset_id(id))
    }

    fn normalize(&mut self) {
        let kind = self.kind;
        self.assets = self
            .assets
            .drain()
            .map(|(id, asset)| (normalize_asset_id(&id), asset))
            .collect();
        for address in &mut self.swap_addresses {
            address.external = kind.normalize_address(&address.external);
        }
        self.cold_storage = self
            .cold_storage
            .take()
            .map(|address| kind.normalize_address(&address));
    }
}

/// A local (native) address paired with the external address it controls
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SwapAddressConfig {
    pub local: String,
    pub external: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AssetConfig {
    pub symbol: String,
    pub decimals: u8,
}

fn default_batch_size() -> u64 {
    8
}
fn default_retry_initial_ms() -> u64 {
    1_000
}
fn default_retry_max_ms() -> u64 {
    60_000
}
fn default_verify_delay_secs() -> u64 {
    15
}
fn default_verify_attempts() -> u32 {
    5
}
fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_price_url() -> String {
    "https://min-api.cryptocompare.com/data/price".to_string()
}
fn default_fiat_symbol() -> String {
    "USD".to_string()
}
fn default_staking_symbol() -> String {
    "SOUL".to_string()
}
fn default_fuel_symbol() -> String {
    "KCAL".to_string()
}
fn default_fuel_price_divisor() -> u32 {
    5
}
fn default_cache_ttl_secs() -> i64 {
    60
}
fn default_chain() -> String {
    "main".to_string()
}
fn default_gas_limit() -> u64 {
    21_000
}
fn default_token_gas_limit() -> u64 {
    100_000
}
fn default_fixed_fee() -> u64 {
    10_000_000
}

fn normalize_asset_id(id: &str) -> String {
    let id = id.trim().to_lowercase();
    id.strip_prefix("0x").map(str::to_string).unwrap_or(id)
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("INTEROP_SWAPPER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse, normalize and validate settings from TOML text
    pub fn from_toml(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input)?;

        let mut settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        for platform in settings.platforms.values_mut() {
            platform.normalize();
        }

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_platforms().is_empty() {
            anyhow::bail!("At least one platform must be enabled");
        }

        for (name, platform) in self.enabled_platforms() {
            if platform.rpc_urls.is_empty() {
                anyhow::bail!("Platform {} has no RPC URLs configured", name);
            }
            if platform.swap_addresses.is_empty() {
                tracing::warn!("Platform {} has no swap addresses - nothing will be detected", name);
            }
            if platform.quick_sync && platform.quick_sync_contract.is_none() {
                anyhow::bail!("Platform {} enables quick sync without a contract", name);
            }
        }

        if self.node.rpc_urls.is_empty() {
            anyhow::bail!("Native node has no RPC URLs configured");
        }

        if self.storage.backend == StorageBackend::Postgres && self.storage.url.is_empty() {
            anyhow::bail!("Postgres storage selected without a database url");
        }

        if self.swapper.batch_size == 0 {
            anyhow::bail!("Batch size must be at least 1");
        }

        Ok(())
    }

    /// Get list of enabled platforms, sorted by name
    pub fn enabled_platforms(&self) -> Vec<(&String, &PlatformConfig)> {
        let mut platforms: Vec<_> = self.platforms.iter().filter(|(_, p)| p.enabled).collect();
        platforms.sort_by(|a, b| a.0.cmp(b.0));
        platforms
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[swapper]
poll_interval_ms = 2500
health_check_interval_secs = 30

[storage]
backend = "memory"

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[oracle]
price_api_key = "${SWAPPER_TEST_MISSING_KEY}"

[node]
rpc_urls = ["http://localhost:7077/rpc"]
signer_url = "http://localhost:7078"

[platforms.neo]
kind = "neo"
enabled = true
platform_id = 1
rpc_urls = ["http://seed1.example:10332"]
interop_height = 4000000
swap_addresses = [{ local = "P2KAddress", external = "AQnjXUh1pukb34ugWxQvqEZaYDVB4jd6z1" }]

[platforms.neo.assets]
"0xC56F33FC6ECFCD0C225C4AB356FEE59390AF8560BE0E930FAEBE74A6DAFF7C9B" = { symbol = "NEO", decimals = 0 }

[platforms.ethereum]
kind = "ethereum"
enabled = false
platform_id = 2
rpc_urls = []
swap_addresses = [{ local = "P2KOther", external = "0xABCDEF0000000000000000000000000000000001" }]
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_sample_settings() {
        let settings = Settings::from_toml(SAMPLE).unwrap();

        assert_eq!(settings.swapper.batch_size, 8);
        assert_eq!(settings.swapper.retry_max_ms, 60_000);
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.oracle.api_key(), None);
        assert_eq!(settings.oracle.fuel_price_divisor, 5);

        let enabled = settings.enabled_platforms();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].0, "neo");

        let neo = &settings.platforms["neo"];
        let asset = neo
            .asset("c56f33fc6ecfcd0c225c4ab356fee59390af8560be0e930faebe74a6daff7c9b")
            .unwrap();
        assert_eq!(asset.symbol, "NEO");
        assert_eq!(asset.decimals, 0);

        let eth = &settings.platforms["ethereum"];
        assert_eq!(
            eth.swap_addresses[0].external,
            "0xabcdef0000000000000000000000000000000001"
        );
    }

    #[test]
    fn test_address_validation_per_kind() {
        let eth = PlatformKind::Ethereum;
        assert!(eth.is_valid_address("0xABCDEF0000000000000000000000000000000001"));
        assert!(!eth.is_valid_address("0xabcdef"));

        let neo = PlatformKind::Neo;
        let address = crate::interop::address::neo_address_from_public_key(&[0x02; 33]);
        assert!(neo.is_valid_address(&address));
        assert!(!neo.is_valid_address("0xABCDEF0000000000000000000000000000000001"));
    }

    #[test]
    fn test_enabled_platform_needs_rpc_urls() {
        let broken = SAMPLE.replace(
            "rpc_urls = [\"http://seed1.example:10332\"]",
            "rpc_urls = []",
        );
        assert!(Settings::from_toml(&broken).is_err());
    }
}
