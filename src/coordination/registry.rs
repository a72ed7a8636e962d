//! Swap address registry
//!
//! Holds, per platform, the external addresses the swapper controls and the
//! native address each one is paired with. Lookups normalize the queried
//! address the way the platform compares addresses.

use crate::config::{PlatformKind, Settings};

use dashmap::DashMap;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapAddress {
    pub local: String,
    pub external: String,
}

#[derive(Default)]
pub struct AddressRegistry {
    addresses: DashMap<String, Vec<SwapAddress>>,
    kinds: DashMap<String, PlatformKind>,
    cold_storage: DashMap<String, String>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let registry = Self::new();
        for (name, platform) in settings.enabled_platforms() {
            registry.register_platform(name, platform.kind);
            for address in &platform.swap_addresses {
                registry.register(name, &address.local, &address.external);
            }
            if let Some(cold) = &platform.cold_storage {
                registry.cold_storage.insert(name.clone(), cold.clone());
            }
        }
        registry
    }

    pub fn register_platform(&self, platform: &str, kind: PlatformKind) {
        self.kinds.insert(platform.to_string(), kind);
        self.addresses.entry(platform.to_string()).or_default();
    }

    fn normalize(&self, platform: &str, address: &str) -> String {
        match self.kinds.get(platform) {
            Some(kind) => kind.normalize_address(address),
            None => address.trim().to_string(),
        }
    }

    /// Add a swap address; `false` if the external address is already known
    pub fn register(&self, platform: &str, local: &str, external: &str) -> bool {
        let external = self.normalize(platform, external);
        let mut entry = self.addresses.entry(platform.to_string()).or_default();
        if entry.iter().any(|a| a.external == external) {
            return false;
        }
        info!("Registered {} swap address {} for {}", platform, external, local);
        entry.push(SwapAddress {
            local: local.to_string(),
            external,
        });
        true
    }

    pub fn is_swap_address(&self, platform: &str, address: &str) -> bool {
        let address = self.normalize(platform, address);
        self.addresses
            .get(platform)
            .map(|entry| entry.iter().any(|a| a.external == address))
            .unwrap_or(false)
    }

    /// Swap addresses and the platform's cold storage: transfers between them are internal
    pub fn is_controlled(&self, platform: &str, address: &str) -> bool {
        if self.is_swap_address(platform, address) {
            return true;
        }
        let address = self.normalize(platform, address);
        self.cold_storage
            .get(platform)
            .map(|cold| *cold == address)
            .unwrap_or(false)
    }

    pub fn list(&self, platform: &str) -> Vec<SwapAddress> {
        self.addresses
            .get(platform)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn externals(&self, platform: &str) -> Vec<String> {
        self.list(platform).into_iter().map(|a| a.external).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ethereum_lookups_ignore_case() {
        let registry = AddressRegistry::new();
        registry.register_platform("ethereum", PlatformKind::Ethereum);
        assert!(registry.register("ethereum", "P2KLocal", "0xABCDEF0000000000000000000000000000000001"));
        assert!(!registry.register("ethereum", "P2KOther", "0xabcdef0000000000000000000000000000000001"));

        assert!(registry.is_swap_address("ethereum", "0xAbCdEf0000000000000000000000000000000001"));
        let listed = registry.list("ethereum");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].local, "P2KLocal");
        assert_eq!(listed[0].external, "0xabcdef0000000000000000000000000000000001");
    }

    #[test]
    fn test_neo_addresses_are_case_sensitive() {
        let registry = AddressRegistry::new();
        registry.register_platform("neo", PlatformKind::Neo);
        registry.register("neo", "P2KLocal", "AQnjXUh1pukb34ugWxQvqEZaYDVB4jd6z1");

        assert!(registry.is_swap_address("neo", "AQnjXUh1pukb34ugWxQvqEZaYDVB4jd6z1"));
        assert!(!registry.is_swap_address("neo", "aqnjxuh1pukb34ugwxqveqzaydvb4jd6z1"));
        assert!(!registry.is_swap_address("ethereum", "AQnjXUh1pukb34ugWxQvqEZaYDVB4jd6z1"));
        assert!(registry.list("tron").is_empty());
    }
}
