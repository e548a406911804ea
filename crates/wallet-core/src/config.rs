use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::address::WalletAddress;
use crate::error::{Result, WalletError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WalletConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub remote_timeout_ms: u64,
    pub rpc_url: String,
    pub registry_address: Option<String>,
    pub asset_contract_address: Option<String>,
    pub chain_timeout_ms: u64,
    pub max_enumerated_tokens: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:4000/api".into(),
            api_token: None,
            remote_timeout_ms: 5_000,
            rpc_url: "https://rpc.xinfin.network".into(),
            registry_address: None,
            asset_contract_address: None,
            chain_timeout_ms: 10_000,
            max_enumerated_tokens: 1_000,
        }
    }
}

impl WalletConfig {
    /// Reads `path` when it exists, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let data = std::fs::read(path)
                .map_err(|e| WalletError::Config(format!("read {}: {e}", path.display())))?;
            serde_json::from_slice(&data)
                .map_err(|e| WalletError::Config(format!("parse {}: {e}", path.display())))?
        } else {
            WalletConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("WALLET_API_URL") {
            self.api_base_url = url;
        }
        if let Some(token) = lookup("WALLET_API_TOKEN") {
            self.api_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(ms) = lookup("WALLET_REMOTE_TIMEOUT_MS") {
            self.remote_timeout_ms = parse_millis("WALLET_REMOTE_TIMEOUT_MS", &ms)?;
        }
        if let Some(url) = lookup("WALLET_RPC_URL") {
            self.rpc_url = url;
        }
        if let Some(addr) = lookup("WALLET_REGISTRY_ADDRESS") {
            self.registry_address = Some(addr);
        }
        if let Some(addr) = lookup("WALLET_NFT_ADDRESS") {
            self.asset_contract_address = Some(addr);
        }
        if let Some(ms) = lookup("WALLET_CHAIN_TIMEOUT_MS") {
            self.chain_timeout_ms = parse_millis("WALLET_CHAIN_TIMEOUT_MS", &ms)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        check_url("api_base_url", &self.api_base_url)?;
        check_url("rpc_url", &self.rpc_url)?;
        if self.remote_timeout_ms == 0 || self.chain_timeout_ms == 0 {
            return Err(WalletError::Config("timeouts must be greater than zero".into()));
        }
        if self.max_enumerated_tokens == 0 {
            return Err(WalletError::Config("max_enumerated_tokens must be at least 1".into()));
        }
        for (name, value) in [
            ("registry_address", &self.registry_address),
            ("asset_contract_address", &self.asset_contract_address),
        ] {
            if let Some(addr) = value {
                WalletAddress::parse(addr)
                    .map_err(|e| WalletError::Config(format!("{name}: {e}")))?;
            }
        }
        Ok(())
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn chain_timeout(&self) -> Duration {
        Duration::from_millis(self.chain_timeout_ms)
    }

    /// Both contract addresses, required before any chain read.
    pub fn contracts(&self) -> Result<(WalletAddress, WalletAddress)> {
        let registry = self
            .registry_address
            .as_deref()
            .ok_or_else(|| WalletError::Config("registry_address is not configured".into()))?;
        let assets = self
            .asset_contract_address
            .as_deref()
            .ok_or_else(|| WalletError::Config("asset_contract_address is not configured".into()))?;
        Ok((WalletAddress::parse(registry)?, WalletAddress::parse(assets)?))
    }
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| {
            WalletError::Config(format!("{key} must be an integer number of milliseconds"))
        })
}

fn check_url(name: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(WalletError::Config(format!("{name} must be an http(s) URL: {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        assert!(WalletConfig::default().validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("WALLET_API_URL", "https://store.example/api"),
            ("WALLET_REMOTE_TIMEOUT_MS", "250"),
            ("WALLET_NFT_ADDRESS", "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"),
        ]);
        let mut config = WalletConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.api_base_url, "https://store.example/api");
        assert_eq!(config.remote_timeout(), Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut config = WalletConfig::default();
        assert!(config
            .apply_overrides(|k| (k == "WALLET_CHAIN_TIMEOUT_MS").then(|| "soon".to_string()))
            .is_err());

        config.remote_timeout_ms = 0;
        assert!(config.validate().is_err());

        let config = WalletConfig {
            registry_address: Some("0x1234".into()),
            ..WalletConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_enumerated_tokens": 25}"#).unwrap();
        let config = WalletConfig::load(&path).unwrap();
        assert_eq!(config.max_enumerated_tokens, 25);
        assert_eq!(config.chain_timeout_ms, 10_000);
    }
}
