use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;

use wallet_core::{
    ChainReader, DeviceDetails, OwnershipEngine, Provenance, Result, Stage, WalletAddress,
    WalletError,
};

const OWNER: &str = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";

fn other() -> WalletAddress {
    WalletAddress::parse(&format!("0x{}", "9".repeat(40))).unwrap()
}

fn owner() -> WalletAddress {
    WalletAddress::parse(OWNER).unwrap()
}

/// Chain state for a single owner. Any lookup listed in `broken` fails.
#[derive(Default)]
struct FakeChain {
    devices: Vec<String>,
    device_tokens: HashMap<String, u64>,
    owners: HashMap<u64, WalletAddress>,
    enumerated: Vec<u64>,
    locators: HashMap<u64, String>,
    /// Device id the registry's token record reports; empty when absent.
    token_devices: HashMap<u64, String>,
    uris: HashMap<u64, String>,
    broken: HashSet<String>,
}

impl FakeChain {
    fn fail_if_broken(&self, key: String) -> Result<()> {
        if self.broken.contains(&key) {
            return Err(WalletError::ChainRead(format!("{key}: execution reverted")));
        }
        Ok(())
    }
}

fn small(token: U256) -> u64 {
    u64::try_from(token).unwrap()
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn devices_owned_by(&self, _owner: &WalletAddress) -> Result<Vec<String>> {
        self.fail_if_broken("devices".into())?;
        Ok(self.devices.clone())
    }

    async fn token_for_device(&self, device_id: &str) -> Result<Option<U256>> {
        self.fail_if_broken(format!("token:{device_id}"))?;
        Ok(self.device_tokens.get(device_id).map(|t| U256::from(*t)))
    }

    async fn device_details(&self, token_id: U256) -> Result<DeviceDetails> {
        let token = small(token_id);
        self.fail_if_broken(format!("details:{token}"))?;
        Ok(DeviceDetails {
            device_id: self.token_devices.get(&token).cloned().unwrap_or_default(),
            resource_locator: self.locators.get(&token).cloned().unwrap_or_default(),
        })
    }

    async fn owner_of(&self, token_id: U256) -> Result<WalletAddress> {
        let token = small(token_id);
        self.fail_if_broken(format!("owner:{token}"))?;
        self.owners
            .get(&token)
            .copied()
            .ok_or_else(|| WalletError::ChainRead("nonexistent token".into()))
    }

    async fn balance_of(&self, _owner: &WalletAddress) -> Result<U256> {
        self.fail_if_broken("balance".into())?;
        Ok(U256::from(self.enumerated.len()))
    }

    async fn token_of_owner_by_index(&self, _owner: &WalletAddress, index: U256) -> Result<U256> {
        let index = small(index) as usize;
        self.fail_if_broken(format!("index:{index}"))?;
        Ok(U256::from(self.enumerated[index]))
    }

    async fn token_uri(&self, token_id: U256) -> Result<String> {
        let token = small(token_id);
        self.fail_if_broken(format!("uri:{token}"))?;
        Ok(self.uris.get(&token).cloned().unwrap_or_default())
    }
}

fn engine(chain: FakeChain) -> OwnershipEngine {
    OwnershipEngine::new(Arc::new(chain), 1_000)
}

#[tokio::test]
async fn registry_and_enumeration_results_are_fused() {
    let chain = FakeChain {
        devices: vec!["meter-1".into()],
        device_tokens: HashMap::from([("meter-1".into(), 3)]),
        owners: HashMap::from([(3, owner()), (9, owner())]),
        enumerated: vec![3, 9],
        locators: HashMap::from([(3, "ipfs://meter-1".into())]),
        uris: HashMap::from([(9, "ipfs://token-9".into())]),
        ..FakeChain::default()
    };

    let assets = engine(chain).list_owned_assets(OWNER).await.unwrap();
    assert_eq!(assets.len(), 2);

    assert_eq!(assets[0].token_id, "3");
    assert_eq!(assets[0].device_id, "meter-1");
    assert_eq!(assets[0].resource_locator.as_deref(), Some("ipfs://meter-1"));
    assert_eq!(assets[0].provenance, Provenance::Both);
    assert_eq!(assets[0].owner.to_string(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");

    assert_eq!(assets[1].token_id, "9");
    assert_eq!(assets[1].device_id, "");
    assert_eq!(assets[1].resource_locator.as_deref(), Some("ipfs://token-9"));
    assert_eq!(assets[1].provenance, Provenance::Enumeration);
}

#[tokio::test]
async fn transferred_registry_token_is_dropped() {
    let chain = FakeChain {
        devices: vec!["meter-2".into()],
        device_tokens: HashMap::from([("meter-2".into(), 5)]),
        owners: HashMap::from([(5, other())]),
        ..FakeChain::default()
    };

    let outcome = engine(chain).reconcile(OWNER).await.unwrap();
    assert!(outcome.assets.iter().all(|a| a.token_id != "5"));
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].stage, Stage::StaleMapping);
    assert_eq!(outcome.diagnostics[0].subject, "5");
}

#[tokio::test]
async fn token_seen_by_both_passes_is_listed_once_with_registry_metadata() {
    let chain = FakeChain {
        devices: vec!["pump-7".into()],
        device_tokens: HashMap::from([("pump-7".into(), 7)]),
        owners: HashMap::from([(7, owner())]),
        enumerated: vec![7],
        locators: HashMap::from([(7, "https://registry.example/7".into())]),
        uris: HashMap::from([(7, "https://nft.example/7".into())]),
        ..FakeChain::default()
    };

    let assets = engine(chain).list_owned_assets(OWNER).await.unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].token_id, "7");
    assert_eq!(assets[0].device_id, "pump-7");
    assert_eq!(assets[0].resource_locator.as_deref(), Some("https://registry.example/7"));
}

#[tokio::test]
async fn device_without_token_is_skipped_silently() {
    let chain = FakeChain {
        devices: vec!["meter-new".into()],
        ..FakeChain::default()
    };

    let outcome = engine(chain).reconcile(OWNER).await.unwrap();
    assert!(outcome.assets.is_empty());
    assert!(outcome.diagnostics.is_empty());
}

#[tokio::test]
async fn single_lookup_failures_yield_a_partial_result() {
    let chain = FakeChain {
        devices: vec!["meter-1".into(), "meter-3".into(), "meter-4".into()],
        device_tokens: HashMap::from([
            ("meter-1".into(), 1),
            ("meter-3".into(), 3),
            ("meter-4".into(), 4),
        ]),
        owners: HashMap::from([(1, owner()), (3, owner()), (4, owner())]),
        enumerated: vec![1, 3, 4, 11, 12],
        broken: HashSet::from([
            "token:meter-3".to_string(),
            "owner:4".to_string(),
            "index:3".to_string(),
        ]),
        ..FakeChain::default()
    };

    let outcome = engine(chain).reconcile(OWNER).await.unwrap();
    let ids: Vec<&str> = outcome.assets.iter().map(|a| a.token_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3", "4", "12"]);

    let stages: Vec<Stage> = outcome.diagnostics.iter().map(|d| d.stage).collect();
    assert_eq!(stages, vec![Stage::DeviceToken, Stage::OwnershipCheck, Stage::Index]);
}

#[tokio::test]
async fn registry_outage_still_returns_enumerated_tokens() {
    let chain = FakeChain {
        enumerated: vec![21],
        broken: HashSet::from(["devices".to_string()]),
        ..FakeChain::default()
    };

    let outcome = engine(chain).reconcile(OWNER).await.unwrap();
    assert_eq!(outcome.assets.len(), 1);
    assert_eq!(outcome.assets[0].token_id, "21");
    assert_eq!(outcome.diagnostics[0].stage, Stage::RegistryListing);
}

#[tokio::test]
async fn registry_locator_falls_back_to_token_uri() {
    let chain = FakeChain {
        devices: vec!["meter-8".into(), "meter-10".into()],
        device_tokens: HashMap::from([("meter-8".into(), 8), ("meter-10".into(), 10)]),
        owners: HashMap::from([(8, owner()), (10, owner())]),
        uris: HashMap::from([(8, "ipfs://fallback-8".into()), (10, "ipfs://fallback-10".into())]),
        broken: HashSet::from(["details:10".to_string()]),
        ..FakeChain::default()
    };

    let outcome = engine(chain).reconcile(OWNER).await.unwrap();
    assert_eq!(outcome.assets[0].resource_locator.as_deref(), Some("ipfs://fallback-8"));
    assert_eq!(outcome.assets[1].resource_locator.as_deref(), Some("ipfs://fallback-10"));
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].stage, Stage::Metadata);
}

#[tokio::test]
async fn enumeration_stops_at_the_configured_limit() {
    let chain = FakeChain {
        enumerated: (100..110).collect(),
        ..FakeChain::default()
    };

    let outcome = OwnershipEngine::new(Arc::new(chain), 4).reconcile(OWNER).await.unwrap();
    assert_eq!(outcome.assets.len(), 4);
    assert_eq!(outcome.assets[3].token_id, "103");
    assert_eq!(outcome.diagnostics[0].stage, Stage::Balance);
}

#[tokio::test]
async fn result_is_deterministic_for_fixed_state() {
    let build = || FakeChain {
        devices: vec!["a".into(), "b".into()],
        device_tokens: HashMap::from([("a".into(), 2), ("b".into(), 1)]),
        owners: HashMap::from([(1, owner()), (2, owner())]),
        enumerated: vec![5, 1, 2, 4],
        ..FakeChain::default()
    };

    let first = engine(build()).list_owned_assets(OWNER).await.unwrap();
    let second = engine(build()).list_owned_assets(OWNER).await.unwrap();
    assert_eq!(first, second);
    let ids: Vec<&str> = first.iter().map(|a| a.token_id.as_str()).collect();
    assert_eq!(ids, vec!["2", "1", "5", "4"]);
}

#[tokio::test]
async fn malformed_owner_is_rejected() {
    let err = engine(FakeChain::default()).reconcile("0x1234").await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn token_record_for_another_device_falls_back_to_token_uri() {
    let chain = FakeChain {
        devices: vec!["meter-12".into()],
        device_tokens: HashMap::from([("meter-12".into(), 12)]),
        owners: HashMap::from([(12, owner())]),
        locators: HashMap::from([(12, "ipfs://meter-99".into())]),
        token_devices: HashMap::from([(12, "meter-99".into())]),
        uris: HashMap::from([(12, "ipfs://token-12".into())]),
        ..FakeChain::default()
    };

    let outcome = engine(chain).reconcile(OWNER).await.unwrap();
    assert_eq!(outcome.assets.len(), 1);
    assert_eq!(outcome.assets[0].device_id, "meter-12");
    assert_eq!(outcome.assets[0].resource_locator.as_deref(), Some("ipfs://token-12"));
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].stage, Stage::Metadata);
    assert!(outcome.diagnostics[0].message.contains("meter-99"));
}

#[tokio::test]
async fn matching_token_record_keeps_registry_locator() {
    let chain = FakeChain {
        devices: vec!["meter-13".into()],
        device_tokens: HashMap::from([("meter-13".into(), 13)]),
        owners: HashMap::from([(13, owner())]),
        locators: HashMap::from([(13, "ipfs://meter-13".into())]),
        token_devices: HashMap::from([(13, "meter-13".into())]),
        ..FakeChain::default()
    };

    let outcome = engine(chain).reconcile(OWNER).await.unwrap();
    assert_eq!(outcome.assets[0].resource_locator.as_deref(), Some("ipfs://meter-13"));
    assert!(outcome.diagnostics.is_empty());
}
