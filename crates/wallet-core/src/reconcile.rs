//! Ownership reconciliation.
//!
//! Two views of the same chain state are fused: the device registry (rich
//! metadata, but it is not updated on peer-to-peer transfers) and direct
//! per-owner enumeration on the NFT contract (always current, metadata
//! poor). Registry entries are re-verified with `ownerOf`; enumeration
//! entries are owned by construction.
//!
//! A failed lookup only drops the entry it belongs to. It is logged and
//! recorded as a [`Diagnostic`] next to the assets.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy::primitives::U256;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::address::WalletAddress;
use crate::chain::ChainReader;
use crate::error::Result;
use crate::records::{OwnedAsset, Provenance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RegistryListing,
    DeviceToken,
    OwnershipCheck,
    /// Registry still maps the device to an address that no longer owns the token.
    StaleMapping,
    Balance,
    Index,
    Metadata,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::RegistryListing => "registry listing",
            Stage::DeviceToken => "device token",
            Stage::OwnershipCheck => "ownership check",
            Stage::StaleMapping => "stale mapping",
            Stage::Balance => "balance",
            Stage::Index => "index",
            Stage::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub stage: Stage,
    /// Device id, token id or index the entry was about.
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub assets: Vec<OwnedAsset>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Reconciliation {
    fn note(&mut self, stage: Stage, subject: impl Into<String>, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            stage,
            subject: subject.into(),
            message: message.into(),
        };
        warn!(
            stage = %diagnostic.stage,
            subject = %diagnostic.subject,
            message = %diagnostic.message,
            "ownership lookup degraded"
        );
        self.diagnostics.push(diagnostic);
    }
}

pub struct OwnershipEngine {
    chain: Arc<dyn ChainReader>,
    max_enumerated_tokens: u64,
}

impl OwnershipEngine {
    pub fn new(chain: Arc<dyn ChainReader>, max_enumerated_tokens: u64) -> Self {
        Self {
            chain,
            max_enumerated_tokens,
        }
    }

    pub async fn list_owned_assets(&self, address: &str) -> Result<Vec<OwnedAsset>> {
        Ok(self.reconcile(address).await?.assets)
    }

    /// Only a malformed `address` fails the call; every chain failure is
    /// local to one entry and ends up in `diagnostics`.
    pub async fn reconcile(&self, address: &str) -> Result<Reconciliation> {
        let owner = WalletAddress::parse(address)?;
        let mut result = Reconciliation::default();
        let mut by_token: HashMap<String, usize> = HashMap::new();

        self.registry_pass(&owner, &mut result, &mut by_token).await;
        self.enumeration_pass(&owner, &mut result, &mut by_token).await;

        result.assets.retain(|asset| {
            !asset.token_id.trim().is_empty() || !asset.device_id.trim().is_empty()
        });
        info!(
            address = %owner,
            assets = result.assets.len(),
            skipped = result.diagnostics.len(),
            "ownership reconciled"
        );
        Ok(result)
    }

    async fn registry_pass(
        &self,
        owner: &WalletAddress,
        result: &mut Reconciliation,
        by_token: &mut HashMap<String, usize>,
    ) {
        let devices = match self.chain.devices_owned_by(owner).await {
            Ok(devices) => devices,
            Err(err) => {
                result.note(Stage::RegistryListing, owner.to_string(), err.to_string());
                return;
            }
        };
        debug!(address = %owner, devices = devices.len(), "registry devices listed");

        for device_id in devices {
            let token = match self.chain.token_for_device(&device_id).await {
                Ok(Some(token)) => token,
                Ok(None) => {
                    debug!(device_id = %device_id, "device has no token yet");
                    continue;
                }
                Err(err) => {
                    result.note(Stage::DeviceToken, device_id, err.to_string());
                    continue;
                }
            };
            let token_id = token.to_string();

            match self.chain.owner_of(token).await {
                Ok(current) if current == *owner => {}
                Ok(current) => {
                    result.note(
                        Stage::StaleMapping,
                        token_id,
                        format!(
                            "device {device_id} is registered to {owner} \
                             but the token is owned by {current}"
                        ),
                    );
                    continue;
                }
                Err(err) => {
                    result.note(Stage::OwnershipCheck, token_id, err.to_string());
                    continue;
                }
            }

            if by_token.contains_key(&token_id) {
                debug!(
                    token_id = %token_id,
                    device_id = %device_id,
                    "token already listed by another device"
                );
                continue;
            }
            let resource_locator = self
                .registry_locator(token, &token_id, &device_id, result)
                .await;
            by_token.insert(token_id.clone(), result.assets.len());
            result.assets.push(OwnedAsset {
                token_id,
                device_id,
                resource_locator,
                owner: *owner,
                provenance: Provenance::Registry,
            });
        }
    }

    /// Registry metadata first, the token URI when that is empty, fails, or
    /// describes a different device than the one that led to the token.
    async fn registry_locator(
        &self,
        token: U256,
        token_id: &str,
        device_id: &str,
        result: &mut Reconciliation,
    ) -> Option<String> {
        match self.chain.device_details(token).await {
            Ok(details) if !details.device_id.is_empty() && details.device_id != device_id => {
                result.note(
                    Stage::Metadata,
                    token_id,
                    format!(
                        "token record names device {} but was reached from {device_id}",
                        details.device_id
                    ),
                );
            }
            Ok(details) if !details.resource_locator.trim().is_empty() => {
                return Some(details.resource_locator);
            }
            Ok(_) => {}
            Err(err) => result.note(Stage::Metadata, token_id, err.to_string()),
        }
        self.token_locator(token, token_id, result).await
    }

    async fn token_locator(
        &self,
        token: U256,
        token_id: &str,
        result: &mut Reconciliation,
    ) -> Option<String> {
        match self.chain.token_uri(token).await {
            Ok(uri) if !uri.trim().is_empty() => Some(uri),
            Ok(_) => None,
            Err(err) => {
                result.note(Stage::Metadata, token_id, err.to_string());
                None
            }
        }
    }

    async fn enumeration_pass(
        &self,
        owner: &WalletAddress,
        result: &mut Reconciliation,
        by_token: &mut HashMap<String, usize>,
    ) {
        let balance = match self.chain.balance_of(owner).await {
            Ok(balance) => balance,
            Err(err) => {
                result.note(Stage::Balance, owner.to_string(), err.to_string());
                return;
            }
        };
        let balance = u64::try_from(balance).unwrap_or(u64::MAX);
        let count = balance.min(self.max_enumerated_tokens);
        if count < balance {
            result.note(
                Stage::Balance,
                owner.to_string(),
                format!(
                    "balance {balance} exceeds the enumeration limit; only {count} tokens listed"
                ),
            );
        }

        for index in 0..count {
            let token = match self
                .chain
                .token_of_owner_by_index(owner, U256::from(index))
                .await
            {
                Ok(token) => token,
                Err(err) => {
                    result.note(Stage::Index, index.to_string(), err.to_string());
                    continue;
                }
            };
            let token_id = token.to_string();

            if let Some(&position) = by_token.get(&token_id) {
                result.assets[position].provenance = Provenance::Both;
                continue;
            }
            let resource_locator = self.token_locator(token, &token_id, result).await;
            by_token.insert(token_id.clone(), result.assets.len());
            result.assets.push(OwnedAsset {
                token_id,
                device_id: String::new(),
                resource_locator,
                owner: *owner,
                provenance: Provenance::Enumeration,
            });
        }
    }
}

