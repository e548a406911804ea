//! Read-only access to the device registry and the device NFT contract.

use std::fmt::Display;
use std::future::IntoFuture;
use std::time::Duration;

use alloy::primitives::U256;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::sol;
use async_trait::async_trait;

use crate::address::WalletAddress;
use crate::config::WalletConfig;
use crate::error::{Result, WalletError};

sol! {
    #[sol(rpc)]
    interface IDeviceRegistry {
        function getDevicesByOwner(address owner) external view returns (string[] memory);
        function getDeviceNFT(string deviceId) external view returns (uint256);
        function getDevice(uint256 tokenId) external view returns (
            address owner,
            string deviceId,
            string tokenURI,
            uint256 registeredAt
        );
    }

    #[sol(rpc)]
    interface IDeviceNft {
        function balanceOf(address owner) external view returns (uint256);
        function ownerOf(uint256 tokenId) external view returns (address);
        function tokenURI(uint256 tokenId) external view returns (string memory);
        function tokenOfOwnerByIndex(address owner, uint256 index) external view returns (uint256);
    }
}

/// Registry view of one minted device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDetails {
    pub device_id: String,
    pub resource_locator: String,
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn devices_owned_by(&self, owner: &WalletAddress) -> Result<Vec<String>>;
    /// `None` when the device has no token minted yet.
    async fn token_for_device(&self, device_id: &str) -> Result<Option<U256>>;
    async fn device_details(&self, token_id: U256) -> Result<DeviceDetails>;
    async fn owner_of(&self, token_id: U256) -> Result<WalletAddress>;
    async fn balance_of(&self, owner: &WalletAddress) -> Result<U256>;
    async fn token_of_owner_by_index(&self, owner: &WalletAddress, index: U256) -> Result<U256>;
    async fn token_uri(&self, token_id: U256) -> Result<String>;
}

pub struct EvmChainReader {
    registry: IDeviceRegistry::IDeviceRegistryInstance<DynProvider>,
    assets: IDeviceNft::IDeviceNftInstance<DynProvider>,
    timeout: Duration,
}

impl EvmChainReader {
    pub fn new(config: &WalletConfig) -> Result<Self> {
        let (registry, assets) = config.contracts()?;
        let rpc_url = config
            .rpc_url
            .parse()
            .map_err(|e| WalletError::Config(format!("rpc_url: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(rpc_url).erased();
        Ok(Self {
            registry: IDeviceRegistry::new(registry.as_alloy(), provider.clone()),
            assets: IDeviceNft::new(assets.as_alloy(), provider),
            timeout: config.chain_timeout(),
        })
    }

    async fn read<T, E, F>(&self, what: &str, call: F) -> Result<T>
    where
        F: IntoFuture<Output = std::result::Result<T, E>> + Send,
        F::IntoFuture: Send,
        E: Display,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(WalletError::ChainRead(format!("{what}: {err}"))),
            Err(_) => Err(WalletError::ChainRead(format!(
                "{what}: timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl ChainReader for EvmChainReader {
    async fn devices_owned_by(&self, owner: &WalletAddress) -> Result<Vec<String>> {
        let call = self.registry.getDevicesByOwner(owner.as_alloy());
        self.read("getDevicesByOwner", call.call()).await
    }

    async fn token_for_device(&self, device_id: &str) -> Result<Option<U256>> {
        let call = self.registry.getDeviceNFT(device_id.to_string());
        let token = self.read("getDeviceNFT", call.call()).await?;
        Ok((!token.is_zero()).then_some(token))
    }

    async fn device_details(&self, token_id: U256) -> Result<DeviceDetails> {
        let call = self.registry.getDevice(token_id);
        let device = self.read("getDevice", call.call()).await?;
        Ok(DeviceDetails {
            device_id: device.deviceId,
            resource_locator: device.tokenURI,
        })
    }

    async fn owner_of(&self, token_id: U256) -> Result<WalletAddress> {
        let call = self.assets.ownerOf(token_id);
        self.read("ownerOf", call.call()).await.map(WalletAddress::from)
    }

    async fn balance_of(&self, owner: &WalletAddress) -> Result<U256> {
        let call = self.assets.balanceOf(owner.as_alloy());
        self.read("balanceOf", call.call()).await
    }

    async fn token_of_owner_by_index(&self, owner: &WalletAddress, index: U256) -> Result<U256> {
        let call = self.assets.tokenOfOwnerByIndex(owner.as_alloy(), index);
        self.read("tokenOfOwnerByIndex", call.call()).await
    }

    async fn token_uri(&self, token_id: U256) -> Result<String> {
        let call = self.assets.tokenURI(token_id);
        self.read("tokenURI", call.call()).await
    }
}
