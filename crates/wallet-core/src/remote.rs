//! Client for the remote wallet store.
//!
//! Every failure here (transport, timeout, non-2xx, unreadable body) is a
//! `RemoteUnavailable`; callers decide whether that is worth surfacing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::address::WalletAddress;
use crate::config::WalletConfig;
use crate::error::{Result, WalletError};
use crate::records::{IdentifierKind, IdentityMapping, WalletPatch, WalletRecord};

/// A mapping row as returned by `GET /identity-mappings/{identifier}`.
/// Older servers only send the address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMapping {
    pub address: WalletAddress,
    #[serde(rename = "type", default)]
    pub kind: Option<IdentifierKind>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Stores the full record, returning the address the server keyed it by.
    async fn put_wallet(&self, record: &WalletRecord) -> Result<WalletAddress>;
    async fn get_wallet(&self, address: &WalletAddress) -> Result<Option<WalletRecord>>;
    async fn patch_wallet(
        &self,
        address: &WalletAddress,
        patch: &WalletPatch,
    ) -> Result<WalletRecord>;
    async fn put_mapping(&self, mapping: &IdentityMapping) -> Result<()>;
    /// `identifier` must already be normalized.
    async fn get_mapping(&self, identifier: &str) -> Result<Option<RemoteMapping>>;
    async fn health(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(config: &WalletConfig) -> Result<Self> {
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| WalletError::Config(format!("api_base_url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(WalletError::Config(format!(
                "api_base_url cannot carry a path: {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("wallet-core/", env!("CARGO_PKG_VERSION")))
            .timeout(config.remote_timeout())
            .build()
            .map_err(|e| WalletError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            token: config.api_token.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                WalletError::Config(format!("api_base_url cannot carry a path: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

fn ensure_success(res: Response, what: &str) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    Err(WalletError::RemoteUnavailable(format!("{what} failed with status {status}")))
}

async fn decode<T: DeserializeOwned>(res: Response, what: &str) -> Result<T> {
    res.json::<T>()
        .await
        .map_err(|e| WalletError::RemoteUnavailable(format!("{what}: unreadable response: {e}")))
}

/// Remote rows are checked the same way local writes are; a row that would
/// be rejected locally is treated as no usable answer.
fn accept_record(
    record: WalletRecord,
    expected: &WalletAddress,
    what: &str,
) -> Result<WalletRecord> {
    let record = record.sanitized();
    if record.address != *expected {
        return Err(WalletError::RemoteUnavailable(format!(
            "{what}: server answered for {} instead of {expected}",
            record.address
        )));
    }
    record
        .validate()
        .map_err(|e| WalletError::RemoteUnavailable(format!("{what}: {e}")))?;
    Ok(record)
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn put_wallet(&self, record: &WalletRecord) -> Result<WalletAddress> {
        let url = self.endpoint(&["wallets"])?;
        let res = self.request(reqwest::Method::PUT, url).json(record).send().await?;
        let res = ensure_success(res, "put wallet")?;

        // Some deployments answer with an empty body.
        let body: Value = res.json().await.unwrap_or(Value::Null);
        let stored = body
            .get("address")
            .and_then(Value::as_str)
            .map(WalletAddress::parse)
            .transpose()
            .map_err(|e| WalletError::RemoteUnavailable(format!("put wallet: {e}")))?
            .unwrap_or(record.address);
        debug!(address = %stored, "remote wallet stored");
        Ok(stored)
    }

    async fn get_wallet(&self, address: &WalletAddress) -> Result<Option<WalletRecord>> {
        let key = address.storage_key();
        let url = self.endpoint(&["wallets", &key])?;
        let res = self.request(reqwest::Method::GET, url).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = ensure_success(res, "get wallet")?;
        let record: WalletRecord = decode(res, "get wallet").await?;
        accept_record(record, address, "get wallet").map(Some)
    }

    async fn patch_wallet(
        &self,
        address: &WalletAddress,
        patch: &WalletPatch,
    ) -> Result<WalletRecord> {
        let key = address.storage_key();
        let url = self.endpoint(&["wallets", &key])?;
        let res = self.request(reqwest::Method::PATCH, url).json(patch).send().await?;
        let res = ensure_success(res, "patch wallet")?;
        let record: WalletRecord = decode(res, "patch wallet").await?;
        accept_record(record, address, "patch wallet")
    }

    async fn put_mapping(&self, mapping: &IdentityMapping) -> Result<()> {
        let url = self.endpoint(&["identity-mappings"])?;
        let res = self.request(reqwest::Method::PUT, url).json(mapping).send().await?;
        ensure_success(res, "put identity mapping")?;
        Ok(())
    }

    async fn get_mapping(&self, identifier: &str) -> Result<Option<RemoteMapping>> {
        let url = self.endpoint(&["identity-mappings", identifier])?;
        let res = self.request(reqwest::Method::GET, url).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = ensure_success(res, "get identity mapping")?;
        decode(res, "get identity mapping").await.map(Some)
    }

    async fn health(&self) -> Result<()> {
        let url = self.endpoint(&["health"])?;
        let res = self.request(reqwest::Method::GET, url).send().await?;
        ensure_success(res, "health check")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(base: &str) -> HttpRemoteStore {
        let config = WalletConfig {
            api_base_url: base.into(),
            ..WalletConfig::default()
        };
        HttpRemoteStore::new(&config).unwrap()
    }

    #[test]
    fn endpoints_append_to_base_path() {
        let remote = store("https://store.example/api/");
        let url = remote.endpoint(&["wallets", "0xabc"]).unwrap();
        assert_eq!(url.as_str(), "https://store.example/api/wallets/0xabc");
    }

    #[test]
    fn identifiers_are_escaped_as_one_segment() {
        let remote = store("https://store.example/api");
        let url = remote.endpoint(&["identity-mappings", "a/b c@example.com"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://store.example/api/identity-mappings/a%2Fb%20c@example.com"
        );
    }

    #[test]
    fn remote_mapping_accepts_address_only_rows() {
        let row: RemoteMapping = serde_json::from_value(serde_json::json!({
            "address": "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
        }))
        .unwrap();
        assert!(row.kind.is_none());
        assert!(row.created_at.is_none());

        let row: RemoteMapping = serde_json::from_value(serde_json::json!({
            "address": "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
            "type": "email",
            "createdAt": 1_700_000_000_000_i64,
        }))
        .unwrap();
        assert_eq!(row.kind, Some(IdentifierKind::Email));
    }

    #[test]
    fn mismatched_remote_record_is_not_accepted() {
        let a = WalletAddress::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        let b = WalletAddress::parse(&format!("0x{}", "1".repeat(40))).unwrap();
        let err = accept_record(WalletRecord::new(b), &a, "get wallet").unwrap_err();
        assert!(err.is_remote());
    }
}
