//! Data model shared by the local store, the remote client and the
//! reconciliation engine. Field names on the wire are camelCase and
//! timestamps travel as integer milliseconds.

use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::WalletAddress;
use crate::error::{Result, WalletError};

/// Current time truncated to millisecond precision, the resolution every
/// store keeps.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub address: WalletAddress,
    #[serde(rename = "plaintextKey", default, skip_serializing_if = "Option::is_none")]
    pub plaintext_secret: Option<String>,
    #[serde(rename = "encryptedKey", default, skip_serializing_if = "Option::is_none")]
    pub encrypted_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds", default)]
    pub created_at: DateTime<Utc>,
    /// A record without `updatedAt` sorts as the oldest possible copy.
    #[serde(with = "chrono::serde::ts_milliseconds", default)]
    pub updated_at: DateTime<Utc>,
}

/// Borrowed view of whichever secret a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretMaterial<'a> {
    Plaintext(&'a str),
    Encrypted { encrypted_key: &'a str, iv: &'a str },
}

impl WalletRecord {
    /// A secret-less record, e.g. one awaiting import.
    pub fn new(address: WalletAddress) -> Self {
        let now = now_millis();
        Self {
            address,
            plaintext_secret: None,
            encrypted_secret: None,
            iv: None,
            password_hash: None,
            email: None,
            username: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_plaintext_secret(mut self, secret: impl Into<String>) -> Self {
        self.plaintext_secret = Some(secret.into());
        self.encrypted_secret = None;
        self.iv = None;
        self
    }

    pub fn with_encrypted_secret(
        mut self,
        encrypted_key: impl Into<String>,
        iv: impl Into<String>,
    ) -> Self {
        self.plaintext_secret = None;
        self.encrypted_secret = Some(encrypted_key.into());
        self.iv = Some(iv.into());
        self
    }

    pub fn secret(&self) -> Option<SecretMaterial<'_>> {
        if let Some(plain) = self.plaintext_secret.as_deref() {
            return Some(SecretMaterial::Plaintext(plain));
        }
        match (self.encrypted_secret.as_deref(), self.iv.as_deref()) {
            (Some(encrypted_key), Some(iv)) => {
                Some(SecretMaterial::Encrypted { encrypted_key, iv })
            }
            _ => None,
        }
    }

    pub fn has_secret(&self) -> bool {
        self.plaintext_secret.is_some() || self.encrypted_secret.is_some() || self.iv.is_some()
    }

    /// Copies the complete secret of `other` (plaintext, or the encrypted
    /// pair) into a record that has none.
    pub(crate) fn carry_secret_from(&mut self, other: &WalletRecord) {
        if self.has_secret() {
            return;
        }
        self.plaintext_secret = other.plaintext_secret.clone();
        self.encrypted_secret = other.encrypted_secret.clone();
        self.iv = other.iv.clone();
    }

    /// Empty strings coming from older clients mean "absent".
    pub fn sanitized(mut self) -> Self {
        for field in [
            &mut self.plaintext_secret,
            &mut self.encrypted_secret,
            &mut self.iv,
            &mut self.password_hash,
            &mut self.email,
            &mut self.username,
        ] {
            if field.as_deref().map(str::trim).is_some_and(str::is_empty) {
                *field = None;
            }
        }
        self
    }

    /// Exactly one of {plaintext secret, encrypted secret + iv}, or neither.
    pub fn validate(&self) -> Result<()> {
        let has_plain = self.plaintext_secret.is_some();
        let has_encrypted = self.encrypted_secret.is_some();
        let has_iv = self.iv.is_some();

        if has_plain && (has_encrypted || has_iv) {
            return Err(WalletError::Validation(format!(
                "wallet {} carries both a plaintext and an encrypted secret",
                self.address
            )));
        }
        if has_encrypted != has_iv {
            return Err(WalletError::Validation(format!(
                "wallet {}: encrypted secret needs both encryptedKey and iv",
                self.address
            )));
        }
        if let (Some(encrypted), Some(iv)) = (&self.encrypted_secret, &self.iv) {
            general_purpose::STANDARD
                .decode(encrypted)
                .map_err(|e| WalletError::Validation(format!("encryptedKey is not base64: {e}")))?;
            general_purpose::STANDARD
                .decode(iv)
                .map_err(|e| WalletError::Validation(format!("iv is not base64: {e}")))?;
        }
        Ok(())
    }
}

impl fmt::Debug for WalletRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = match self.secret() {
            Some(SecretMaterial::Plaintext(_)) => "plaintext",
            Some(SecretMaterial::Encrypted { .. }) => "encrypted",
            None => "none",
        };
        f.debug_struct("WalletRecord")
            .field("address", &self.address)
            .field("secret", &secret)
            .field("password_hash", &self.password_hash.as_ref().map(|_| "<set>"))
            .field("email", &self.email)
            .field("username", &self.username)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Partial wallet update; only the present fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPatch {
    #[serde(rename = "plaintextKey", skip_serializing_if = "Option::is_none")]
    pub plaintext_secret: Option<String>,
    #[serde(rename = "encryptedKey", skip_serializing_if = "Option::is_none")]
    pub encrypted_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl WalletPatch {
    pub fn secret_of(record: &WalletRecord) -> Self {
        Self {
            plaintext_secret: record.plaintext_secret.clone(),
            encrypted_secret: record.encrypted_secret.clone(),
            iv: record.iv.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Username,
    Email,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Username => "username",
            IdentifierKind::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "username" => Some(IdentifierKind::Username),
            "email" => Some(IdentifierKind::Email),
            _ => None,
        }
    }

    /// Used when a remote row does not say what it is.
    pub fn infer(identifier: &str) -> Self {
        if identifier.contains('@') {
            IdentifierKind::Email
        } else {
            IdentifierKind::Username
        }
    }
}

/// Lowercase and trim. Empty identifiers are rejected.
pub fn normalize_identifier(identifier: &str) -> Result<String> {
    let normalized = identifier.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(WalletError::Validation("identifier is empty".into()));
    }
    Ok(normalized)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityMapping {
    pub identifier: String,
    #[serde(rename = "type")]
    pub kind: IdentifierKind,
    pub address: WalletAddress,
    #[serde(with = "chrono::serde::ts_milliseconds", default)]
    pub created_at: DateTime<Utc>,
}

impl IdentityMapping {
    pub fn new(identifier: &str, kind: IdentifierKind, address: WalletAddress) -> Result<Self> {
        Ok(Self {
            identifier: normalize_identifier(identifier)?,
            kind,
            address,
            created_at: now_millis(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Registry,
    Enumeration,
    Both,
}

/// One non-fungible token currently owned by `owner`. Derived from chain
/// state on every reconciliation and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedAsset {
    /// Canonical decimal form of the on-chain uint256.
    pub token_id: String,
    /// Empty when no registry device is known for the token.
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_locator: Option<String>,
    pub owner: WalletAddress,
    pub provenance: Provenance,
}
