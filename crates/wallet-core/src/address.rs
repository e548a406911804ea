use std::fmt;
use std::str::FromStr;

use alloy::primitives::Address;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, WalletError};

/// An EVM account address.
///
/// Accepts `0x` + 40 hex digits in any case. Mixed-case input must carry a
/// valid EIP-55 checksum. Displays and serializes in checksummed form; the
/// lowercase form is only used as the storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WalletAddress(Address);

impl WalletAddress {
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        let hex_part = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| WalletError::Validation(format!("address must start with 0x: {s}")))?;
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WalletError::Validation(format!(
                "address must be 40 hex digits: {s}"
            )));
        }

        let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
        let address = if has_lower && has_upper {
            Address::parse_checksummed(format!("0x{hex_part}"), None)
                .map_err(|e| WalletError::Validation(format!("bad address checksum {s}: {e}")))?
        } else {
            Address::from_str(hex_part)
                .map_err(|e| WalletError::Validation(format!("invalid address {s}: {e}")))?
        };
        Ok(Self(address))
    }

    pub fn checksummed(&self) -> String {
        self.0.to_checksum(None)
    }

    /// Lowercase `0x…` form used as the local and remote record key.
    pub fn storage_key(&self) -> String {
        format!("0x{}", hex::encode(self.0.as_slice()))
    }

    /// Case-insensitive comparison against an address returned by a chain.
    pub fn matches(&self, other: &Address) -> bool {
        self.0 == *other
    }

    pub fn as_alloy(&self) -> Address {
        self.0
    }
}

impl From<Address> for WalletAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl FromStr for WalletAddress {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.checksummed())
    }
}

impl Serialize for WalletAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.checksummed())
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        WalletAddress::parse(&raw).map_err(serde::de::Error::custom)
    }
}
