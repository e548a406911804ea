//! Error types for the wallet cache-and-sync core.

use std::path::PathBuf;

use thiserror::Error;

use crate::records::IdentifierKind;

/// Result type for wallet-core operations
pub type Result<T> = std::result::Result<T, WalletError>;

#[derive(Debug, Error)]
pub enum WalletError {
    /// Malformed address or identifier, or conflicting secret fields.
    /// Nothing was written.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Local store error: {0}")]
    LocalStore(#[from] rusqlite::Error),

    #[error("Local store error: {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Identity mapping write failed for {failed:?}: {reason}")]
    MappingWrite {
        failed: Vec<IdentifierKind>,
        reason: String,
    },

    #[error("Serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network failure, timeout, non-2xx status or an unreadable payload.
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Chain read failed: {0}")]
    ChainRead(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WalletError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }

    /// Local failures are fatal to the call that hit them.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::LocalStore(_) | Self::LocalIo { .. } | Self::MappingWrite { .. }
        )
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(e: reqwest::Error) -> Self {
        WalletError::RemoteUnavailable(e.to_string())
    }
}
