//! Local-first wallet cache with best-effort remote sync, plus on-chain
//! ownership reconciliation for device NFTs.

pub mod address;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod local_store;
pub mod merge;
pub mod paths;
pub mod reconcile;
pub mod records;
pub mod remote;
pub mod sync;

pub use address::WalletAddress;
pub use chain::{ChainReader, DeviceDetails, EvmChainReader};
pub use config::WalletConfig;
pub use error::{Result, WalletError};
pub use local_store::LocalStore;
pub use merge::{merge, MergeOutcome, RemoteAction};
pub use reconcile::{Diagnostic, OwnershipEngine, Reconciliation, Stage};
pub use records::{
    normalize_identifier, IdentifierKind, IdentityMapping, OwnedAsset, Provenance, SecretMaterial,
    WalletPatch, WalletRecord,
};
pub use remote::{HttpRemoteStore, RemoteMapping, RemoteStore};
pub use sync::SyncCoordinator;
