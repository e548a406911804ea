//! Cache sync coordinator.
//!
//! The local store answers every call. The remote store is consulted only
//! through single-attempt background tasks, or on a local miss, and any
//! remote failure degrades to "no answer".

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::address::WalletAddress;
use crate::error::{Result, WalletError};
use crate::local_store::LocalStore;
use crate::merge::{merge, RemoteAction};
use crate::records::{
    normalize_identifier, now_millis, IdentifierKind, IdentityMapping, WalletRecord,
};
use crate::remote::RemoteStore;

pub struct SyncCoordinator {
    local: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    remote_timeout: Duration,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncCoordinator {
    pub fn new(
        local: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            local,
            remote,
            remote_timeout,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Validates, writes locally, then mirrors to the remote store in the
    /// background. Returns once the local write is durable.
    pub async fn put_wallet(&self, record: WalletRecord) -> Result<WalletAddress> {
        let record = record.sanitized();
        record.validate()?;
        self.local.put_wallet(&record)?;
        debug!(address = %record.address, "wallet stored locally");

        let remote = Arc::clone(&self.remote);
        let timeout = self.remote_timeout;
        let address = record.address;
        self.spawn(async move {
            match bounded(timeout, "put wallet", remote.put_wallet(&record)).await {
                Ok(stored) => info!(address = %stored, "wallet mirrored to remote"),
                Err(err) => warn!(
                    address = %record.address,
                    error = %err,
                    "remote wallet write skipped"
                ),
            }
        });
        Ok(address)
    }

    /// Local first. A hit returns at once and schedules a recency merge
    /// with the remote copy. A miss falls through to the remote store; a
    /// remote failure there is reported as not found.
    pub async fn get_wallet(&self, address: &WalletAddress) -> Result<Option<WalletRecord>> {
        if let Some(record) = self.local.get_wallet(address)? {
            debug!(address = %address, "local wallet hit");
            let local = Arc::clone(&self.local);
            let remote = Arc::clone(&self.remote);
            let timeout = self.remote_timeout;
            let address = *address;
            self.spawn(async move {
                refresh_from_remote(local, remote, timeout, address).await;
            });
            return Ok(Some(record));
        }

        debug!(address = %address, "local wallet miss");
        let lookup = self.remote.get_wallet(address);
        let fetched = match bounded(self.remote_timeout, "get wallet", lookup).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(err) => {
                warn!(address = %address, error = %err, "remote wallet lookup skipped");
                return Ok(None);
            }
        };

        // Another writer may have stored a copy while the remote call was in flight.
        self.local.update_wallet(address, |current| match current {
            None => Some(fetched),
            Some(current) => {
                let outcome = merge(&current, &fetched);
                outcome.local_changed.then_some(outcome.record)
            }
        })?;
        info!(address = %address, "wallet backfilled from remote");
        self.local.get_wallet(address)
    }

    /// Writes one mapping row per non-empty identifier, then mirrors the
    /// written rows to the remote store in the background.
    pub async fn put_identity_mapping(
        &self,
        username: Option<&str>,
        email: Option<&str>,
        address: &WalletAddress,
    ) -> Result<Vec<IdentityMapping>> {
        let mut rows = Vec::with_capacity(2);
        for (kind, raw) in [(IdentifierKind::Username, username), (IdentifierKind::Email, email)] {
            let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
                continue;
            };
            let mapping = IdentityMapping::new(raw, kind, *address)?;
            if kind == IdentifierKind::Email && !mapping.identifier.contains('@') {
                return Err(WalletError::Validation(format!(
                    "email is malformed: {}",
                    mapping.identifier
                )));
            }
            rows.push(mapping);
        }

        let mut written = Vec::with_capacity(rows.len());
        let mut failed = Vec::new();
        let mut reasons = Vec::new();
        for mapping in rows {
            match self.local.put_mapping(&mapping) {
                Ok(Some(previous)) if previous.address != mapping.address => {
                    warn!(
                        identifier = %mapping.identifier,
                        previous = %previous.address,
                        address = %mapping.address,
                        "identity mapping reassigned"
                    );
                    written.push(mapping);
                }
                Ok(_) => written.push(mapping),
                Err(err) => {
                    reasons.push(format!("{}: {err}", mapping.kind.as_str()));
                    failed.push(mapping.kind);
                }
            }
        }

        if !written.is_empty() {
            let remote = Arc::clone(&self.remote);
            let timeout = self.remote_timeout;
            let rows = written.clone();
            self.spawn(async move {
                for mapping in rows {
                    let write = remote.put_mapping(&mapping);
                    match bounded(timeout, "put identity mapping", write).await {
                        Ok(()) => info!(
                            identifier = %mapping.identifier,
                            "identity mapping mirrored to remote"
                        ),
                        Err(err) => warn!(
                            identifier = %mapping.identifier,
                            error = %err,
                            "remote identity mapping write skipped"
                        ),
                    }
                }
            });
        }

        if !failed.is_empty() {
            return Err(WalletError::MappingWrite {
                failed,
                reason: reasons.join("; "),
            });
        }
        Ok(written)
    }

    /// Normalizes and resolves an identifier, local first. A remote hit is
    /// written back locally before returning.
    pub async fn resolve_identifier(&self, identifier: &str) -> Result<Option<WalletAddress>> {
        let identifier = normalize_identifier(identifier)?;
        if let Some(mapping) = self.local.get_mapping(&identifier)? {
            debug!(identifier = %identifier, "local identity hit");
            return Ok(Some(mapping.address));
        }

        debug!(identifier = %identifier, "local identity miss");
        let row = match bounded(
            self.remote_timeout,
            "get identity mapping",
            self.remote.get_mapping(&identifier),
        )
        .await
        {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(err) => {
                warn!(identifier = %identifier, error = %err, "remote identity lookup skipped");
                return Ok(None);
            }
        };

        let mapping = IdentityMapping {
            kind: row.kind.unwrap_or_else(|| IdentifierKind::infer(&identifier)),
            identifier,
            address: row.address,
            created_at: row.created_at.unwrap_or_else(now_millis),
        };
        self.local.put_mapping(&mapping)?;
        info!(
            identifier = %mapping.identifier,
            address = %mapping.address,
            "identity backfilled from remote"
        );
        Ok(Some(mapping.address))
    }

    pub fn mappings_for(&self, address: &WalletAddress) -> Result<Vec<IdentityMapping>> {
        self.local.mappings_for_address(address)
    }

    /// Waits for every background sync started so far. Nothing is
    /// cancelled or retried.
    pub async fn drain(&self) {
        loop {
            let handles = std::mem::take(&mut *self.pending.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(err) = handle.await {
                    warn!(error = %err, "background sync task failed");
                }
            }
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut pending = self.pending.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

/// Bounds a remote call regardless of the transport's own timeout.
async fn bounded<T, F>(timeout: Duration, what: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(WalletError::RemoteUnavailable(format!(
            "{what} timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// One background merge cycle for a local hit: fetch, merge into the
/// current local row, then push back once if the remote copy is stale.
async fn refresh_from_remote(
    local: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    timeout: Duration,
    address: WalletAddress,
) {
    let remote_copy = match bounded(timeout, "get wallet", remote.get_wallet(&address)).await {
        Ok(copy) => copy,
        Err(err) => {
            warn!(address = %address, error = %err, "remote wallet refresh skipped");
            return;
        }
    };

    let mut push_back: Option<(RemoteAction, WalletRecord)> = None;
    let updated = local.update_wallet(&address, |current| {
        let current = current?;
        match &remote_copy {
            None => {
                push_back = Some((RemoteAction::Replace, current));
                None
            }
            Some(remote_copy) => {
                let outcome = merge(&current, remote_copy);
                push_back = Some((outcome.remote_action, outcome.record.clone()));
                outcome.local_changed.then_some(outcome.record)
            }
        }
    });
    match updated {
        Ok(Some(_)) => info!(address = %address, "local wallet updated from remote"),
        Ok(None) => debug!(address = %address, "local wallet already current"),
        Err(err) => {
            warn!(address = %address, error = %err, "local merge failed");
            return;
        }
    }

    let result = match push_back {
        Some((RemoteAction::Patch(patch), _)) => {
            bounded(timeout, "patch wallet", remote.patch_wallet(&address, &patch))
                .await
                .map(|_| ())
        }
        Some((RemoteAction::Replace, record)) => {
            bounded(timeout, "put wallet", remote.put_wallet(&record))
                .await
                .map(|_| ())
        }
        Some((RemoteAction::None, _)) | None => return,
    };
    match result {
        Ok(()) => info!(address = %address, "local wallet synced back to remote"),
        Err(err) => warn!(address = %address, error = %err, "remote push-back skipped"),
    }
}
