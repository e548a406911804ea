//! Recency merge between the local and remote copy of one wallet.

use crate::records::{WalletPatch, WalletRecord};

/// What the remote copy needs after a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAction {
    None,
    /// Remote copy is current apart from a missing secret.
    Patch(WalletPatch),
    /// Remote copy is stale; send the whole merged record.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub record: WalletRecord,
    pub local_changed: bool,
    pub remote_action: RemoteAction,
}

/// Newer `updated_at` wins the whole record and a tie keeps `local`.
///
/// A winner without any secret takes the loser's complete secret, so a
/// secret never regresses to absent and the two variants are never mixed.
pub fn merge(local: &WalletRecord, remote: &WalletRecord) -> MergeOutcome {
    let (mut record, loser) = if remote.updated_at > local.updated_at {
        (remote.clone(), local)
    } else {
        (local.clone(), remote)
    };
    record.carry_secret_from(loser);

    let local_changed = record != *local;
    let remote_action = remote_action_for(&record, remote);
    MergeOutcome {
        record,
        local_changed,
        remote_action,
    }
}

fn remote_action_for(merged: &WalletRecord, remote: &WalletRecord) -> RemoteAction {
    if merged == remote {
        return RemoteAction::None;
    }
    let mut patched = remote.clone();
    patched.carry_secret_from(merged);
    if patched == *merged {
        RemoteAction::Patch(WalletPatch::secret_of(merged))
    } else {
        RemoteAction::Replace
    }
}
