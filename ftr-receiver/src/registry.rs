//! Session registry and content table

use std::{path::PathBuf, sync::Arc};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::{
    error::{Result, TransferError},
    lease::Lease,
    types::TransferId,
};

/// Live sessions, keyed by transfer id. A session is present from a
/// successful start until it is ended, whichever path ends it.
#[derive(Default)]
pub struct SessionRegistry {
    leases: DashMap<TransferId, Arc<Lease>>,
}

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        SessionRegistry::default()
    }

    pub fn insert(&self, transfer_id: TransferId, lease: Arc<Lease>) {
        self.leases.insert(transfer_id, lease);
    }

    pub fn get(&self, transfer_id: &TransferId) -> Option<Arc<Lease>> {
        self.leases.get(transfer_id).map(|lease| lease.clone())
    }

    pub fn remove(&self, transfer_id: &TransferId) -> Option<Arc<Lease>> {
        self.leases.remove(transfer_id).map(|(_, lease)| lease)
    }

    pub fn contains(&self, transfer_id: &TransferId) -> bool {
        self.leases.contains_key(transfer_id)
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Guard for session-scoped operations. On success the lease's timeout
    /// is suspended; the caller must re-enable it when its work is done.
    pub fn check_lock(&self, transfer_id: &TransferId) -> Result<Arc<Lease>> {
        let lease = self.get(transfer_id).ok_or_else(|| {
            debug!(%transfer_id, "lock not found");
            TransferError::LockNotFound {
                transfer_id: *transfer_id,
            }
        })?;
        if !lease.is_active() {
            debug!(%transfer_id, "lock timed out");
            return Err(TransferError::LockTimedOut {
                transfer_id: *transfer_id,
            });
        }
        lease
            .suspend_timeout()
            .map_err(|e| TransferError::from_lease(e, *transfer_id))?;
        trace!(%transfer_id, "lock checked");
        Ok(lease)
    }
}

/// Where a received content file was staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedContent {
    pub transfer_id: TransferId,
    pub path: PathBuf,
}

/// Content files received so far, keyed by content id.
#[derive(Default)]
pub struct ContentTable {
    entries: DashMap<String, StagedContent>,
}

impl ContentTable {
    pub fn new() -> ContentTable {
        ContentTable::default()
    }

    pub fn insert(&self, content_id: &str, staged: StagedContent) {
        self.entries.insert(content_id.to_owned(), staged);
    }

    pub fn get(&self, content_id: &str) -> Option<StagedContent> {
        self.entries.get(content_id).map(|entry| entry.clone())
    }

    /// Whether `transfer_id` has staged content under `content_id`.
    pub fn is_staged(&self, transfer_id: &TransferId, content_id: &str) -> bool {
        self.entries
            .get(content_id)
            .map(|entry| entry.transfer_id == *transfer_id)
            .unwrap_or(false)
    }

    /// Forget everything staged by a session. Returns the number of entries
    /// dropped.
    pub fn remove_transfer(&self, transfer_id: &TransferId) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.transfer_id != *transfer_id);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
