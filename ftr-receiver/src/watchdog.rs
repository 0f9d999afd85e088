//! Last-chance cleanup for abandoned transfers

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::{
    error::{Result, TransferError},
    lease::ExpiryHandler,
    progress::ProgressMonitor,
    registry::{ContentTable, SessionRegistry},
    staging::StagingStore,
    transaction::{tx_work, TransactionRunner, TxResult},
    types::{TransferId, TransferStatus},
};

/// Cleans up after a session whose lease expired because its client went
/// away between start and commit.
///
/// Only sessions still in PRE_COMMIT are cleaned up. Past that point an
/// in-flight commit or cancel owns termination; if that owner died without
/// cleaning up, the session is left behind and a warning is logged.
#[derive(Clone)]
pub struct TimeoutWatchdog {
    registry: Arc<SessionRegistry>,
    content: Arc<ContentTable>,
    staging: StagingStore,
    progress: Arc<dyn ProgressMonitor>,
    transactions: Arc<dyn TransactionRunner>,
}

impl TimeoutWatchdog {
    pub fn new(
        registry: Arc<SessionRegistry>,
        content: Arc<ContentTable>,
        staging: StagingStore,
        progress: Arc<dyn ProgressMonitor>,
        transactions: Arc<dyn TransactionRunner>,
    ) -> TimeoutWatchdog {
        TimeoutWatchdog {
            registry,
            content,
            staging,
            progress,
            transactions,
        }
    }

    /// Time out a transfer whose lease has already been dropped.
    #[tracing::instrument(skip_all, fields(%transfer_id), err)]
    pub async fn timeout(&self, transfer_id: TransferId) -> Result<()> {
        info!("inbound transfer has timed out");
        let this = self.clone();
        let work = tx_work(move || {
            let this = this.clone();
            async move { this.clean_up(transfer_id).await }
        });
        self.transactions
            .run_in_transaction(work, false, true)
            .await
    }

    async fn clean_up(&self, transfer_id: TransferId) -> TxResult {
        let status = self
            .progress
            .get_progress(&transfer_id)
            .map(|progress| progress.status);
        if status != Some(TransferStatus::PreCommit) {
            warn!(
                ?status,
                "lock timed out past pre-commit, cleanup left to the transfer's owner"
            );
            return Ok(());
        }
        warn!("lock timed out before commit, cleaning up");
        self.registry.remove(&transfer_id);
        self.content.remove_transfer(&transfer_id);
        if let Err(e) = self.staging.purge(&transfer_id).await {
            return Err(backoff::Error::transient(TransferError::EndTransferFailed {
                transfer_id,
                reason: e.to_string(),
            }));
        }
        self.progress.log_exception(
            &transfer_id,
            "Transfer timed out",
            &TransferError::LockTimedOut { transfer_id },
        );
        self.progress
            .update_status(&transfer_id, TransferStatus::Error);
        Ok(())
    }
}

impl ExpiryHandler for TimeoutWatchdog {
    fn lease_expired(&self, transfer_id: TransferId) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(%transfer_id, err = %e, "no runtime to time out transfer");
                return;
            }
        };
        let this = self.clone();
        handle.spawn(async move {
            // Failures are already logged by the instrumented call
            let _ = this.timeout(transfer_id).await;
        });
    }
}
