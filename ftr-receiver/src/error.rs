use crate::{lease::LeaseError, types::TransferId};

pub type Result<T> = std::result::Result<T, TransferError>;

/// Failures surfaced by the transfer receiver.
///
/// Errors are cloneable so the first failure of a session can be kept on its
/// progress record and handed to every client that polls for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("transfer lock unavailable: another inbound transfer is in progress")]
    LockUnavailable,

    #[error("transfer lock not found for transfer {transfer_id}")]
    LockNotFound { transfer_id: TransferId },

    #[error("transfer lock timed out for transfer {transfer_id}")]
    LockTimedOut { transfer_id: TransferId },

    #[error("incompatible versions: source {source_version}, receiver {receiver_version}")]
    IncompatibleVersion {
        source_version: String,
        receiver_version: String,
    },

    #[error("transfer from repository {source_id} to itself is not permitted")]
    TransferToSelf { source_id: String },

    #[error("error while starting transfer: {reason}")]
    TransferStartFailed { reason: String },

    #[error("error while staging snapshot for transfer {transfer_id}: {reason}")]
    SnapshotStagingFailed {
        transfer_id: TransferId,
        reason: String,
    },

    #[error("error while staging content {content_id} for transfer {transfer_id}: {reason}")]
    ContentStagingFailed {
        transfer_id: TransferId,
        content_id: String,
        reason: String,
    },

    #[error("unable to commit transfer {transfer_id}: no snapshot received")]
    NoSnapshotReceived { transfer_id: TransferId },

    #[error("error while committing transfer {transfer_id}: {reason}")]
    CommitFailed {
        transfer_id: TransferId,
        reason: String,
    },

    #[error("error while generating requisite for transfer {transfer_id}: {reason}")]
    RequisiteGenerationFailed {
        transfer_id: TransferId,
        reason: String,
    },

    #[error("error while ending transfer {transfer_id}: {reason}")]
    EndTransferFailed {
        transfer_id: TransferId,
        reason: String,
    },

    #[error("unknown transfer {transfer_id}")]
    UnknownTransfer { transfer_id: TransferId },

    #[error("lock provider failure: {reason}")]
    LockProvider { reason: String },
}

impl From<LeaseError> for TransferError {
    fn from(err: LeaseError) -> Self {
        match err {
            LeaseError::Unavailable => TransferError::LockUnavailable,
            err => TransferError::LockProvider {
                reason: err.to_string(),
            },
        }
    }
}

impl TransferError {
    /// Map a lease failure on an established session.
    pub fn from_lease(err: LeaseError, transfer_id: TransferId) -> Self {
        match err {
            LeaseError::Inactive => TransferError::LockTimedOut { transfer_id },
            err => err.into(),
        }
    }

    /// Recover a transfer error from an arbitrary processor or hook failure,
    /// wrapping it with `wrap` when nothing in its chain is a `TransferError`.
    pub fn from_anyhow(err: &anyhow::Error, wrap: impl FnOnce(String) -> TransferError) -> Self {
        for cause in err.chain() {
            if let Some(transfer_err) = cause.downcast_ref::<TransferError>() {
                return transfer_err.clone();
            }
        }
        wrap(format!("{:#}", err))
    }

    pub fn commit_failed(transfer_id: TransferId) -> impl FnOnce(String) -> TransferError {
        move |reason| TransferError::CommitFailed {
            transfer_id,
            reason,
        }
    }

    pub fn requisite_failed(transfer_id: TransferId) -> impl FnOnce(String) -> TransferError {
        move |reason| TransferError::RequisiteGenerationFailed {
            transfer_id,
            reason,
        }
    }
}
