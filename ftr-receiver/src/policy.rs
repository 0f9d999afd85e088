//! Admission checks for inbound transfers

use tracing::debug;

use crate::error::{Result, TransferError};

/// Decides whether a transfer from `source_id` may start.
pub trait TransferPolicy: Send + Sync {
    fn check_transfer(&self, source_id: &str, allow_self_transfer: bool) -> Result<()>;
}

/// Admits every transfer.
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

impl TransferPolicy for AllowAll {
    fn check_transfer(&self, _source_id: &str, _allow_self_transfer: bool) -> Result<()> {
        Ok(())
    }
}

/// Refuses transfers whose source is this receiver's own repository, unless
/// the sender explicitly asks for a transfer to self.
#[derive(Debug, Clone)]
pub struct RejectSelfTransfer {
    repository_id: String,
}

impl RejectSelfTransfer {
    pub fn new(repository_id: &str) -> RejectSelfTransfer {
        RejectSelfTransfer {
            repository_id: repository_id.to_owned(),
        }
    }
}

impl TransferPolicy for RejectSelfTransfer {
    fn check_transfer(&self, source_id: &str, allow_self_transfer: bool) -> Result<()> {
        if !allow_self_transfer && source_id == self.repository_id {
            debug!(source_id, "transfer to self refused");
            return Err(TransferError::TransferToSelf {
                source_id: source_id.to_owned(),
            });
        }
        Ok(())
    }
}
