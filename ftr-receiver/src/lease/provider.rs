use std::{sync::Arc, time::Duration};

use crate::types::TransferId;

use super::{error::Result, types::LockToken};

/// External service granting named, renewable locks.
pub trait LockProvider: Send + Sync {
    /// Make one attempt to take the named lock for `lease_duration`.
    ///
    /// Fails with [`LeaseError::Unavailable`](super::LeaseError::Unavailable)
    /// when the lock is held by another token.
    fn acquire(&self, name: &str, lease_duration: Duration) -> Result<LockToken>;

    /// Keep the lock alive for as long as `callback` reports itself active.
    ///
    /// The provider checks the callback periodically from its own task. Once
    /// the callback reports inactive the lock is dropped and
    /// [`RenewalCallback::on_expired`] is invoked.
    fn register_renewal(
        &self,
        token: &LockToken,
        name: &str,
        lease_duration: Duration,
        callback: Arc<dyn RenewalCallback>,
    ) -> Result<()>;

    /// Release the lock if `token` still holds it.
    fn release(&self, token: &LockToken, name: &str) -> Result<()>;
}

/// Callbacks the lock provider makes into the lock holder.
pub trait RenewalCallback: Send + Sync {
    /// Whether the holder still wants the lock.
    fn is_active(&self) -> bool;

    /// The provider dropped the lock after `is_active` returned false.
    fn on_expired(&self);
}

/// Last-chance cleanup for a session whose lease expired.
pub trait ExpiryHandler: Send + Sync {
    fn lease_expired(&self, transfer_id: TransferId);
}
