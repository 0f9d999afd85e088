//! Core lease functionality

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use backoff::backoff::{Backoff, Constant};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use crate::types::TransferId;

use super::error::{LeaseError, Result};
use super::provider::{ExpiryHandler, LockProvider, RenewalCallback};
use super::types::{LeaseConfig, LockToken};

/// Activity timestamps only move forward in steps of at least this much.
const ACTIVITY_RESOLUTION: Duration = Duration::from_secs(1);

struct LeaseState {
    /// Token granted by the provider, set once on acquisition
    token: Option<LockToken>,

    /// Session owning the lease, bound after the session id is minted
    transfer_id: Option<TransferId>,

    active: bool,

    /// Set while a client operation is running on the session
    processing: bool,

    last_active_at: Instant,
}

impl LeaseState {
    fn touch(&mut self, now: Instant) {
        if now > self.last_active_at + ACTIVITY_RESOLUTION {
            self.last_active_at = now;
            trace!(?now, "lease activity");
        }
    }
}

/// A renewable lock guarding one inbound transfer.
///
/// Client request tasks and the lock provider's renewal task both operate on
/// the lease; every operation takes the lease's own mutex, which is never
/// held across an await point or while calling out to the provider.
pub struct Lease {
    name: String,
    config: LeaseConfig,
    provider: Arc<dyn LockProvider>,
    expiry: Weak<dyn ExpiryHandler>,
    state: Mutex<LeaseState>,
}

impl Lease {
    pub fn new(
        name: &str,
        config: LeaseConfig,
        provider: Arc<dyn LockProvider>,
        expiry: Weak<dyn ExpiryHandler>,
    ) -> Arc<Lease> {
        Arc::new(Lease {
            name: name.to_owned(),
            config,
            provider,
            expiry,
            state: Mutex::new(LeaseState {
                token: None,
                transfer_id: None,
                active: false,
                processing: false,
                last_active_at: Instant::now(),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, LeaseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the named lock, retrying while it is held elsewhere, and register
    /// this lease for renewal.
    #[tracing::instrument(skip_all, fields(name = %self.name), err)]
    pub async fn acquire(self: &Arc<Self>) -> Result<LockToken> {
        let mut retry = Constant::new(self.config.retry_wait);
        let mut attempt = 0u32;
        let token = loop {
            match self.provider.acquire(&self.name, self.config.refresh_time) {
                Ok(token) => break token,
                Err(LeaseError::Unavailable) if attempt < self.config.retry_count => {
                    attempt += 1;
                    let delay = retry.next_backoff().unwrap_or(self.config.retry_wait);
                    debug!(attempt, ?delay, "lock held, retrying");
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        };

        {
            let mut state = self.state();
            state.token = Some(token.clone());
            state.active = true;
            state.last_active_at = Instant::now();
        }
        debug!(%token, refresh_time = ?self.config.refresh_time, "lock taken");

        let callback: Arc<dyn RenewalCallback> = self.clone();
        if let Err(err) = self.provider.register_renewal(
            &token,
            &self.name,
            self.config.refresh_time,
            callback,
        ) {
            if let Err(release_err) = self.release() {
                warn!(err = %release_err, "failed to release lock after renewal was refused");
            }
            return Err(err);
        }
        Ok(token)
    }

    /// Associate the lease with the session it guards.
    pub fn bind(&self, transfer_id: TransferId) {
        self.state().transfer_id = Some(transfer_id);
    }

    /// Mark the start of work on the session. The lease cannot time out until
    /// [`Lease::enable_timeout`] is called.
    pub fn suspend_timeout(&self) -> Result<()> {
        let mut state = self.state();
        if !state.active {
            debug!(name = %self.name, "lease not active");
            return Err(LeaseError::Inactive);
        }
        state.processing = true;
        state.touch(Instant::now());
        Ok(())
    }

    /// Mark the end of work on the session and restart the idle clock.
    pub fn enable_timeout(&self) {
        let mut state = self.state();
        state.touch(Instant::now());
        state.processing = false;
    }

    /// Whether the lease is still held and the session has not sat idle past
    /// the configured time-out. Work in progress keeps the lease alive no
    /// matter how long it takes.
    pub fn is_active(&self) -> bool {
        let state = self.state();
        if state.active
            && !state.processing
            && Instant::now() > state.last_active_at + self.config.timeout
        {
            return false;
        }
        trace!(name = %self.name, active = state.active, "is_active");
        state.active
    }

    /// Give up the lock. Releasing an inactive lease does nothing.
    pub fn release(&self) -> Result<()> {
        let token = {
            let mut state = self.state();
            if !state.active {
                return Ok(());
            }
            state.active = false;
            state.token.clone()
        };
        debug!(name = %self.name, "releasing lock");
        match token {
            Some(token) => self.provider.release(&token, &self.name),
            None => Ok(()),
        }
    }

    /// The provider dropped the lock after a missed renewal.
    pub fn expire(&self) {
        let transfer_id = {
            let mut state = self.state();
            if !state.active {
                return;
            }
            state.active = false;
            state.transfer_id
        };
        info!(name = %self.name, ?transfer_id, "lease has timed out");
        match (transfer_id, self.expiry.upgrade()) {
            (Some(transfer_id), Some(handler)) => handler.lease_expired(transfer_id),
            _ => debug!(name = %self.name, "no session to clean up"),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> Option<LockToken> {
        self.state().token.clone()
    }

    pub fn transfer_id(&self) -> Option<TransferId> {
        self.state().transfer_id
    }

    pub fn is_processing(&self) -> bool {
        self.state().processing
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Lease")
            .field("name", &self.name)
            .field("token", &state.token)
            .field("transfer_id", &state.transfer_id)
            .field("active", &state.active)
            .field("processing", &state.processing)
            .finish()
    }
}

impl RenewalCallback for Lease {
    fn is_active(&self) -> bool {
        Lease::is_active(self)
    }

    fn on_expired(&self) {
        self.expire()
    }
}

/// Re-enables the lease timeout when dropped, whichever way the guarded
/// operation exits.
pub struct TimeoutGuard {
    lease: Arc<Lease>,
}

impl TimeoutGuard {
    pub fn new(lease: Arc<Lease>) -> Self {
        Self { lease }
    }

    pub fn lease(&self) -> &Arc<Lease> {
        &self.lease
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.lease.enable_timeout();
    }
}
