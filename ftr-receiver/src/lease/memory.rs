//! In-process lock provider

use std::{sync::Arc, time::Duration};

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::{
    runtime::Handle,
    select,
    time::{interval, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::error::{LeaseError, Result};
use super::provider::{LockProvider, RenewalCallback};
use super::types::LockToken;

struct Held {
    token: LockToken,
    expires_at: Instant,
}

struct Inner {
    locks: DashMap<String, Held>,
    cancel: CancellationToken,
}

impl Inner {
    fn holds(&self, token: &LockToken, name: &str) -> bool {
        self.locks
            .get(name)
            .map(|held| held.token == *token)
            .unwrap_or(false)
    }

    /// Renew the lock on every tick for as long as the holder is active.
    #[tracing::instrument(skip_all, fields(%name))]
    async fn renew(
        self: Arc<Self>,
        token: LockToken,
        name: String,
        lease_duration: Duration,
        callback: Arc<dyn RenewalCallback>,
    ) {
        let period = (lease_duration / 2).max(Duration::from_millis(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            select! {
                _ = self.cancel.cancelled() => {
                    return;
                }
                _ = ticker.tick() => {}
            }

            if !self.holds(&token, &name) {
                trace!("lock released, renewal stopped");
                return;
            }

            if callback.is_active() {
                if let Some(mut held) = self.locks.get_mut(&name) {
                    if held.token == token {
                        held.expires_at = Instant::now() + lease_duration;
                    }
                }
                trace!("lock renewed");
            } else {
                self.locks.remove_if(&name, |_, held| held.token == token);
                info!("lock holder inactive, lock released");
                callback.on_expired();
                return;
            }
        }
    }
}

/// Lock provider keeping its locks in process memory.
///
/// Each registered lock gets a renewal task on the current tokio runtime
/// which polls the holder every half lease duration.
#[derive(Clone)]
pub struct InMemoryLockProvider {
    inner: Arc<Inner>,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                locks: DashMap::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Whether the named lock is currently held and not lapsed.
    pub fn is_held(&self, name: &str) -> bool {
        self.inner
            .locks
            .get(name)
            .map(|held| held.expires_at > Instant::now())
            .unwrap_or(false)
    }

    /// Stop all renewal tasks. Held locks lapse at their expiry.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }
}

impl Default for InMemoryLockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LockProvider for InMemoryLockProvider {
    fn acquire(&self, name: &str, lease_duration: Duration) -> Result<LockToken> {
        let now = Instant::now();
        let token = LockToken::generate();
        match self.inner.locks.entry(name.to_owned()) {
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at > now {
                    return Err(LeaseError::Unavailable);
                }
                debug!(name, "taking over lapsed lock");
                entry.insert(Held {
                    token: token.clone(),
                    expires_at: now + lease_duration,
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(Held {
                    token: token.clone(),
                    expires_at: now + lease_duration,
                });
            }
        }
        Ok(token)
    }

    fn register_renewal(
        &self,
        token: &LockToken,
        name: &str,
        lease_duration: Duration,
        callback: Arc<dyn RenewalCallback>,
    ) -> Result<()> {
        let handle = Handle::try_current().map_err(|e| LeaseError::Provider(e.to_string()))?;
        if !self.inner.holds(token, name) {
            return Err(LeaseError::Inactive);
        }
        handle.spawn(self.inner.clone().renew(
            token.clone(),
            name.to_owned(),
            lease_duration,
            callback,
        ));
        Ok(())
    }

    fn release(&self, token: &LockToken, name: &str) -> Result<()> {
        if self
            .inner
            .locks
            .remove_if(name, |_, held| held.token == *token)
            .is_none()
        {
            debug!(name, %token, "lock not held by token");
        }
        Ok(())
    }
}
