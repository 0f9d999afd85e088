//! Types for transfer leases

use std::{fmt, time::Duration};

use uuid::Uuid;

use crate::config::ReceiverConfig;

/// Token identifying one acquisition of a named lock.
///
/// Tokens are minted by the lock provider and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> LockToken {
        LockToken(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Timing parameters of a lease
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Lease duration handed to the provider on acquisition and renewal
    pub refresh_time: Duration,

    /// Additional acquisition attempts when the lock is held
    pub retry_count: u32,

    /// Pause between acquisition attempts
    pub retry_wait: Duration,

    /// Idle time after which the lease reports itself inactive
    pub timeout: Duration,
}

impl From<&ReceiverConfig> for LeaseConfig {
    fn from(config: &ReceiverConfig) -> Self {
        Self {
            refresh_time: config.lock_refresh_time,
            retry_count: config.lock_retry_count,
            retry_wait: config.lock_retry_wait,
            timeout: config.lock_timeout,
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        (&ReceiverConfig::default()).into()
    }
}
