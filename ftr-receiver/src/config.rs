//! Receiver configuration

use std::{path::PathBuf, time::Duration};

pub const DEFAULT_LOCK_NAME: &str = "transfer.server.default";

/// Configuration for the transfer receiver
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Directory under which each session gets its own staging directory
    pub staging_root: PathBuf,

    /// Name of the domain-wide lock serializing inbound transfers
    pub lock_name: String,

    /// Lease duration handed to the lock provider; the provider checks back
    /// on the lease about twice per period
    pub lock_refresh_time: Duration,

    /// Additional attempts to take the lock when it is held
    pub lock_retry_count: u32,

    /// Pause between lock attempts
    pub lock_retry_wait: Duration,

    /// Idle time after which a session whose client went away is timed out
    pub lock_timeout: Duration,

    /// Identifier of the local repository, used to refuse transfers to self
    pub repository_id: Option<String>,

    /// Attempts made by the retrying transaction runner
    pub transaction_max_attempts: u32,
}

impl ReceiverConfig {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            ..Default::default()
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            staging_root: std::env::temp_dir().join("ftr-staging"),
            lock_name: DEFAULT_LOCK_NAME.to_owned(),
            lock_refresh_time: Duration::from_secs(60),
            lock_retry_count: 2,
            lock_retry_wait: Duration::from_millis(100),
            lock_timeout: Duration::from_secs(20 * 60), // 20 minutes
            repository_id: None,
            transaction_max_attempts: 3,
        }
    }
}
