mod config;
mod error;
mod registry;
mod types;

pub mod content;
pub mod lease;
pub mod manifest;
pub mod policy;
pub mod progress;
pub mod receiver;
pub mod staging;
pub mod transaction;
pub mod version;
pub mod watchdog;

pub use config::{ReceiverConfig, DEFAULT_LOCK_NAME};
pub use error::{Result, TransferError};
pub use lease::{InMemoryLockProvider, Lease, LockProvider};
pub use receiver::{Collaborators, PostCommitHook, TransferReceiver};
pub use registry::{ContentTable, SessionRegistry, StagedContent};
pub use types::{TransferId, TransferStatus};

#[cfg(test)]
pub mod tests;
