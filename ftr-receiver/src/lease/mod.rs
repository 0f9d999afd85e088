//! Transfer leases
//!
//! A renewable, named mutual-exclusion lock held for the lifetime of an
//! inbound transfer. The lock itself lives in an external [`LockProvider`];
//! the [`Lease`] tracks whether the session is still alive and tells the
//! provider when an idle session should be let go.

mod error;
mod memory;
mod provider;
mod transfer_lease;
mod types;


pub use error::{LeaseError, Result};
pub use memory::InMemoryLockProvider;
pub use provider::{ExpiryHandler, LockProvider, RenewalCallback};
pub use transfer_lease::{Lease, TimeoutGuard};
pub use types::{LeaseConfig, LockToken};
