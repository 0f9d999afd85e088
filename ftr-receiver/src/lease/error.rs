use std::fmt;

pub type Result<T> = std::result::Result<T, LeaseError>;

/// Errors that can occur while holding a transfer lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    /// The named lock is held by someone else
    Unavailable,
    /// The lease was released or has timed out
    Inactive,
    /// The provider could not service the request
    Provider(String),
}

impl fmt::Display for LeaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseError::Unavailable => write!(f, "lock is held elsewhere"),
            LeaseError::Inactive => write!(f, "lease is no longer active"),
            LeaseError::Provider(msg) => write!(f, "lock provider: {}", msg),
        }
    }
}

impl std::error::Error for LeaseError {}
