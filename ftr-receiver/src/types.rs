use std::{fmt, str::FromStr};

use uuid::Uuid;

/// Opaque identifier of one inbound transfer session.
///
/// The hyphenated form doubles as the name of the session's staging
/// directory, so every id maps to exactly one directory and can never
/// escape the staging root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(Uuid);

impl TransferId {
    pub fn new() -> TransferId {
        TransferId(Uuid::new_v4())
    }

    pub fn staging_dir_name(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for TransferId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TransferId(Uuid::parse_str(s)?))
    }
}

/// Lifecycle of an inbound transfer as seen by a polling client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    PreCommit,
    CommitRequested,
    Committing,
    Complete,
    Error,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Complete | TransferStatus::Error | TransferStatus::Cancelled
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferStatus::PreCommit => "PRE_COMMIT",
            TransferStatus::CommitRequested => "COMMIT_REQUESTED",
            TransferStatus::Committing => "COMMITTING",
            TransferStatus::Complete => "COMPLETE",
            TransferStatus::Error => "ERROR",
            TransferStatus::Cancelled => "CANCELLED",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_id_parse_display() {
        let id = TransferId::new();
        let parsed: TransferId = id.to_string().parse().expect("parse id");
        assert_eq!(id, parsed);
        assert_eq!(id.staging_dir_name(), id.to_string());
        assert!("../../etc".parse::<TransferId>().is_err());
    }

    #[test]
    fn test_terminal_status() {
        assert!(!TransferStatus::PreCommit.is_terminal());
        assert!(!TransferStatus::CommitRequested.is_terminal());
        assert!(!TransferStatus::Committing.is_terminal());
        assert!(TransferStatus::Complete.is_terminal());
        assert!(TransferStatus::Error.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
    }
}
