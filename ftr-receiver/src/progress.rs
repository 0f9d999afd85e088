//! Transfer progress bookkeeping

use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{debug, warn};

use crate::{error::TransferError, types::TransferId, types::TransferStatus};

/// Status of a transfer and the first failure recorded against it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub status: TransferStatus,
    pub error: Option<TransferError>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportEntryKind {
    Comment,
    Exception,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub at: DateTime<Utc>,
    pub kind: ReportEntryKind,
    pub message: String,
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ReportEntryKind::Comment => "comment",
            ReportEntryKind::Exception => "exception",
        };
        write!(f, "{} [{}] {}", self.at.to_rfc3339(), kind, self.message)
    }
}

/// Everything logged against a transfer, for clients that want more than
/// the status.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    pub transfer_id: TransferId,
    pub status: TransferStatus,
    pub error: Option<TransferError>,
    pub entries: Vec<ReportEntry>,
}

/// Records transfer status where polling clients can see it. Status
/// outlives the session itself.
pub trait ProgressMonitor: Send + Sync {
    fn update_status(&self, transfer_id: &TransferId, status: TransferStatus);

    fn log_comment(&self, transfer_id: &TransferId, message: &str);

    /// Record a failure. Only the first failure becomes the transfer's error.
    fn log_exception(&self, transfer_id: &TransferId, message: &str, error: &TransferError);

    fn get_progress(&self, transfer_id: &TransferId) -> Option<TransferProgress>;

    fn get_report(&self, transfer_id: &TransferId) -> Option<TransferReport>;
}

struct Record {
    progress: TransferProgress,
    entries: Vec<ReportEntry>,
}

impl Record {
    fn new(now: DateTime<Utc>) -> Record {
        Record {
            progress: TransferProgress {
                status: TransferStatus::PreCommit,
                error: None,
                updated_at: now,
            },
            entries: vec![],
        }
    }
}

/// Progress monitor keeping records in memory.
///
/// A transfer in a terminal status stays there: later status updates are
/// ignored, so commit, cancel and timeout may race to finish a transfer and
/// the first to arrive wins.
#[derive(Default)]
pub struct InMemoryProgressMonitor {
    records: DashMap<TransferId, Record>,
}

impl InMemoryProgressMonitor {
    pub fn new() -> InMemoryProgressMonitor {
        InMemoryProgressMonitor::default()
    }

    fn with_record(&self, transfer_id: &TransferId, f: impl FnOnce(&mut Record, DateTime<Utc>)) {
        let now = Utc::now();
        match self.records.entry(*transfer_id) {
            Entry::Occupied(mut entry) => f(entry.get_mut(), now),
            Entry::Vacant(entry) => f(entry.insert(Record::new(now)).value_mut(), now),
        }
    }
}

impl ProgressMonitor for InMemoryProgressMonitor {
    fn update_status(&self, transfer_id: &TransferId, status: TransferStatus) {
        self.with_record(transfer_id, |record, now| {
            let current = record.progress.status;
            if current.is_terminal() && current != status {
                warn!(%transfer_id, %current, %status, "transfer already finished, status not changed");
                return;
            }
            debug!(%transfer_id, %status, "status");
            record.progress.status = status;
            record.progress.updated_at = now;
        });
    }

    fn log_comment(&self, transfer_id: &TransferId, message: &str) {
        self.with_record(transfer_id, |record, now| {
            record.entries.push(ReportEntry {
                at: now,
                kind: ReportEntryKind::Comment,
                message: message.to_owned(),
            });
        });
    }

    fn log_exception(&self, transfer_id: &TransferId, message: &str, error: &TransferError) {
        self.with_record(transfer_id, |record, now| {
            if record.progress.error.is_none() {
                record.progress.error = Some(error.clone());
                record.progress.updated_at = now;
            }
            record.entries.push(ReportEntry {
                at: now,
                kind: ReportEntryKind::Exception,
                message: format!("{}: {}", message, error),
            });
        });
    }

    fn get_progress(&self, transfer_id: &TransferId) -> Option<TransferProgress> {
        self.records
            .get(transfer_id)
            .map(|record| record.progress.clone())
    }

    fn get_report(&self, transfer_id: &TransferId) -> Option<TransferReport> {
        self.records.get(transfer_id).map(|record| TransferReport {
            transfer_id: *transfer_id,
            status: record.progress.status,
            error: record.progress.error.clone(),
            entries: record.entries.clone(),
        })
    }
}
