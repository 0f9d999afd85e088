//! Content-diff oracle
//!
//! The ledger of committed content can be kept in a `ledger.json` file so a
//! receiver restarted over the same target only asks for what changed.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use dashmap::DashMap;
use tracing::{debug, trace, warn};

/// Answers whether content referenced by a manifest must be transferred.
pub trait ContentOracle: Send + Sync {
    /// True when the receiver has no content for `node_id`, or has content
    /// under a different URL.
    fn is_new_or_modified(&self, node_id: &str, content_url: &str) -> bool;
}

/// On-disk form of the ledger
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct LedgerFile {
    /// Content URL last committed, by node id
    committed: BTreeMap<String, String>,
}

/// Remembers the content URL last committed for each node.
#[derive(Default)]
pub struct ContentLedger {
    committed: DashMap<String, String>,

    /// Where [`ContentLedger::save`] writes, if anywhere
    path: Option<PathBuf>,
}

impl ContentLedger {
    /// A ledger that lives only as long as the process.
    pub fn new() -> ContentLedger {
        ContentLedger::default()
    }

    /// Load the ledger kept at `path`. A missing file is an empty ledger;
    /// later saves go to `path`.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<ContentLedger> {
        let path = path.into();
        let file = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<LedgerFile>(&contents)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => LedgerFile::default(),
            Err(e) => return Err(e),
        };
        debug!(path = %path.display(), nodes = file.committed.len(), "opened content ledger");
        Ok(ContentLedger {
            committed: file.committed.into_iter().collect(),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the ledger out, replacing the previous file in one rename. An
    /// in-memory ledger has nowhere to go and saves trivially.
    pub fn save(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = LedgerFile {
            committed: self
                .committed
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let pending = path.with_extension("json.tmp");
        fs::write(&pending, json)?;
        if let Err(e) = fs::rename(&pending, path) {
            warn!(err = %e, path = %pending.display(), "failed to replace content ledger");
            let _ = fs::remove_file(&pending);
            return Err(e);
        }
        debug!(path = %path.display(), nodes = file.committed.len(), "saved content ledger");
        Ok(())
    }

    pub fn record(&self, node_id: &str, content_url: &str) {
        trace!(node_id, content_url, "content recorded");
        self.committed
            .insert(node_id.to_owned(), content_url.to_owned());
    }

    pub fn forget(&self, node_id: &str) {
        self.committed.remove(node_id);
    }

    pub fn content_url(&self, node_id: &str) -> Option<String> {
        self.committed.get(node_id).map(|url| url.clone())
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}

impl ContentOracle for ContentLedger {
    fn is_new_or_modified(&self, node_id: &str, content_url: &str) -> bool {
        self.committed
            .get(node_id)
            .map(|url| url.as_str() != content_url)
            .unwrap_or(true)
    }
}
