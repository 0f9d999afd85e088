//! Applying a manifest to a target directory

use std::{
    collections::HashSet,
    fs, io,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use tracing::{debug, info};

use super::{
    requisite::part_name, LineManifestParser, ManifestHeader, ManifestNode, ManifestParser,
    ManifestProcessor, ProcessorContext, ProcessorFactory,
};
use crate::{
    content::{ContentLedger, ContentOracle},
    registry::ContentTable,
    staging::validate_content_id,
    types::TransferId,
};

/// Resolve a manifest path under `root`. Manifest paths are relative and
/// may not climb out of the root.
fn resolve(root: &Path, path: &str) -> anyhow::Result<PathBuf> {
    let rel = Path::new(path);
    if path.is_empty()
        || !rel
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
    {
        bail!("invalid manifest path {:?}", path);
    }
    Ok(root.join(rel))
}

/// Commit processor writing the transferred tree into a directory.
///
/// Nodes with content are copied from the content the session staged,
/// nodes without content become directories, and deleted nodes are
/// removed. A manifest whose header asks for sync also removes everything
/// under the target that it does not list. The content ledger is saved at
/// the end of the pass so later transfers only carry what changed.
pub struct FileSystemCommitProcessor {
    transfer_id: TransferId,
    content: Arc<ContentTable>,
    target: PathBuf,
    ledger: Arc<ContentLedger>,
    sync: bool,

    /// Target paths the manifest keeps, with their ancestors
    kept: HashSet<PathBuf>,
    written: u64,
    removed: u64,
}

impl FileSystemCommitProcessor {
    pub fn new(
        ctx: &ProcessorContext,
        target: &Path,
        ledger: Arc<ContentLedger>,
    ) -> FileSystemCommitProcessor {
        FileSystemCommitProcessor {
            transfer_id: ctx.transfer_id,
            content: ctx.content.clone(),
            target: target.to_owned(),
            ledger,
            sync: false,
            kept: HashSet::new(),
            written: 0,
            removed: 0,
        }
    }

    fn keep(&mut self, dest: &Path) {
        for path in dest.ancestors() {
            if path == self.target || !self.kept.insert(path.to_owned()) {
                break;
            }
        }
    }

    fn apply_content(&mut self, node_id: &str, dest: &Path, content_url: &str) -> anyhow::Result<()> {
        let part = part_name(content_url);
        validate_content_id(part)
            .with_context(|| format!("content {} for node {}", content_url, node_id))?;
        let staged = self
            .content
            .get(part)
            .filter(|staged| staged.transfer_id == self.transfer_id);
        let Some(staged) = staged else {
            if self.ledger.is_new_or_modified(node_id, content_url) {
                bail!(
                    "content {} for node {} was not received",
                    content_url,
                    node_id
                );
            }
            debug!(node_id, "content unchanged");
            return Ok(());
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::copy(&staged.path, dest).with_context(|| format!("writing {}", dest.display()))?;
        self.ledger.record(node_id, content_url);
        self.written += 1;
        Ok(())
    }

    fn remove(&mut self, dest: &Path) -> anyhow::Result<()> {
        let res = match fs::symlink_metadata(dest) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(dest),
            Ok(_) => fs::remove_file(dest),
            Err(e) => Err(e),
        };
        match res {
            Ok(()) => self.removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("removing {}", dest.display())),
        }
        Ok(())
    }

    /// Remove whatever under `dir` the manifest did not keep.
    fn prune(&mut self, dir: &Path) -> anyhow::Result<()> {
        let entries = fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
            let path = entry.path();
            if !self.kept.contains(&path) {
                debug!(path = %path.display(), "not in synced manifest");
                self.remove(&path)?;
            } else if entry.file_type()?.is_dir() {
                self.prune(&path)?;
            }
        }
        Ok(())
    }
}

impl ManifestProcessor for FileSystemCommitProcessor {
    fn start_manifest(&mut self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.target)
            .with_context(|| format!("creating {}", self.target.display()))?;
        self.sync = false;
        self.kept.clear();
        self.written = 0;
        self.removed = 0;
        Ok(())
    }

    fn process_header(&mut self, header: &ManifestHeader) -> anyhow::Result<()> {
        self.sync = header.sync;
        Ok(())
    }

    fn process_node(&mut self, node: &ManifestNode) -> anyhow::Result<()> {
        let dest = resolve(&self.target, node.path())?;
        match node {
            ManifestNode::Normal {
                node_id,
                content_url: Some(content_url),
                ..
            } if !content_url.is_empty() => {
                self.keep(&dest);
                self.apply_content(node_id, &dest, content_url)
            }
            ManifestNode::Normal { .. } => {
                self.keep(&dest);
                fs::create_dir_all(&dest).with_context(|| format!("creating {}", dest.display()))
            }
            ManifestNode::Deleted { node_id, .. } => {
                self.remove(&dest)?;
                self.ledger.forget(node_id);
                Ok(())
            }
        }
    }

    fn end_manifest(&mut self) -> anyhow::Result<()> {
        if self.sync {
            let target = self.target.clone();
            self.prune(&target)?;
        }
        self.ledger.save().context("saving content ledger")?;
        info!(
            transfer_id = %self.transfer_id,
            written = self.written,
            removed = self.removed,
            sync = self.sync,
            target = %self.target.display(),
            "manifest applied"
        );
        Ok(())
    }
}

/// Line manifests committed into a target directory.
pub struct DefaultProcessorFactory {
    target: PathBuf,
    ledger: Arc<ContentLedger>,
}

impl DefaultProcessorFactory {
    pub fn new(target: impl Into<PathBuf>, ledger: Arc<ContentLedger>) -> DefaultProcessorFactory {
        DefaultProcessorFactory {
            target: target.into(),
            ledger,
        }
    }
}

impl ProcessorFactory for DefaultProcessorFactory {
    fn parser(&self) -> Box<dyn ManifestParser> {
        Box::new(LineManifestParser::new())
    }

    fn commit_processors(&self, ctx: &ProcessorContext) -> Vec<Box<dyn ManifestProcessor>> {
        vec![Box::new(FileSystemCommitProcessor::new(
            ctx,
            &self.target,
            self.ledger.clone(),
        ))]
    }
}
