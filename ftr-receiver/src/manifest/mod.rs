//! Manifest model and processing
//!
//! A staged manifest is never interpreted by the receiver itself. It is
//! replayed through a [`ManifestParser`] into one [`ManifestProcessor`] per
//! pass; processors decide what the manifest means.

use std::{
    io::BufRead,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use crate::{content::ContentOracle, registry::ContentTable, types::TransferId};

pub mod apply;
pub mod pipeline;
pub mod requisite;
pub mod text;

pub use apply::{DefaultProcessorFactory, FileSystemCommitProcessor};
pub use requisite::{MissingContent, Requisite, RequisiteProcessor};
pub use text::LineManifestParser;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManifestHeader {
    /// Number of node entries the sender declared, if any
    pub node_count: Option<u64>,

    /// Whether nodes absent from the manifest should be removed on commit
    pub sync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestNode {
    Normal {
        node_id: String,
        path: String,
        content_url: Option<String>,
    },
    Deleted {
        node_id: String,
        path: String,
    },
}

impl ManifestNode {
    pub fn node_id(&self) -> &str {
        match self {
            ManifestNode::Normal { node_id, .. } | ManifestNode::Deleted { node_id, .. } => node_id,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            ManifestNode::Normal { path, .. } | ManifestNode::Deleted { path, .. } => path,
        }
    }
}

/// Consumes one full replay of a manifest.
pub trait ManifestProcessor: Send {
    fn start_manifest(&mut self) -> anyhow::Result<()>;

    fn process_header(&mut self, _header: &ManifestHeader) -> anyhow::Result<()> {
        Ok(())
    }

    fn process_node(&mut self, node: &ManifestNode) -> anyhow::Result<()>;

    fn end_manifest(&mut self) -> anyhow::Result<()>;
}

/// Streams a manifest into a processor, start to end.
pub trait ManifestParser: Send {
    fn parse(
        &mut self,
        input: &mut dyn BufRead,
        processor: &mut dyn ManifestProcessor,
    ) -> anyhow::Result<()>;

    /// Forget everything seen in the previous pass.
    fn reset(&mut self);
}

/// What processors get to know about the session they run for.
#[derive(Clone)]
pub struct ProcessorContext {
    pub transfer_id: TransferId,
    pub staging_dir: PathBuf,
    pub oracle: Arc<dyn ContentOracle>,
    pub content: Arc<ContentTable>,
}

/// Collects the content a requisite pass finds missing.
pub type RequisiteSink = Arc<Mutex<Vec<MissingContent>>>;

/// Supplies parsers and processors for each commit or requisite pass.
pub trait ProcessorFactory: Send + Sync {
    fn parser(&self) -> Box<dyn ManifestParser>;

    /// Processors run in order, each over its own replay of the manifest.
    fn commit_processors(&self, ctx: &ProcessorContext) -> Vec<Box<dyn ManifestProcessor>>;

    fn requisite_processor(
        &self,
        ctx: &ProcessorContext,
        sink: RequisiteSink,
    ) -> Box<dyn ManifestProcessor> {
        Box::new(RequisiteProcessor::new(ctx, sink))
    }
}
