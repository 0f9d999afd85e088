//! Requisite generation: the content a transfer still needs

use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

use super::{ManifestNode, ManifestProcessor, ProcessorContext, RequisiteSink};
use crate::{
    content::ContentOracle, registry::ContentTable, staging::validate_content_id,
    types::TransferId,
};

/// One content file the receiver wants the sender to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingContent {
    pub node_id: String,
    pub content_url: String,

    /// Content id under which the sender should stage the file
    pub part_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requisite {
    pub transfer_id: TransferId,
    pub missing: Vec<MissingContent>,
}

/// Name of the staged part carrying the content at `content_url`.
pub fn part_name(content_url: &str) -> &str {
    content_url.rsplit('/').next().unwrap_or(content_url)
}

/// Lists content of new or modified nodes that the session has not staged
/// yet.
pub struct RequisiteProcessor {
    transfer_id: TransferId,
    oracle: Arc<dyn ContentOracle>,
    content: Arc<ContentTable>,
    sink: RequisiteSink,
}

impl RequisiteProcessor {
    pub fn new(ctx: &ProcessorContext, sink: RequisiteSink) -> RequisiteProcessor {
        RequisiteProcessor {
            transfer_id: ctx.transfer_id,
            oracle: ctx.oracle.clone(),
            content: ctx.content.clone(),
            sink,
        }
    }
}

impl ManifestProcessor for RequisiteProcessor {
    fn start_manifest(&mut self) -> anyhow::Result<()> {
        debug!(transfer_id = %self.transfer_id, "start requisite");
        Ok(())
    }

    fn process_node(&mut self, node: &ManifestNode) -> anyhow::Result<()> {
        let ManifestNode::Normal {
            node_id,
            content_url: Some(content_url),
            ..
        } = node
        else {
            return Ok(());
        };
        if content_url.is_empty() || !self.oracle.is_new_or_modified(node_id, content_url) {
            return Ok(());
        }
        let part = part_name(content_url);
        validate_content_id(part)
            .with_context(|| format!("content {} for node {}", content_url, node_id))?;
        if self.content.is_staged(&self.transfer_id, part) {
            debug!(%node_id, part, "content already staged");
            return Ok(());
        }
        debug!(%node_id, %content_url, "content is required");
        self.sink
            .lock()
            .map_err(|_| anyhow::anyhow!("requisite sink poisoned"))?
            .push(MissingContent {
                node_id: node_id.to_owned(),
                content_url: content_url.to_owned(),
                part_name: part.to_owned(),
            });
        Ok(())
    }

    fn end_manifest(&mut self) -> anyhow::Result<()> {
        debug!(transfer_id = %self.transfer_id, "end requisite");
        Ok(())
    }
}
