//! Line-oriented manifest format
//!
//! ```text
//! # comment
//! header <node count> sync|nosync
//! node <node id> <path> <content url or ->
//! deleted <node id> <path>
//! ```
//!
//! Fields are whitespace separated, so node ids, paths and URLs may not
//! contain whitespace. The header is optional but must come first.

use std::io::BufRead;

use anyhow::{anyhow, bail, ensure, Context};

use super::{ManifestHeader, ManifestNode, ManifestParser, ManifestProcessor};

#[derive(Debug, Default)]
pub struct LineManifestParser {
    line: usize,
    nodes: u64,
    header: Option<ManifestHeader>,
}

impl LineManifestParser {
    pub fn new() -> LineManifestParser {
        LineManifestParser::default()
    }

    fn parse_line(&mut self, line: &str, processor: &mut dyn ManifestProcessor) -> anyhow::Result<()> {
        let mut fields = line.split_whitespace();
        let Some(keyword) = fields.next() else {
            return Ok(());
        };
        if keyword.starts_with('#') {
            return Ok(());
        }
        let mut field = |name: &str| {
            fields
                .next()
                .ok_or_else(|| anyhow!("missing {}", name))
        };
        match keyword {
            "header" => {
                ensure!(
                    self.header.is_none() && self.nodes == 0,
                    "header must be the first entry"
                );
                let count = field("node count")?;
                let node_count = count
                    .parse::<u64>()
                    .with_context(|| format!("invalid node count {:?}", count))?;
                let sync = match field("sync mode")? {
                    "sync" => true,
                    "nosync" => false,
                    other => bail!("invalid sync mode {:?}", other),
                };
                let header = ManifestHeader {
                    node_count: Some(node_count),
                    sync,
                };
                processor.process_header(&header)?;
                self.header = Some(header);
            }
            "node" => {
                let node_id = field("node id")?.to_owned();
                let path = field("path")?.to_owned();
                let content_url = match field("content url")? {
                    "-" => None,
                    url => Some(url.to_owned()),
                };
                self.node(
                    ManifestNode::Normal {
                        node_id,
                        path,
                        content_url,
                    },
                    processor,
                )?;
            }
            "deleted" => {
                let node_id = field("node id")?.to_owned();
                let path = field("path")?.to_owned();
                self.node(ManifestNode::Deleted { node_id, path }, processor)?;
            }
            other => bail!("unexpected entry {:?}", other),
        }
        ensure!(fields.next().is_none(), "trailing fields");
        Ok(())
    }

    fn node(&mut self, node: ManifestNode, processor: &mut dyn ManifestProcessor) -> anyhow::Result<()> {
        self.nodes += 1;
        processor.process_node(&node)
    }
}

impl ManifestParser for LineManifestParser {
    fn parse(
        &mut self,
        input: &mut dyn BufRead,
        processor: &mut dyn ManifestProcessor,
    ) -> anyhow::Result<()> {
        processor.start_manifest()?;
        for line in input.lines() {
            self.line += 1;
            let line = line.with_context(|| format!("line {}", self.line))?;
            let line_no = self.line;
            self.parse_line(&line, processor)
                .with_context(|| format!("line {}", line_no))?;
        }
        if let Some(ManifestHeader {
            node_count: Some(count),
            ..
        }) = self.header
        {
            ensure!(
                count == self.nodes,
                "header declares {} nodes, manifest has {}",
                count,
                self.nodes
            );
        }
        processor.end_manifest()
    }

    fn reset(&mut self) {
        *self = LineManifestParser::default();
    }
}
