//! Replays a staged manifest through processors

use std::{fs::File, io::BufReader, path::Path};

use anyhow::Context;
use tracing::debug;

use super::{ManifestParser, ManifestProcessor};

/// Replay the manifest at `path` once per processor, in order. Every pass
/// reads the file from the start with a freshly reset parser. Stops at the
/// first failing pass.
pub fn replay(
    path: &Path,
    parser: &mut dyn ManifestParser,
    processors: &mut [Box<dyn ManifestProcessor>],
) -> anyhow::Result<()> {
    let passes = processors.len();
    for (pass, processor) in processors.iter_mut().enumerate() {
        debug!(pass = pass + 1, passes, manifest = %path.display(), "replaying manifest");
        replay_one(path, parser, processor.as_mut())
            .with_context(|| format!("manifest pass {} of {}", pass + 1, passes))?;
    }
    Ok(())
}

/// Replay the manifest at `path` through a single processor.
pub fn replay_one(
    path: &Path,
    parser: &mut dyn ManifestParser,
    processor: &mut dyn ManifestProcessor,
) -> anyhow::Result<()> {
    let res = File::open(path)
        .with_context(|| format!("opening manifest {}", path.display()))
        .and_then(|file| {
            let mut reader = BufReader::new(file);
            parser.parse(&mut reader, processor)
        });
    parser.reset();
    res
}
