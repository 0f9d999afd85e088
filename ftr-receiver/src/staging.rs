//! Per-session staging directories

use std::{
    io,
    path::{Component, Path, PathBuf},
};

use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncRead, AsyncWriteExt},
};
use tracing::{debug, trace};

use crate::types::TransferId;

/// Name of the staged manifest inside a session's staging directory.
pub const SNAPSHOT_FILE_NAME: &str = "snapshot.xml";

/// Outcome of staging a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staged {
    /// The file was written with this many bytes.
    Created(u64),

    /// A file was already staged under that name and was left untouched.
    AlreadyExists,
}

/// Scratch storage for inbound transfers. Each session owns one directory
/// under the staging root, named after its transfer id.
#[derive(Debug, Clone)]
pub struct StagingStore {
    root: PathBuf,
}

impl StagingStore {
    pub fn new(root: impl Into<PathBuf>) -> StagingStore {
        StagingStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, transfer_id: &TransferId) -> PathBuf {
        self.root.join(transfer_id.staging_dir_name())
    }

    pub fn snapshot_path(&self, transfer_id: &TransferId) -> PathBuf {
        self.dir(transfer_id).join(SNAPSHOT_FILE_NAME)
    }

    /// Location of a content file. Content ids are file names and must not
    /// name anything outside the session directory.
    pub fn content_path(&self, transfer_id: &TransferId, content_id: &str) -> io::Result<PathBuf> {
        validate_content_id(content_id)?;
        Ok(self.dir(transfer_id).join(content_id))
    }

    pub async fn allocate(&self, transfer_id: &TransferId) -> io::Result<PathBuf> {
        let dir = self.dir(transfer_id);
        fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "allocated staging directory");
        Ok(dir)
    }

    pub async fn has_snapshot(&self, transfer_id: &TransferId) -> bool {
        fs::try_exists(self.snapshot_path(transfer_id))
            .await
            .unwrap_or(false)
    }

    pub async fn stage_snapshot<R>(&self, transfer_id: &TransferId, reader: &mut R) -> io::Result<Staged>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        stage_file(&self.snapshot_path(transfer_id), reader).await
    }

    pub async fn stage_content<R>(
        &self,
        transfer_id: &TransferId,
        content_id: &str,
        reader: &mut R,
    ) -> io::Result<(PathBuf, Staged)>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = self.content_path(transfer_id, content_id)?;
        let staged = stage_file(&path, reader).await?;
        Ok((path, staged))
    }

    /// Remove the session's staging directory and everything in it. A
    /// directory that is already gone is not an error.
    pub async fn purge(&self, transfer_id: &TransferId) -> io::Result<()> {
        let dir = self.dir(transfer_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(dir = %dir.display(), "purged staging directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Content ids name a single file in the session directory, other than the
/// staged manifest.
pub fn validate_content_id(content_id: &str) -> io::Result<()> {
    let mut components = Path::new(content_id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None)
            if name == content_id && content_id != SNAPSHOT_FILE_NAME =>
        {
            Ok(())
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid content id {:?}", content_id),
        )),
    }
}

/// Write `reader` to a new file at `path`. An existing file is never
/// overwritten; a partial file is removed if the copy fails.
async fn stage_file<R>(path: &Path, reader: &mut R) -> io::Result<Staged>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "already staged");
            return Ok(Staged::AlreadyExists);
        }
        Err(e) => return Err(e),
    };

    let res = async {
        let written = tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok::<u64, io::Error>(written)
    }
    .await;
    match res {
        Ok(written) => {
            trace!(path = %path.display(), written, "staged");
            Ok(Staged::Created(written))
        }
        Err(e) => {
            drop(file);
            if let Err(rm_err) = fs::remove_file(path).await {
                debug!(path = %path.display(), err = %rm_err, "failed to remove partial file");
            }
            Err(e)
        }
    }
}
