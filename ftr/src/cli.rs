use std::{io::IsTerminal, path::PathBuf, time::Duration};

use anyhow::{Error, Result};
use clap::{arg, Parser, Subcommand};
use path_absolutize::Absolutize;
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "ftr")]
#[command(bin_name = "ftr")]
pub struct Cli {
    #[arg(long, env)]
    pub no_ui: bool,

    #[arg(long, env)]
    pub state_dir: Option<String>,

    /// Idle seconds before an unattended transfer is timed out
    #[arg(long = "lock-timeout", default_value = "1200")]
    pub lock_timeout: u64,

    #[command(subcommand)]
    pub commands: Commands,
}

impl Cli {
    pub fn no_ui(&self) -> bool {
        self.no_ui || !std::io::stdout().is_terminal()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout)
    }

    /// Directory holding the staging area for the command's target.
    pub fn state_dir(&self) -> Result<String> {
        if let Some(s) = &self.state_dir {
            return Ok(s.to_owned());
        }
        match self.commands {
            Commands::Receive { ref output, .. } | Commands::Requisite { ref output, .. } => {
                let target = output.absolutize()?;
                self.state_dir_for(format!("receive:{}", target.to_string_lossy()))
            }
            Commands::Version => Err(Error::msg("invalid command")),
        }
    }

    pub fn state_dir_for(&self, key: String) -> Result<String> {
        let mut key_digest = Sha256::new();
        key_digest.update(key.as_bytes());
        let key_digest_bytes: [u8; 32] = key_digest.finalize().into();
        let dir_name = hex::encode(key_digest_bytes);
        let data_dir = dirs::state_dir()
            .or(dirs::data_local_dir())
            .ok_or(Error::msg("cannot resolve state dir"))?;
        let state_dir = data_dir
            .join("ftr")
            .join(dir_name)
            .into_os_string()
            .into_string()
            .map_err(|os| Error::msg(format!("{:?}", os)))?;
        debug!(state_dir);
        Ok(state_dir)
    }

    pub fn version(&self) -> bool {
        matches!(self.commands, Commands::Version)
    }

    /// Where committed content is written.
    pub fn output(&self) -> Option<&PathBuf> {
        match &self.commands {
            Commands::Receive { output, .. } | Commands::Requisite { output, .. } => Some(output),
            Commands::Version => None,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Receive a transfer: stage the manifest and the content it needs, then
    /// commit it to the output directory.
    Receive {
        manifest: PathBuf,

        /// Directory holding the transfer's content parts, by part name
        content_dir: PathBuf,

        #[arg(long = "output", short = 'o', default_value = ".")]
        output: PathBuf,

        #[arg(long = "source-id", default_value = "ftr-cli")]
        source_id: String,

        /// Commit in the background and poll for status
        #[arg(long = "async")]
        async_commit: bool,
    },
    /// Print the content parts a manifest needs that the output doesn't have.
    Requisite {
        manifest: PathBuf,

        #[arg(long = "output", short = 'o', default_value = ".")]
        output: PathBuf,
    },
    Version,
}
