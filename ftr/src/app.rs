use std::{path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use path_absolutize::Absolutize;
use tokio::{fs::File, select, time::sleep};
use tracing::{debug, error, info, warn};

use ftr_receiver::{
    manifest::requisite::Requisite, version::TransferVersion, Collaborators, ReceiverConfig,
    TransferId, TransferReceiver,
};

use crate::{cli::Commands, init_logging, Cli};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct App {
    cli: Cli,
    multi_progress: MultiProgress,
}

impl App {
    pub fn new(cli: Cli) -> Result<App> {
        Ok(App {
            cli,
            multi_progress: MultiProgress::new(),
        })
    }

    #[tracing::instrument(skip_all)]
    pub async fn run(&mut self) -> Result<()> {
        self.multi_progress
            .println(format!("📥 ftr {}", env!("CARGO_PKG_VERSION")))?;

        if self.cli.version() {
            println!("{}", TransferVersion::current());
            return Ok(());
        }

        if self.cli.no_ui() {
            init_logging(None);
        } else {
            init_logging(Some(&self.multi_progress));
        }

        self.execute().await
    }

    /// Run the receive or requisite command against its output directory.
    pub async fn execute(&self) -> Result<()> {
        let receiver = self.new_receiver()?;
        let res = match &self.cli.commands {
            Commands::Receive {
                manifest,
                content_dir,
                source_id,
                async_commit,
                ..
            } => {
                self.receive(&receiver, manifest, content_dir, source_id, *async_commit)
                    .await
            }
            Commands::Requisite { manifest, .. } => self.requisite(&receiver, manifest).await,
            c => bail!("unexpected subcommand: {:?}", c),
        };
        if let Err(e) = &res {
            error!(err = %e);
        }
        res
    }

    fn new_receiver(&self) -> Result<TransferReceiver> {
        let output = self
            .cli
            .output()
            .context("command has no output directory")?;
        let target = output.absolutize()?.to_path_buf();
        let state_dir = self.cli.state_dir()?;
        debug!(target = %target.display(), %state_dir);

        let config = ReceiverConfig {
            lock_timeout: self.cli.lock_timeout(),
            ..ReceiverConfig::new(Path::new(&state_dir).join("staging"))
        };
        let ledger_path = Path::new(&state_dir).join("ledger.json");
        let collab = Collaborators::persistent(&config, target, &ledger_path)
            .with_context(|| format!("opening content ledger {}", ledger_path.display()))?;
        Ok(TransferReceiver::new(config, collab))
    }

    #[tracing::instrument(skip_all, err)]
    async fn receive(
        &self,
        receiver: &TransferReceiver,
        manifest: &Path,
        content_dir: &Path,
        source_id: &str,
        async_commit: bool,
    ) -> Result<()> {
        let version = receiver.get_version();
        let transfer_id = receiver.start(source_id, false, &version).await?;
        info!(%transfer_id, "started transfer");

        let res = select! {
            res = self.receive_transfer(receiver, &transfer_id, manifest, content_dir, async_commit) => res,
            _ = tokio::signal::ctrl_c() => {
                info!("Received ctrl-c, cancelling transfer...");
                Err(anyhow::Error::msg("interrupted"))
            }
        };
        if res.is_err() {
            let status = receiver.get_status(&transfer_id)?.status;
            if !status.is_terminal() {
                if let Err(e) = receiver.cancel(&transfer_id).await {
                    warn!(err = %e, "failed to cancel transfer");
                }
            }
        }

        self.print_outcome(receiver, &transfer_id)?;
        res
    }

    async fn receive_transfer(
        &self,
        receiver: &TransferReceiver,
        transfer_id: &TransferId,
        manifest: &Path,
        content_dir: &Path,
        async_commit: bool,
    ) -> Result<()> {
        let mut manifest_file = File::open(manifest)
            .await
            .with_context(|| format!("opening manifest {}", manifest.display()))?;
        receiver
            .save_snapshot(transfer_id, &mut manifest_file)
            .await?;

        let requisite = receiver.generate_requisite(transfer_id).await?;
        info!(missing = requisite.missing.len(), "generated requisite");
        self.stage_missing(receiver, &requisite, content_dir).await?;

        if async_commit {
            let handle = receiver.commit_async(transfer_id)?;
            self.poll_status(receiver, transfer_id).await?;
            handle.await??;
        } else {
            let spinner = self.multi_progress.add(ProgressBar::new_spinner());
            spinner.set_message("Committing");
            spinner.enable_steady_tick(Duration::from_millis(100));
            let res = receiver.commit(transfer_id).await;
            spinner.finish_and_clear();
            res?;
        }
        Ok(())
    }

    /// Stage each part the receiver is missing from `content_dir`.
    async fn stage_missing(
        &self,
        receiver: &TransferReceiver,
        requisite: &Requisite,
        content_dir: &Path,
    ) -> Result<()> {
        let stage_progress = self
            .multi_progress
            .add(ProgressBar::new(requisite.missing.len() as u64));
        stage_progress.set_style(ProgressStyle::with_template(
            "{prefix} {msg} {wide_bar} {pos}/{len}",
        )?);
        stage_progress.set_prefix("📦");
        stage_progress.set_message("Staging");

        for missing in requisite.missing.iter() {
            let path = content_dir.join(&missing.part_name);
            let mut file = File::open(&path).await.with_context(|| {
                format!(
                    "opening content {} for node {}",
                    path.display(),
                    missing.node_id
                )
            })?;
            receiver
                .save_content(&requisite.transfer_id, &missing.part_name, &mut file)
                .await?;
            stage_progress.inc(1);
        }
        stage_progress.finish_with_message("Staged");
        Ok(())
    }

    async fn poll_status(&self, receiver: &TransferReceiver, transfer_id: &TransferId) -> Result<()> {
        let status_progress = self.multi_progress.add(ProgressBar::new_spinner());
        status_progress.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
        status_progress.enable_steady_tick(Duration::from_millis(100));
        loop {
            let progress = receiver.get_status(transfer_id)?;
            status_progress.set_message(progress.status.to_string());
            if progress.status.is_terminal() {
                status_progress.finish_and_clear();
                return Ok(());
            }
            sleep(STATUS_POLL_INTERVAL).await;
        }
    }

    #[tracing::instrument(skip_all, err)]
    async fn requisite(&self, receiver: &TransferReceiver, manifest: &Path) -> Result<()> {
        let version = receiver.get_version();
        let transfer_id = receiver.start("ftr-cli", false, &version).await?;

        let res = async {
            let mut manifest_file = File::open(manifest)
                .await
                .with_context(|| format!("opening manifest {}", manifest.display()))?;
            receiver
                .save_snapshot(&transfer_id, &mut manifest_file)
                .await?;
            let requisite = receiver.generate_requisite(&transfer_id).await?;
            for missing in requisite.missing.iter() {
                println!(
                    "{}\t{}\t{}",
                    missing.node_id, missing.content_url, missing.part_name
                );
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        receiver.cancel(&transfer_id).await?;
        res
    }

    fn print_outcome(&self, receiver: &TransferReceiver, transfer_id: &TransferId) -> Result<()> {
        let progress = receiver.get_status(transfer_id)?;
        println!("transfer {}: {}", transfer_id, progress.status);
        if let Some(err) = &progress.error {
            println!("error: {}", err);
        }
        for entry in receiver.get_transfer_report(transfer_id)?.entries.iter() {
            println!("{}", entry);
        }
        Ok(())
    }
}
