//! The transfer receiver

use std::{
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use tokio::{io::AsyncRead, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    config::ReceiverConfig,
    content::{ContentLedger, ContentOracle},
    error::{Result, TransferError},
    lease::{ExpiryHandler, InMemoryLockProvider, Lease, LeaseConfig, LockProvider, TimeoutGuard},
    manifest::{
        pipeline, DefaultProcessorFactory, ProcessorContext, ProcessorFactory, Requisite,
        RequisiteSink,
    },
    policy::{AllowAll, RejectSelfTransfer, TransferPolicy},
    progress::{InMemoryProgressMonitor, ProgressMonitor, TransferProgress, TransferReport},
    registry::{ContentTable, SessionRegistry, StagedContent},
    staging::{Staged, StagingStore},
    transaction::{tx_work, RetryingTransactionRunner, TransactionRunner, TxResult},
    types::{TransferId, TransferStatus},
    version::{StaticVersionSource, TransferVersion, VersionSource},
    watchdog::TimeoutWatchdog,
};

/// Invoked after every commit, successful or not, once the session has been
/// cleaned up.
pub trait PostCommitHook: Send + Sync {
    fn on_commit(&self, transfer_id: &TransferId) -> anyhow::Result<()>;
}

impl<F> PostCommitHook for F
where
    F: Fn(&TransferId) -> anyhow::Result<()> + Send + Sync,
{
    fn on_commit(&self, transfer_id: &TransferId) -> anyhow::Result<()> {
        self(transfer_id)
    }
}

/// Services the receiver relies on.
#[derive(Clone)]
pub struct Collaborators {
    pub lock_provider: Arc<dyn LockProvider>,
    pub transactions: Arc<dyn TransactionRunner>,
    pub progress: Arc<dyn ProgressMonitor>,
    pub oracle: Arc<dyn ContentOracle>,
    pub versions: Arc<dyn VersionSource>,
    pub policy: Arc<dyn TransferPolicy>,
    pub processors: Arc<dyn ProcessorFactory>,
}

impl Collaborators {
    /// In-process collaborators committing into `target`, sharing one
    /// content ledger between the oracle and the commit processor.
    pub fn in_memory(config: &ReceiverConfig, target: impl Into<PathBuf>) -> Collaborators {
        Self::with_ledger(config, target, Arc::new(ContentLedger::new()))
    }

    /// Like [`Collaborators::in_memory`], with the content ledger kept in
    /// `ledger_path` so a later receiver over the same target only asks for
    /// content that changed since.
    pub fn persistent(
        config: &ReceiverConfig,
        target: impl Into<PathBuf>,
        ledger_path: impl Into<PathBuf>,
    ) -> io::Result<Collaborators> {
        let ledger = Arc::new(ContentLedger::open(ledger_path)?);
        Ok(Self::with_ledger(config, target, ledger))
    }

    fn with_ledger(
        config: &ReceiverConfig,
        target: impl Into<PathBuf>,
        ledger: Arc<ContentLedger>,
    ) -> Collaborators {
        let policy: Arc<dyn TransferPolicy> = match &config.repository_id {
            Some(repository_id) => Arc::new(RejectSelfTransfer::new(repository_id)),
            None => Arc::new(AllowAll),
        };
        Collaborators {
            lock_provider: Arc::new(InMemoryLockProvider::new()),
            transactions: Arc::new(RetryingTransactionRunner::new(
                config.transaction_max_attempts,
            )),
            progress: Arc::new(InMemoryProgressMonitor::new()),
            oracle: ledger.clone(),
            versions: Arc::new(StaticVersionSource::default()),
            policy,
            processors: Arc::new(DefaultProcessorFactory::new(target, ledger)),
        }
    }
}

struct Inner {
    config: ReceiverConfig,
    lease_config: LeaseConfig,
    staging: StagingStore,
    registry: Arc<SessionRegistry>,
    content: Arc<ContentTable>,
    watchdog: Arc<TimeoutWatchdog>,
    collab: Collaborators,
    hooks: Mutex<Vec<Arc<dyn PostCommitHook>>>,
}

/// Receiving end of the transfer protocol.
///
/// A transfer is started, has its manifest and content staged, and is then
/// committed or cancelled. Only one transfer is in progress at a time: the
/// session holds the receiver's domain lock from start until it ends. A
/// session whose client goes quiet for longer than the lock time-out is
/// cleaned up by the timeout watchdog.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct TransferReceiver {
    inner: Arc<Inner>,
}

impl TransferReceiver {
    pub fn new(config: ReceiverConfig, collab: Collaborators) -> TransferReceiver {
        let staging = StagingStore::new(&config.staging_root);
        let registry = Arc::new(SessionRegistry::new());
        let content = Arc::new(ContentTable::new());
        let watchdog = Arc::new(TimeoutWatchdog::new(
            registry.clone(),
            content.clone(),
            staging.clone(),
            collab.progress.clone(),
            collab.transactions.clone(),
        ));
        TransferReceiver {
            inner: Arc::new(Inner {
                lease_config: LeaseConfig::from(&config),
                config,
                staging,
                registry,
                content,
                watchdog,
                collab,
                hooks: Mutex::new(vec![]),
            }),
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.inner.config
    }

    pub fn staging(&self) -> &StagingStore {
        &self.inner.staging
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn content(&self) -> &ContentTable {
        &self.inner.content
    }

    pub fn watchdog(&self) -> &TimeoutWatchdog {
        &self.inner.watchdog
    }

    pub fn add_post_commit_hook(&self, hook: Arc<dyn PostCommitHook>) {
        self.inner
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    pub fn get_version(&self) -> TransferVersion {
        let version = self.inner.collab.versions.version();
        debug!(%version, "reporting version");
        version
    }

    /// Begin an inbound transfer from `source_id`.
    ///
    /// Takes the receiver's domain lock, so a second transfer cannot start
    /// until this one ends.
    #[tracing::instrument(skip_all, fields(%source_id), err)]
    pub async fn start(
        &self,
        source_id: &str,
        allow_self_transfer: bool,
        source_version: &TransferVersion,
    ) -> Result<TransferId> {
        let collab = &self.inner.collab;
        collab
            .policy
            .check_transfer(source_id, allow_self_transfer)?;

        let receiver_version = collab.versions.version();
        if !source_version.is_compatible_with(&receiver_version) {
            return Err(TransferError::IncompatibleVersion {
                source_version: source_version.to_string(),
                receiver_version: receiver_version.to_string(),
            });
        }

        let expiry: Arc<dyn ExpiryHandler> = self.inner.watchdog.clone();
        let lease = Lease::new(
            &self.inner.config.lock_name,
            self.inner.lease_config.clone(),
            collab.lock_provider.clone(),
            Arc::downgrade(&expiry),
        );
        lease.acquire().await?;

        let transfer_id = TransferId::new();
        lease.bind(transfer_id);
        if let Err(e) = self.inner.staging.allocate(&transfer_id).await {
            debug!(err = %e, "releasing lock, transfer id never issued");
            if let Err(release_err) = lease.release() {
                warn!(err = %release_err, "failed to release lock");
            }
            return Err(TransferError::TransferStartFailed {
                reason: e.to_string(),
            });
        }

        self.inner.registry.insert(transfer_id, lease.clone());
        info!(%transfer_id, "transfer started");
        lease.enable_timeout();
        collab.progress.log_comment(&transfer_id, "Started transfer");
        collab
            .progress
            .update_status(&transfer_id, TransferStatus::PreCommit);
        Ok(transfer_id)
    }

    /// Guard for session-scoped work: fails unless the session exists and
    /// its lease is alive, and suspends the lease timeout.
    ///
    /// The caller must call [`Lease::enable_timeout`] when done, or hold the
    /// lease in a [`TimeoutGuard`].
    pub fn check_lock(&self, transfer_id: &TransferId) -> Result<Arc<Lease>> {
        self.inner.registry.check_lock(transfer_id)
    }

    fn guard(&self, transfer_id: &TransferId) -> Result<TimeoutGuard> {
        Ok(TimeoutGuard::new(self.check_lock(transfer_id)?))
    }

    /// Stage the transfer manifest. A manifest that was already staged is
    /// kept as is.
    #[tracing::instrument(skip_all, fields(%transfer_id), err)]
    pub async fn save_snapshot<R>(&self, transfer_id: &TransferId, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let _guard = self.guard(transfer_id)?;
        debug!("saving snapshot");
        match self
            .inner
            .staging
            .stage_snapshot(transfer_id, reader)
            .await
        {
            Ok(Staged::Created(size)) => {
                self.inner.collab.progress.log_comment(
                    transfer_id,
                    &format!("Received manifest file. Size = {}", size),
                );
                Ok(())
            }
            Ok(Staged::AlreadyExists) => Ok(()),
            Err(e) => Err(TransferError::SnapshotStagingFailed {
                transfer_id: *transfer_id,
                reason: e.to_string(),
            }),
        }
    }

    /// Stage one content file under `content_id`. Content that was already
    /// staged under that id is kept as is.
    #[tracing::instrument(skip_all, fields(%transfer_id, %content_id), err)]
    pub async fn save_content<R>(
        &self,
        transfer_id: &TransferId,
        content_id: &str,
        reader: &mut R,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let _guard = self.guard(transfer_id)?;
        let (path, staged) = self
            .inner
            .staging
            .stage_content(transfer_id, content_id, reader)
            .await
            .map_err(|e| TransferError::ContentStagingFailed {
                transfer_id: *transfer_id,
                content_id: content_id.to_owned(),
                reason: e.to_string(),
            })?;
        if let Staged::Created(size) = staged {
            self.inner.content.insert(
                content_id,
                StagedContent {
                    transfer_id: *transfer_id,
                    path,
                },
            );
            self.inner.collab.progress.log_comment(
                transfer_id,
                &format!("Received content file: {}; Size = {}", content_id, size),
            );
        }
        Ok(())
    }

    fn processor_context(&self, transfer_id: &TransferId) -> ProcessorContext {
        ProcessorContext {
            transfer_id: *transfer_id,
            staging_dir: self.inner.staging.dir(transfer_id),
            oracle: self.inner.collab.oracle.clone(),
            content: self.inner.content.clone(),
        }
    }

    /// List the content the receiver still needs to commit the staged
    /// manifest. Without a staged manifest nothing is needed yet.
    #[tracing::instrument(skip_all, fields(%transfer_id), err)]
    pub async fn generate_requisite(&self, transfer_id: &TransferId) -> Result<Requisite> {
        let _guard = self.guard(transfer_id)?;
        let mut requisite = Requisite {
            transfer_id: *transfer_id,
            missing: vec![],
        };
        if !self.inner.staging.has_snapshot(transfer_id).await {
            debug!("no snapshot, empty requisite");
            return Ok(requisite);
        }

        let ctx = self.processor_context(transfer_id);
        let factory = self.inner.collab.processors.clone();
        let path = self.inner.staging.snapshot_path(transfer_id);
        let sink = RequisiteSink::default();
        let pass_sink = sink.clone();
        let res = tokio::task::spawn_blocking(move || {
            let mut parser = factory.parser();
            let mut processor = factory.requisite_processor(&ctx, pass_sink);
            pipeline::replay_one(&path, parser.as_mut(), processor.as_mut())
        })
        .await;
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(TransferError::from_anyhow(
                    &e,
                    TransferError::requisite_failed(*transfer_id),
                ))
            }
            Err(e) => {
                return Err(TransferError::RequisiteGenerationFailed {
                    transfer_id: *transfer_id,
                    reason: e.to_string(),
                })
            }
        }
        requisite.missing = std::mem::take(&mut *sink.lock().unwrap_or_else(PoisonError::into_inner));
        debug!(missing = requisite.missing.len(), "requisite generated");
        Ok(requisite)
    }

    /// Commit the transfer: replay the staged manifest through every commit
    /// processor, then end the session and run the post-commit hooks.
    ///
    /// The session ends however the commit turns out; processor failures
    /// are recorded on the transfer's progress and returned.
    #[tracing::instrument(skip_all, fields(%transfer_id), err)]
    pub async fn commit(&self, transfer_id: &TransferId) -> Result<()> {
        debug!("committing");
        let _guard = self.guard(transfer_id)?;
        let res = self.replay_commit(transfer_id).await;
        self.finish(transfer_id).await;
        res
    }

    async fn replay_commit(&self, transfer_id: &TransferId) -> Result<()> {
        let progress = &self.inner.collab.progress;
        if progress.get_progress(transfer_id).map(|p| p.status) == Some(TransferStatus::Cancelled) {
            info!("transfer cancelled before commit");
            return Ok(());
        }
        progress.update_status(transfer_id, TransferStatus::Committing);

        if self.inner.staging.has_snapshot(transfer_id).await {
            let ctx = self.processor_context(transfer_id);
            let factory = self.inner.collab.processors.clone();
            let path = self.inner.staging.snapshot_path(transfer_id);
            debug!(manifest = %path.display(), "processing manifest");
            let res = tokio::task::spawn_blocking(move || {
                let mut parser = factory.parser();
                let mut processors = factory.commit_processors(&ctx);
                pipeline::replay(&path, parser.as_mut(), &mut processors)
            })
            .await;
            let err = match res {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(TransferError::from_anyhow(
                    &e,
                    TransferError::commit_failed(*transfer_id),
                )),
                Err(e) => Some(TransferError::CommitFailed {
                    transfer_id: *transfer_id,
                    reason: e.to_string(),
                }),
            };
            if let Some(err) = err {
                progress.log_exception(
                    transfer_id,
                    "Caught exception while committing the transfer",
                    &err,
                );
            }
        } else {
            progress.log_exception(
                transfer_id,
                "Unable to start commit. No snapshot file received",
                &TransferError::NoSnapshotReceived {
                    transfer_id: *transfer_id,
                },
            );
        }

        if let Some(err) = progress.get_progress(transfer_id).and_then(|p| p.error) {
            progress.update_status(transfer_id, TransferStatus::Error);
            return Err(err);
        }
        progress.update_status(transfer_id, TransferStatus::Complete);
        debug!("commit success");
        Ok(())
    }

    /// End the session, then run the post-commit hooks. Neither may mask
    /// the commit's own outcome.
    async fn finish(&self, transfer_id: &TransferId) {
        if let Err(e) = self.end(transfer_id).await {
            error!(%transfer_id, err = %e, "failed to clean up transfer, lock may still be in place");
        }

        let hooks = self
            .inner
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            let id = *transfer_id;
            match tokio::task::spawn_blocking(move || hook.on_commit(&id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(%transfer_id, err = %format!("{:#}", e), "post-commit hook failed"),
                Err(e) => error!(%transfer_id, err = %e, "post-commit hook panicked"),
            }
        }
    }

    /// Request a commit and return without waiting for it.
    ///
    /// The lease timeout is re-enabled before the commit task is spawned.
    /// The returned handle resolves to the commit's outcome.
    #[tracing::instrument(skip_all, fields(%transfer_id), err)]
    pub fn commit_async(&self, transfer_id: &TransferId) -> Result<JoinHandle<Result<()>>> {
        {
            let _guard = self.guard(transfer_id)?;
            self.inner
                .collab
                .progress
                .update_status(transfer_id, TransferStatus::CommitRequested);
        }
        let receiver = self.clone();
        let transfer_id = *transfer_id;
        Ok(tokio::spawn(async move {
            receiver.supervise_commit(transfer_id).await
        }))
    }

    /// Run the commit in its own task. If that task dies before reaching
    /// its cleanup, record the failure and end the session here so it is
    /// not left behind.
    async fn supervise_commit(&self, transfer_id: TransferId) -> Result<()> {
        let receiver = self.clone();
        match tokio::spawn(async move { receiver.commit(&transfer_id).await }).await {
            Ok(res) => res,
            Err(e) => {
                error!(%transfer_id, err = %e, "commit task failed, cleaning up");
                let err = TransferError::CommitFailed {
                    transfer_id,
                    reason: e.to_string(),
                };
                let progress = &self.inner.collab.progress;
                progress.log_exception(&transfer_id, "Commit task failed", &err);
                progress.update_status(&transfer_id, TransferStatus::Error);
                if let Err(end_err) = self.end(&transfer_id).await {
                    error!(%transfer_id, err = %end_err, "failed to clean up transfer");
                }
                Err(err)
            }
        }
    }

    /// Cancel the transfer. A transfer that has not started committing is
    /// ended right away; otherwise the in-flight commit ends it.
    #[tracing::instrument(skip_all, fields(%transfer_id), err)]
    pub async fn cancel(&self, transfer_id: &TransferId) -> Result<()> {
        let progress = &self.inner.collab.progress;
        let previous = progress
            .get_progress(transfer_id)
            .ok_or(TransferError::UnknownTransfer {
                transfer_id: *transfer_id,
            })?
            .status;
        progress.update_status(transfer_id, TransferStatus::Cancelled);
        info!(%previous, "transfer cancelled");
        if previous == TransferStatus::PreCommit {
            self.end(transfer_id).await?;
        }
        Ok(())
    }

    /// Release the session's lease and remove its staged files. Ending a
    /// session that is already gone does nothing.
    #[tracing::instrument(skip_all, fields(%transfer_id), err)]
    pub async fn end(&self, transfer_id: &TransferId) -> Result<()> {
        debug!("request to end transfer");
        if let Some(lease) = self.inner.registry.remove(transfer_id) {
            debug!(token = ?lease.token(), "releasing lock");
            lease
                .release()
                .map_err(|e| TransferError::EndTransferFailed {
                    transfer_id: *transfer_id,
                    reason: e.to_string(),
                })?;
        }
        self.inner.content.remove_transfer(transfer_id);
        if let Err(e) = self.inner.staging.purge(transfer_id).await {
            warn!(err = %e, dir = %self.inner.staging.dir(transfer_id).display(), "failed to delete staging folder");
        }
        Ok(())
    }

    pub fn get_status(&self, transfer_id: &TransferId) -> Result<TransferProgress> {
        self.inner
            .collab
            .progress
            .get_progress(transfer_id)
            .ok_or(TransferError::UnknownTransfer {
                transfer_id: *transfer_id,
            })
    }

    pub fn get_transfer_report(&self, transfer_id: &TransferId) -> Result<TransferReport> {
        self.inner
            .collab
            .progress
            .get_report(transfer_id)
            .ok_or(TransferError::UnknownTransfer {
                transfer_id: *transfer_id,
            })
    }

    /// Whether content at `content_url` for `node_id` must be transferred,
    /// evaluated in a read-only transaction.
    pub async fn is_content_new_or_modified(&self, node_id: &str, content_url: &str) -> Result<bool> {
        let answer = Arc::new(AtomicBool::new(true));
        let oracle = self.inner.collab.oracle.clone();
        let (node_id, content_url) = (node_id.to_owned(), content_url.to_owned());
        let result = answer.clone();
        let work = tx_work(move || {
            let is_new = oracle.is_new_or_modified(&node_id, &content_url);
            debug!(%node_id, %content_url, is_new, "checked content");
            result.store(is_new, Ordering::SeqCst);
            std::future::ready(TxResult::Ok(()))
        });
        self.inner
            .collab
            .transactions
            .run_in_transaction(work, true, false)
            .await?;
        Ok(answer.load(Ordering::SeqCst))
    }
}
