//! End-to-end scenarios against the transfer receiver

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tempfile::TempDir;

use super::{Gate, StubBehavior, StubLockProvider, StubProcessorFactory};
use crate::{
    content::ContentLedger,
    manifest::{DefaultProcessorFactory, ProcessorFactory},
    policy::{AllowAll, RejectSelfTransfer, TransferPolicy},
    progress::{InMemoryProgressMonitor, ProgressMonitor, ReportEntryKind},
    transaction::RetryingTransactionRunner,
    version::{StaticVersionSource, TransferVersion},
    Collaborators, InMemoryLockProvider, LockProvider, ReceiverConfig, TransferError, TransferId,
    TransferReceiver, TransferStatus,
};

const MANIFEST: &str = "header 1 nosync\nnode n1 docs/a.txt store://2024/contentA\n";

struct Harness {
    dir: TempDir,
    receiver: TransferReceiver,
    progress: Arc<InMemoryProgressMonitor>,
    ledger: Arc<ContentLedger>,
}

struct Builder {
    config: ReceiverConfig,
    dir: TempDir,
    lock_provider: Arc<dyn LockProvider>,
    processors: Option<Arc<dyn ProcessorFactory>>,
    policy: Arc<dyn TransferPolicy>,
}

impl Builder {
    fn new() -> Builder {
        let dir = TempDir::new().unwrap();
        let config = ReceiverConfig {
            lock_refresh_time: Duration::from_secs(10),
            lock_retry_wait: Duration::from_millis(10),
            lock_timeout: Duration::from_secs(30),
            ..ReceiverConfig::new(dir.path().join("staging"))
        };
        Builder {
            config,
            dir,
            lock_provider: Arc::new(InMemoryLockProvider::new()),
            processors: None,
            policy: Arc::new(AllowAll),
        }
    }

    fn lock_provider(mut self, lock_provider: Arc<dyn LockProvider>) -> Builder {
        self.lock_provider = lock_provider;
        self
    }

    fn processors(mut self, processors: Arc<dyn ProcessorFactory>) -> Builder {
        self.processors = Some(processors);
        self
    }

    fn policy(mut self, policy: Arc<dyn TransferPolicy>) -> Builder {
        self.policy = policy;
        self
    }

    fn staging_root(mut self, staging_root: PathBuf) -> Builder {
        self.config.staging_root = staging_root;
        self
    }

    fn build(self) -> Harness {
        let progress = Arc::new(InMemoryProgressMonitor::new());
        let ledger = Arc::new(ContentLedger::new());
        let target = self.dir.path().join("target");
        let processors = self
            .processors
            .unwrap_or_else(|| Arc::new(DefaultProcessorFactory::new(target, ledger.clone())));
        let collab = Collaborators {
            lock_provider: self.lock_provider,
            transactions: Arc::new(RetryingTransactionRunner::default()),
            progress: progress.clone(),
            oracle: ledger.clone(),
            versions: Arc::new(StaticVersionSource(TransferVersion::new(
                1,
                0,
                0,
                "Community",
            ))),
            policy: self.policy,
            processors,
        };
        Harness {
            receiver: TransferReceiver::new(self.config, collab),
            dir: self.dir,
            progress,
            ledger,
        }
    }
}

impl Harness {
    fn target(&self) -> PathBuf {
        self.dir.path().join("target")
    }

    async fn start(&self) -> TransferId {
        self.receiver
            .start("repoA", false, &TransferVersion::major_only(1))
            .await
            .expect("start")
    }

    fn status(&self, transfer_id: &TransferId) -> TransferStatus {
        self.receiver.get_status(transfer_id).expect("status").status
    }

    fn assert_ended(&self, transfer_id: &TransferId) {
        assert_eq!(
            self.receiver.check_lock(transfer_id).unwrap_err(),
            TransferError::LockNotFound {
                transfer_id: *transfer_id
            }
        );
        assert!(!self.receiver.staging().dir(transfer_id).exists());
    }
}

#[tokio::test]
async fn test_end_to_end_commit() {
    let provider = InMemoryLockProvider::new();
    let h = Builder::new()
        .lock_provider(Arc::new(provider.clone()))
        .build();

    let id = h.start().await;
    assert_eq!(h.status(&id), TransferStatus::PreCommit);
    assert!(provider.is_held(&h.receiver.config().lock_name));

    h.receiver
        .save_snapshot(&id, &mut MANIFEST.as_bytes())
        .await
        .expect("save snapshot");
    h.receiver
        .save_content(&id, "contentA", &mut &b"hello"[..])
        .await
        .expect("save content");
    h.receiver.commit(&id).await.expect("commit");

    assert_eq!(h.status(&id), TransferStatus::Complete);
    h.assert_ended(&id);
    assert!(!provider.is_held(&h.receiver.config().lock_name));
    assert!(h.receiver.registry().is_empty());
    assert!(h.receiver.content().is_empty());
    assert_eq!(
        std::fs::read(h.target().join("docs/a.txt")).unwrap(),
        b"hello"
    );

    // Committed content is no longer needed from the sender
    assert!(!h
        .receiver
        .is_content_new_or_modified("n1", "store://2024/contentA")
        .await
        .unwrap());
    assert!(h
        .receiver
        .is_content_new_or_modified("n1", "store://2024/contentB")
        .await
        .unwrap());

    let report = h.receiver.get_transfer_report(&id).expect("report");
    let comments: Vec<&str> = report
        .entries
        .iter()
        .filter(|entry| entry.kind == ReportEntryKind::Comment)
        .map(|entry| entry.message.as_str())
        .collect();
    assert_eq!(
        comments,
        vec![
            "Started transfer",
            "Received manifest file. Size = 57",
            "Received content file: contentA; Size = 5",
        ]
    );
}

#[tokio::test]
async fn test_commit_with_succeeding_processor() {
    let factory = StubProcessorFactory::new(vec![StubBehavior::Succeed, StubBehavior::Succeed]);
    let h = Builder::new().processors(Arc::new(factory.clone())).build();

    let id = h.start().await;
    h.receiver
        .save_snapshot(&id, &mut MANIFEST.as_bytes())
        .await
        .unwrap();
    h.receiver.commit(&id).await.expect("commit");

    assert_eq!(h.status(&id), TransferStatus::Complete);
    h.assert_ended(&id);
    assert_eq!(
        factory.events(),
        vec![
            "commit1:start",
            "commit1:n1",
            "commit1:end",
            "commit2:start",
            "commit2:n1",
            "commit2:end",
        ]
    );
}

#[tokio::test]
async fn test_incompatible_version() {
    let h = Builder::new().build();

    for version in [TransferVersion::major_only(2), TransferVersion::default()] {
        let err = h
            .receiver
            .start("repoA", false, &version)
            .await
            .unwrap_err();
        assert!(
            matches!(err, TransferError::IncompatibleVersion { .. }),
            "{err:?}"
        );
    }
    assert!(h.receiver.registry().is_empty());

    // The lock was never taken
    h.start().await;
}

#[tokio::test]
async fn test_second_start_lock_unavailable() {
    let h = Builder::new().build();

    let first = h.start().await;
    let err = h
        .receiver
        .start("repoB", false, &TransferVersion::major_only(1))
        .await
        .unwrap_err();
    assert_eq!(err, TransferError::LockUnavailable);
    assert_eq!(h.receiver.registry().len(), 1);

    h.receiver.end(&first).await.expect("end");
    h.start().await;
}

#[tokio::test]
async fn test_concurrent_starts() {
    let h = Builder::new().build();
    let version = TransferVersion::major_only(1);

    let (a, b) = tokio::join!(
        h.receiver.start("repoA", false, &version),
        h.receiver.start("repoB", false, &version),
    );

    let errors: Vec<TransferError> = [&a, &b]
        .into_iter()
        .filter_map(|res| res.as_ref().err().cloned())
        .collect();
    assert_eq!(errors, vec![TransferError::LockUnavailable]);
    assert_eq!(h.receiver.registry().len(), 1);
}

#[tokio::test]
async fn test_transfer_to_self() {
    let h = Builder::new()
        .policy(Arc::new(RejectSelfTransfer::new("repo-local")))
        .build();
    let version = TransferVersion::major_only(1);

    assert_eq!(
        h.receiver
            .start("repo-local", false, &version)
            .await
            .unwrap_err(),
        TransferError::TransferToSelf {
            source_id: "repo-local".to_owned()
        }
    );
    h.receiver
        .start("repo-local", true, &version)
        .await
        .expect("self transfer allowed");
}

#[tokio::test]
async fn test_start_failure_releases_lock() {
    let provider = InMemoryLockProvider::new();
    let dir = TempDir::new().unwrap();
    let not_a_dir = dir.path().join("file");
    std::fs::write(&not_a_dir, b"").unwrap();
    let h = Builder::new()
        .lock_provider(Arc::new(provider.clone()))
        .staging_root(not_a_dir)
        .build();

    let err = h
        .receiver
        .start("repoA", false, &TransferVersion::major_only(1))
        .await
        .unwrap_err();

    assert!(
        matches!(err, TransferError::TransferStartFailed { .. }),
        "{err:?}"
    );
    assert!(h.receiver.registry().is_empty());
    assert!(!provider.is_held(&h.receiver.config().lock_name));
}

#[tokio::test]
async fn test_check_lock_until_end() {
    let h = Builder::new().build();
    let id = h.start().await;

    for _ in 0..3 {
        let lease = h.receiver.check_lock(&id).expect("check lock");
        assert!(lease.is_processing());
        lease.enable_timeout();
    }

    h.receiver.end(&id).await.expect("end");
    h.assert_ended(&id);
    h.receiver.end(&id).await.expect("end again");
}

#[tokio::test]
async fn test_staging_reenables_timeout() {
    let h = Builder::new().build();
    let id = h.start().await;

    h.receiver
        .save_content(&id, "contentA", &mut &b"hello"[..])
        .await
        .unwrap();
    h.receiver
        .save_content(&id, "../escape", &mut &b"hello"[..])
        .await
        .unwrap_err();

    let lease = h.receiver.registry().get(&id).expect("lease");
    assert!(!lease.is_processing());
}

#[tokio::test]
async fn test_save_content_is_idempotent() {
    let h = Builder::new().build();
    let id = h.start().await;

    h.receiver
        .save_content(&id, "contentA", &mut &b"first"[..])
        .await
        .unwrap();
    h.receiver
        .save_content(&id, "contentA", &mut &b"second"[..])
        .await
        .unwrap();
    h.receiver
        .save_snapshot(&id, &mut MANIFEST.as_bytes())
        .await
        .unwrap();
    h.receiver
        .save_snapshot(&id, &mut &b"node n9 other -\n"[..])
        .await
        .unwrap();

    let staging = h.receiver.staging();
    assert_eq!(
        std::fs::read(staging.content_path(&id, "contentA").unwrap()).unwrap(),
        b"first"
    );
    assert_eq!(
        std::fs::read_to_string(staging.snapshot_path(&id)).unwrap(),
        MANIFEST
    );
    assert!(h.receiver.content().is_staged(&id, "contentA"));
}

#[tokio::test]
async fn test_invalid_content_id() {
    let h = Builder::new().build();
    let id = h.start().await;

    let err = h
        .receiver
        .save_content(&id, "../escape", &mut &b"hello"[..])
        .await
        .unwrap_err();

    assert!(
        matches!(&err, TransferError::ContentStagingFailed { content_id, .. } if content_id == "../escape"),
        "{err:?}"
    );
    assert!(!h.dir.path().join("escape").exists());
}

#[tokio::test]
async fn test_manifest_cannot_name_snapshot_as_content() {
    let h = Builder::new().build();
    let id = h.start().await;
    let manifest = "node n1 docs/a.txt store://x/snapshot.xml\n";
    h.receiver
        .save_snapshot(&id, &mut manifest.as_bytes())
        .await
        .unwrap();

    let err = h.receiver.generate_requisite(&id).await.unwrap_err();
    assert!(
        matches!(&err, TransferError::RequisiteGenerationFailed { reason, .. } if reason.contains("invalid content id")),
        "{err:?}"
    );
    assert!(h
        .receiver
        .save_content(&id, "snapshot.xml", &mut &b"hello"[..])
        .await
        .is_err());

    let err = h.receiver.commit(&id).await.unwrap_err();

    assert!(
        matches!(&err, TransferError::CommitFailed { reason, .. } if reason.contains("invalid content id")),
        "{err:?}"
    );
    assert_eq!(h.status(&id), TransferStatus::Error);
    assert!(!h.target().join("docs/a.txt").exists());
    h.assert_ended(&id);
}

#[tokio::test]
async fn test_committed_content_remembered_across_receivers() {
    let dir = TempDir::new().unwrap();
    let ledger_path = dir.path().join("state").join("ledger.json");
    let target = dir.path().join("target");
    let new_receiver = || {
        let config = ReceiverConfig::new(dir.path().join("staging"));
        let collab = Collaborators::persistent(&config, &target, &ledger_path).expect("collaborators");
        TransferReceiver::new(config, collab)
    };

    let first = new_receiver();
    let id = first
        .start("repoA", false, &first.get_version())
        .await
        .unwrap();
    first
        .save_snapshot(&id, &mut MANIFEST.as_bytes())
        .await
        .unwrap();
    let requisite = first.generate_requisite(&id).await.unwrap();
    assert_eq!(requisite.missing.len(), 1);
    first
        .save_content(&id, "contentA", &mut &b"hello"[..])
        .await
        .unwrap();
    first.commit(&id).await.expect("first commit");
    drop(first);

    let second = new_receiver();
    let id = second
        .start("repoA", false, &second.get_version())
        .await
        .unwrap();
    second
        .save_snapshot(&id, &mut MANIFEST.as_bytes())
        .await
        .unwrap();
    let requisite = second.generate_requisite(&id).await.unwrap();
    assert!(requisite.missing.is_empty(), "{:?}", requisite.missing);
    second.commit(&id).await.expect("second commit");
    assert_eq!(
        second.get_status(&id).unwrap().status,
        TransferStatus::Complete
    );
    assert_eq!(std::fs::read(target.join("docs/a.txt")).unwrap(), b"hello");
}

#[tokio::test]
async fn test_commit_without_snapshot() {
    let provider = StubLockProvider::new();
    let h = Builder::new()
        .lock_provider(Arc::new(provider.clone()))
        .build();
    let id = h.start().await;

    let err = h.receiver.commit(&id).await.unwrap_err();

    assert_eq!(err, TransferError::NoSnapshotReceived { transfer_id: id });
    let progress = h.receiver.get_status(&id).unwrap();
    assert_eq!(progress.status, TransferStatus::Error);
    assert_eq!(
        progress.error,
        Some(TransferError::NoSnapshotReceived { transfer_id: id })
    );
    h.assert_ended(&id);
    assert_eq!(provider.release_count(), 1);
}

#[tokio::test]
async fn test_failing_processor() {
    let factory = StubProcessorFactory::new(vec![
        StubBehavior::Fail("disk full"),
        StubBehavior::Succeed,
    ]);
    let h = Builder::new().processors(Arc::new(factory.clone())).build();
    let id = h.start().await;
    h.receiver
        .save_snapshot(&id, &mut MANIFEST.as_bytes())
        .await
        .unwrap();

    let err = h.receiver.commit(&id).await.unwrap_err();

    match &err {
        TransferError::CommitFailed {
            transfer_id,
            reason,
        } => {
            assert_eq!(*transfer_id, id);
            assert!(reason.contains("disk full"), "{reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.status(&id), TransferStatus::Error);
    assert_eq!(h.receiver.get_status(&id).unwrap().error, Some(err));
    assert_eq!(factory.events(), vec!["commit1:start"]);
    h.assert_ended(&id);
}

#[tokio::test]
async fn test_panicking_processor() {
    let factory = StubProcessorFactory::new(vec![StubBehavior::Panic]);
    let h = Builder::new().processors(Arc::new(factory)).build();
    let id = h.start().await;
    h.receiver
        .save_snapshot(&id, &mut MANIFEST.as_bytes())
        .await
        .unwrap();

    let err = h.receiver.commit(&id).await.unwrap_err();

    assert!(matches!(err, TransferError::CommitFailed { .. }), "{err:?}");
    assert_eq!(h.status(&id), TransferStatus::Error);
    h.assert_ended(&id);
}

#[tokio::test]
async fn test_post_commit_hooks_isolated() {
    let h = Builder::new()
        .processors(Arc::new(StubProcessorFactory::new(vec![StubBehavior::Succeed])))
        .build();
    let calls = Arc::new(AtomicUsize::new(0));
    let receiver = h.receiver.clone();
    let hook_calls = calls.clone();

    h.receiver
        .add_post_commit_hook(Arc::new(|_: &TransferId| -> anyhow::Result<()> {
            anyhow::bail!("hook failed")
        }));
    h.receiver.add_post_commit_hook(Arc::new(|_: &TransferId| -> anyhow::Result<()> {
        panic!("hook panicked")
    }));
    h.receiver
        .add_post_commit_hook(Arc::new(move |id: &TransferId| -> anyhow::Result<()> {
            // Hooks run after the session has ended
            assert!(receiver.registry().get(id).is_none());
            hook_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

    let id = h.start().await;
    h.receiver
        .save_snapshot(&id, &mut MANIFEST.as_bytes())
        .await
        .unwrap();
    h.receiver.commit(&id).await.expect("commit");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.status(&id), TransferStatus::Complete);

    // Hooks also run after a failed commit
    let id = h.start().await;
    h.receiver.commit(&id).await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_commit_async() {
    let h = Builder::new()
        .processors(Arc::new(StubProcessorFactory::new(vec![StubBehavior::Succeed])))
        .build();
    let id = h.start().await;
    h.receiver
        .save_snapshot(&id, &mut MANIFEST.as_bytes())
        .await
        .unwrap();

    let handle = h.receiver.commit_async(&id).expect("commit async");
    handle.await.expect("join").expect("commit");

    assert_eq!(h.status(&id), TransferStatus::Complete);
    h.assert_ended(&id);
}

#[tokio::test]
async fn test_commit_async_reenables_timeout() {
    let h = Builder::new()
        .processors(Arc::new(StubProcessorFactory::new(vec![StubBehavior::Succeed])))
        .build();
    let id = h.start().await;
    h.receiver
        .save_snapshot(&id, &mut MANIFEST.as_bytes())
        .await
        .unwrap();
    let lease = h.receiver.registry().get(&id).expect("lease");

    let handle = h.receiver.commit_async(&id).expect("commit async");

    // The commit task has not run yet on this single-threaded runtime
    assert_eq!(h.status(&id), TransferStatus::CommitRequested);
    assert!(!lease.is_processing());

    handle.await.expect("join").expect("commit");
    assert_eq!(h.status(&id), TransferStatus::Complete);
}

#[tokio::test]
async fn test_cancel_pre_commit() {
    let h = Builder::new().build();
    let id = h.start().await;
    h.receiver
        .save_content(&id, "contentA", &mut &b"hello"[..])
        .await
        .unwrap();
    assert!(h.receiver.staging().dir(&id).exists());

    h.receiver.cancel(&id).await.expect("cancel");

    assert_eq!(h.status(&id), TransferStatus::Cancelled);
    h.assert_ended(&id);
    assert!(h.receiver.content().is_empty());

    // The next transfer can start right away
    h.start().await;
}

#[tokio::test]
async fn test_cancel_while_committing() {
    let (gate, entered, proceed) = Gate::new();
    let factory = StubProcessorFactory::new(vec![StubBehavior::Block(gate)]);
    let h = Builder::new().processors(Arc::new(factory)).build();
    let id = h.start().await;
    h.receiver
        .save_snapshot(&id, &mut MANIFEST.as_bytes())
        .await
        .unwrap();

    let handle = h.receiver.commit_async(&id).expect("commit async");
    entered.await.expect("commit reached processor");
    assert_eq!(h.status(&id), TransferStatus::Committing);

    h.receiver.cancel(&id).await.expect("cancel");
    assert_eq!(h.status(&id), TransferStatus::Cancelled);
    // The in-flight commit owns cleanup
    assert!(h.receiver.staging().dir(&id).exists());
    assert!(h.receiver.registry().contains(&id));

    proceed.send(()).unwrap();
    handle.await.expect("join").expect("commit");

    assert_eq!(h.status(&id), TransferStatus::Cancelled);
    h.assert_ended(&id);
}

#[tokio::test]
async fn test_timeout_while_committing_is_noop() {
    let (gate, entered, proceed) = Gate::new();
    let factory = StubProcessorFactory::new(vec![StubBehavior::Block(gate)]);
    let h = Builder::new().processors(Arc::new(factory)).build();
    let id = h.start().await;
    h.receiver
        .save_snapshot(&id, &mut MANIFEST.as_bytes())
        .await
        .unwrap();

    let handle = h.receiver.commit_async(&id).expect("commit async");
    entered.await.expect("commit reached processor");

    h.receiver.watchdog().timeout(id).await.expect("timeout");
    assert_eq!(h.status(&id), TransferStatus::Committing);
    assert!(h.receiver.registry().contains(&id));
    assert!(h.receiver.staging().dir(&id).exists());

    proceed.send(()).unwrap();
    handle.await.expect("join").expect("commit");
    assert_eq!(h.status(&id), TransferStatus::Complete);
}

#[tokio::test(start_paused = true)]
async fn test_idle_transfer_times_out() {
    let h = Builder::new().build();
    let id = h.start().await;
    h.receiver
        .save_content(&id, "contentA", &mut &b"hello"[..])
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    for _ in 0..50 {
        if h.status(&id) == TransferStatus::Error {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let progress = h.receiver.get_status(&id).unwrap();
    assert_eq!(progress.status, TransferStatus::Error);
    assert_eq!(
        progress.error,
        Some(TransferError::LockTimedOut { transfer_id: id })
    );
    h.assert_ended(&id);
    assert!(h.receiver.content().is_empty());

    // The domain lock is free again
    h.start().await;
}

#[tokio::test(start_paused = true)]
async fn test_busy_transfer_does_not_time_out() {
    let h = Builder::new().build();
    let id = h.start().await;

    let lease = h.receiver.check_lock(&id).expect("check lock");
    tokio::time::sleep(Duration::from_secs(300)).await;
    lease.enable_timeout();

    assert_eq!(h.status(&id), TransferStatus::PreCommit);
    h.receiver.check_lock(&id).expect("still alive").enable_timeout();
}

#[tokio::test]
async fn test_generate_requisite() {
    let h = Builder::new().build();
    h.ledger.record("n1", "store://2024/unchanged");
    let id = h.start().await;

    let requisite = h.receiver.generate_requisite(&id).await.expect("requisite");
    assert!(requisite.missing.is_empty());

    h.receiver
        .save_snapshot(
            &id,
            &mut "node n1 docs/a.txt store://2024/unchanged\n\
                  node n2 docs/b.txt store://2024/changed\n\
                  node n3 docs/c.txt store://2024/staged\n\
                  node n4 docs -\n\
                  deleted n5 docs/old.txt\n"
                .as_bytes(),
        )
        .await
        .unwrap();
    h.receiver
        .save_content(&id, "staged", &mut &b"hello"[..])
        .await
        .unwrap();

    let requisite = h.receiver.generate_requisite(&id).await.expect("requisite");

    assert_eq!(requisite.transfer_id, id);
    let parts: Vec<&str> = requisite
        .missing
        .iter()
        .map(|missing| missing.part_name.as_str())
        .collect();
    assert_eq!(parts, vec!["changed"]);
    assert_eq!(requisite.missing[0].node_id, "n2");
    assert!(!h.receiver.registry().get(&id).unwrap().is_processing());
}

#[tokio::test]
async fn test_requisite_parse_error() {
    let h = Builder::new().build();
    let id = h.start().await;
    h.receiver
        .save_snapshot(&id, &mut &b"bogus entry\n"[..])
        .await
        .unwrap();

    let err = h.receiver.generate_requisite(&id).await.unwrap_err();

    assert!(
        matches!(&err, TransferError::RequisiteGenerationFailed { reason, .. } if reason.contains("unexpected entry")),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_unknown_transfer() {
    let h = Builder::new().build();
    let id = TransferId::new();

    assert_eq!(
        h.receiver.get_status(&id).unwrap_err(),
        TransferError::UnknownTransfer { transfer_id: id }
    );
    assert_eq!(
        h.receiver.get_transfer_report(&id).unwrap_err(),
        TransferError::UnknownTransfer { transfer_id: id }
    );
    assert_eq!(
        h.receiver.cancel(&id).await.unwrap_err(),
        TransferError::UnknownTransfer { transfer_id: id }
    );
    assert_eq!(
        h.receiver.commit(&id).await.unwrap_err(),
        TransferError::LockNotFound { transfer_id: id }
    );
    assert_eq!(
        h.receiver
            .save_content(&id, "contentA", &mut &b"hello"[..])
            .await
            .unwrap_err(),
        TransferError::LockNotFound { transfer_id: id }
    );
}

#[tokio::test]
async fn test_report_records_failures() {
    let h = Builder::new().build();
    let id = h.start().await;
    h.receiver.commit(&id).await.unwrap_err();

    let report = h.receiver.get_transfer_report(&id).unwrap();
    assert_eq!(report.status, TransferStatus::Error);
    let exceptions: Vec<&str> = report
        .entries
        .iter()
        .filter(|entry| entry.kind == ReportEntryKind::Exception)
        .map(|entry| entry.message.as_str())
        .collect();
    assert_eq!(exceptions.len(), 1);
    assert!(exceptions[0].starts_with("Unable to start commit. No snapshot file received"));
    assert!(h.progress.get_progress(&id).is_some());
}
