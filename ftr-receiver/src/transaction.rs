//! Transactional boundaries around receiver bookkeeping

use std::{future::Future, pin::Pin, time::Duration};

use backoff::{backoff::Backoff, ExponentialBackoffBuilder};
use tokio::time::sleep;
use tracing::{info, trace, warn};

use crate::error::{Result, TransferError};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of one attempt at transactional work. Return
/// [`backoff::Error::transient`] to ask for another attempt and
/// [`backoff::Error::permanent`] to give up at once.
///
/// A plain `TransferError` converts into a *transient* error, so `?` on one
/// inside the work retries it.
pub type TxResult = std::result::Result<(), backoff::Error<TransferError>>;

/// Work that may be run more than once.
pub type TxWork<'a> = Box<dyn FnMut() -> BoxFuture<'a, TxResult> + Send + 'a>;

/// Wrap an async closure as transactional work.
pub fn tx_work<'a, F, Fut>(mut f: F) -> TxWork<'a>
where
    F: FnMut() -> Fut + Send + 'a,
    Fut: Future<Output = TxResult> + Send + 'a,
{
    Box::new(move || -> BoxFuture<'a, TxResult> { Box::pin(f()) })
}

/// Runs work inside a transaction of the backing store.
pub trait TransactionRunner: Send + Sync {
    fn run_in_transaction<'a>(
        &'a self,
        work: TxWork<'a>,
        read_only: bool,
        requires_new: bool,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Transaction runner for receivers without a transactional store. Work is
/// retried with exponential backoff while it reports transient failures,
/// up to a fixed number of attempts.
#[derive(Debug, Clone)]
pub struct RetryingTransactionRunner {
    max_attempts: u32,
    retry_wait: Duration,
}

impl RetryingTransactionRunner {
    pub fn new(max_attempts: u32) -> RetryingTransactionRunner {
        RetryingTransactionRunner {
            max_attempts: max_attempts.max(1),
            retry_wait: Duration::from_millis(50),
        }
    }

    pub fn with_retry_wait(mut self, retry_wait: Duration) -> RetryingTransactionRunner {
        self.retry_wait = retry_wait;
        self
    }
}

impl Default for RetryingTransactionRunner {
    fn default() -> Self {
        Self::new(3)
    }
}

impl TransactionRunner for RetryingTransactionRunner {
    fn run_in_transaction<'a>(
        &'a self,
        mut work: TxWork<'a>,
        read_only: bool,
        requires_new: bool,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut retry = ExponentialBackoffBuilder::new()
                .with_initial_interval(self.retry_wait)
                .with_max_elapsed_time(None)
                .build();
            let mut attempt = 1u32;
            loop {
                trace!(attempt, read_only, requires_new, "transaction");
                match work().await {
                    Ok(()) => {
                        if attempt > 1 {
                            info!(attempt, "retry successful");
                        }
                        return Ok(());
                    }
                    Err(backoff::Error::Permanent(err)) => return Err(err),
                    Err(backoff::Error::Transient { err, retry_after }) => {
                        if attempt >= self.max_attempts {
                            warn!(attempt, %err, "transaction retries exhausted");
                            return Err(err);
                        }
                        let delay = retry_after
                            .or_else(|| retry.next_backoff())
                            .unwrap_or(self.retry_wait);
                        attempt += 1;
                        warn!(?delay, attempt, %err, "retrying transaction");
                        sleep(delay).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;
    use crate::types::TransferId;

    fn counting_work<'a>(attempts: Arc<AtomicU32>, fail_until: u32, transient: bool) -> TxWork<'a> {
        let transfer_id = TransferId::new();
        tx_work(move || {
            let attempts = attempts.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= fail_until {
                    return Ok(());
                }
                let err = TransferError::LockTimedOut { transfer_id };
                if transient {
                    Err(backoff::Error::transient(err))
                } else {
                    Err(backoff::Error::permanent(err))
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retried() {
        let runner = RetryingTransactionRunner::new(3);
        let attempts = Arc::new(AtomicU32::new(0));

        runner
            .run_in_transaction(counting_work(attempts.clone(), 3, true), false, true)
            .await
            .expect("third attempt succeeds");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let runner = RetryingTransactionRunner::new(2);
        let attempts = Arc::new(AtomicU32::new(0));

        let err = runner
            .run_in_transaction(counting_work(attempts.clone(), 10, true), false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::LockTimedOut { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let runner = RetryingTransactionRunner::default();
        let attempts = Arc::new(AtomicU32::new(0));

        let err = runner
            .run_in_transaction(counting_work(attempts.clone(), 10, false), true, false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::LockTimedOut { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    async fn propagate(transfer_id: TransferId) -> TxResult {
        let res: Result<()> = Err(TransferError::LockTimedOut { transfer_id });
        res?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_question_mark_is_transient() {
        let runner = RetryingTransactionRunner::new(2);
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let transfer_id = TransferId::new();
        let work = tx_work(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                propagate(transfer_id).await
            }
        });

        let err = runner.run_in_transaction(work, false, false).await.unwrap_err();
        assert_eq!(err, TransferError::LockTimedOut { transfer_id });
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
