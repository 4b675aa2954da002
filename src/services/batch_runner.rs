/*!
 * # Batch Runner
 *
 * Generic bounded-concurrency executor used by every bulk operation.
 *
 * Items are split into batches of `batch_size`. Inside a batch,
 * `worker_count` workers share one atomic cursor and each claims the next
 * unprocessed index with `fetch_add`, so no index is processed twice and
 * none is skipped. Retryable failures (rate limits, transient network
 * errors) are retried with linear backoff; any other failure is recorded
 * against that item and the batch carries on.
 *
 * Progress is published on a `watch` channel after every terminal item
 * outcome.
 */

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::retry::{with_retry, RetryConfig, TransientErrorPolicy};
use crate::errors::{ErrorResponse, ServiceError};
use crate::metrics;

/// Execution policy for one batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub worker_count: usize,
    /// Pause between two items handled by the same worker.
    pub item_delay: Duration,
    pub batch_delay: Duration,
    pub max_retries: u32,
    pub backoff_factor: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 10,
            worker_count: 1,
            item_delay: Duration::ZERO,
            batch_delay: Duration::ZERO,
            max_retries: 0,
            backoff_factor: Duration::ZERO,
        }
    }
}

impl BatchPolicy {
    /// One item at a time with a fixed pause between items.
    pub fn sequential(item_delay: Duration) -> Self {
        Self {
            item_delay,
            ..Self::default()
        }
    }

    /// Bounded pool of `worker_count` workers, no retries.
    pub fn worker_pool(worker_count: usize, batch_size: usize) -> Self {
        Self {
            batch_size,
            worker_count,
            ..Self::default()
        }
    }

    /// Retry retryable failures up to `max_retries` times.
    pub fn with_retry(mut self, max_retries: u32, backoff_factor: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn with_batch_delay(mut self, batch_delay: Duration) -> Self {
        self.batch_delay = batch_delay;
        self
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            backoff_factor: self.backoff_factor,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemDetail {
    pub index: usize,
    pub status: ItemStatus,
    pub attempts: u32,
    pub error: Option<ErrorResponse>,
}

/// Live progress of a batch job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: usize,
    /// Items that reached a terminal outcome.
    pub current: usize,
    pub success_count: usize,
    pub fail_count: usize,
    pub retried_count: usize,
    pub batches_processed: usize,
    pub details: Vec<BatchItemDetail>,
    pub cancelled: bool,
    pub finished: bool,
}

impl BatchProgress {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.current * 100) / self.total) as u8
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchItemDetail> {
        self.details
            .iter()
            .filter(|detail| detail.status == ItemStatus::Failed)
    }

    fn record(&mut self, detail: BatchItemDetail) {
        match detail.status {
            ItemStatus::Succeeded => self.success_count += 1,
            ItemStatus::Failed => self.fail_count += 1,
        }
        self.retried_count += detail.attempts.saturating_sub(1) as usize;
        self.current = self.success_count + self.fail_count;
        self.details.push(detail);
    }
}

/// Final progress plus the values returned by successful items, ordered by index.
#[derive(Debug, Clone)]
pub struct BatchReport<R> {
    pub progress: BatchProgress,
    pub outputs: Vec<(usize, R)>,
}

/// Stops a running job between items and between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct BatchRunner {
    policy: BatchPolicy,
    progress: watch::Sender<BatchProgress>,
    cancel: CancelHandle,
}

impl BatchRunner {
    pub fn new(policy: BatchPolicy) -> Self {
        let policy = BatchPolicy {
            batch_size: policy.batch_size.max(1),
            worker_count: policy.worker_count.max(1),
            ..policy
        };
        let (progress, _) = watch::channel(BatchProgress::default());
        Self {
            policy,
            progress,
            cancel: CancelHandle::default(),
        }
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchProgress> {
        self.progress.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn snapshot(&self) -> BatchProgress {
        self.progress.borrow().clone()
    }

    /// Runs `operation` over every item and returns once all batches are done
    /// or the job was cancelled.
    pub async fn run<T, F, Fut, R>(&self, items: Vec<T>, operation: F) -> BatchReport<R>
    where
        T: Clone + Send + Sync,
        F: Fn(T) -> Fut + Send + Sync,
        Fut: Future<Output = Result<R, ServiceError>> + Send,
        R: Send,
    {
        let total = items.len();
        self.progress.send_replace(BatchProgress::new(total));
        info!(
            total,
            batch_size = self.policy.batch_size,
            worker_count = self.policy.worker_count,
            "Starting batch job"
        );

        let mut outputs = Vec::with_capacity(total);
        let mut start = 0;
        while start < total {
            if start > 0 && !self.policy.batch_delay.is_zero() {
                sleep(self.policy.batch_delay).await;
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let end = (start + self.policy.batch_size).min(total);
            let batch_number = start / self.policy.batch_size + 1;
            debug!(batch = batch_number, start, end, "Processing batch");

            let cursor = AtomicUsize::new(start);
            let workers = self.policy.worker_count.min(end - start);
            let results = join_all(
                (0..workers).map(|_| self.worker(&cursor, end, &items, &operation)),
            )
            .await;
            outputs.extend(results.into_iter().flatten());

            self.progress.send_modify(|p| p.batches_processed += 1);
            start = end;
        }

        let cancelled = self.cancel.is_cancelled() && self.snapshot().current < total;
        self.progress.send_modify(|p| {
            p.cancelled = cancelled;
            p.finished = true;
        });
        let progress = self.snapshot();

        if cancelled {
            warn!(
                processed = progress.current,
                total, "Batch job cancelled before all items were processed"
            );
        } else {
            info!(
                success = progress.success_count,
                failed = progress.fail_count,
                retried = progress.retried_count,
                batches = progress.batches_processed,
                "Batch job finished"
            );
        }

        outputs.sort_by_key(|(index, _)| *index);
        BatchReport { progress, outputs }
    }

    async fn worker<T, F, Fut, R>(
        &self,
        cursor: &AtomicUsize,
        end: usize,
        items: &[T],
        operation: &F,
    ) -> Vec<(usize, R)>
    where
        T: Clone + Send + Sync,
        F: Fn(T) -> Fut + Send + Sync,
        Fut: Future<Output = Result<R, ServiceError>> + Send,
    {
        let retry = self.policy.retry_config();
        let mut outputs = Vec::new();
        let mut handled = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let index = cursor.fetch_add(1, Ordering::SeqCst);
            if index >= end {
                break;
            }
            // Pause between items only, never after a worker's last one.
            if handled > 0 && !self.policy.item_delay.is_zero() {
                sleep(self.policy.item_delay).await;
                if self.cancel.is_cancelled() {
                    break;
                }
            }
            handled += 1;

            let item = &items[index];
            let outcome =
                with_retry(&retry, &TransientErrorPolicy, || operation(item.clone())).await;

            let detail = match outcome.result {
                Ok(value) => {
                    metrics::BATCH_ITEMS_SUCCEEDED.inc();
                    outputs.push((index, value));
                    BatchItemDetail {
                        index,
                        status: ItemStatus::Succeeded,
                        attempts: outcome.attempts,
                        error: None,
                    }
                }
                Err(error) => {
                    metrics::BATCH_ITEMS_FAILED.inc();
                    warn!(index, attempts = outcome.attempts, error = %error, "Batch item failed");
                    BatchItemDetail {
                        index,
                        status: ItemStatus::Failed,
                        attempts: outcome.attempts,
                        error: Some(error.to_response()),
                    }
                }
            };
            if outcome.attempts > 1 {
                metrics::BATCH_ITEMS_RETRIED.inc_by(u64::from(outcome.attempts - 1));
            }
            self.progress.send_modify(|p| p.record(detail));
        }

        outputs
    }
}
