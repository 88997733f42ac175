//! Revalidation worker.
//!
//! Drains the revalidation queue and writes fresh responses through to both
//! tiers. Failures are logged and swallowed; nothing here can reach a request
//! that is already being served.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use super::envelope::{EnvelopeConfig, make_cacheable};
use super::keys::CacheKey;
use super::origin::{Origin, OriginError};
use super::queue::{RevalidationTask, TaskReceiver, TaskSource};
use super::response::BufferedResponse;
use super::store::{DurableTier, FastTier};

const METRIC_REVALIDATION_FAILED: &str = "isr_revalidation_failed_total";
const METRIC_REVALIDATION_MS: &str = "isr_revalidation_ms";
pub(crate) const METRIC_TIER_ERROR: &str = "isr_cache_tier_error_total";

/// Writes a response into the durable tier (if any) and the fast tier.
pub struct WriteThrough {
    fast: Arc<dyn FastTier>,
    durable: Option<Arc<dyn DurableTier>>,
    origin: Arc<dyn Origin>,
    long_term_cache_ms: u64,
    durable_ttl: Duration,
}

impl WriteThrough {
    pub fn new(
        fast: Arc<dyn FastTier>,
        durable: Option<Arc<dyn DurableTier>>,
        origin: Arc<dyn Origin>,
        long_term_cache_ms: u64,
        durable_ttl: Duration,
    ) -> Self {
        Self {
            fast,
            durable,
            origin,
            long_term_cache_ms,
            durable_ttl,
        }
    }

    pub fn fast(&self) -> &Arc<dyn FastTier> {
        &self.fast
    }

    pub fn durable(&self) -> Option<&Arc<dyn DurableTier>> {
        self.durable.as_ref()
    }

    pub fn origin(&self) -> &Arc<dyn Origin> {
        &self.origin
    }

    /// Best-effort write of `response` to both tiers.
    pub async fn store(&self, key: &CacheKey, response: &BufferedResponse, fresh_ms: u64) {
        if let Some(durable) = &self.durable
            && let Err(err) = durable
                .put(
                    &key.content_hash,
                    response.text().into_owned(),
                    self.durable_ttl,
                )
                .await
        {
            counter!(METRIC_TIER_ERROR, "tier" => "durable", "op" => "put").increment(1);
            warn!(hash = %key.content_hash, error = %err, "Durable tier write failed");
        }

        let config = EnvelopeConfig {
            long_term_cache_ms: self.long_term_cache_ms,
            fresh_ms,
        };
        let envelope = match make_cacheable(response, config) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(hash = %key.content_hash, error = %err, "Failed to build cache envelope");
                return;
            }
        };

        if let Err(err) = self.fast.put(&key.lookup, envelope).await {
            counter!(METRIC_TIER_ERROR, "tier" => "fast", "op" => "put").increment(1);
            warn!(hash = %key.content_hash, error = %err, "Fast tier write failed");
        }
    }

    /// Resolve the task's response and write it through.
    pub async fn execute(&self, task: RevalidationTask) -> Result<(), OriginError> {
        let response = match task.source {
            TaskSource::Prefetched(response) => response,
            TaskSource::Refetch(request) => self.origin.fetch(request).await?,
        };
        self.store(&task.key, &response, task.fresh_ms).await;
        Ok(())
    }

    #[instrument(skip_all, fields(task_id = %task.id, hash = %task.key.content_hash))]
    async fn run_task(&self, task: RevalidationTask) {
        let enqueued_at = task.enqueued_at;
        let source = task.source.label();

        match self.execute(task).await {
            Ok(()) => {
                let elapsed_ms = enqueued_at.elapsed().as_secs_f64() * 1000.0;
                histogram!(METRIC_REVALIDATION_MS, "source" => source).record(elapsed_ms);
                info!(source, elapsed_ms, "Revalidation complete");
            }
            Err(err) => {
                counter!(METRIC_REVALIDATION_FAILED, "source" => source).increment(1);
                warn!(source, error = %err, "Revalidation failed");
            }
        }
    }
}

/// Background consumer of the revalidation queue.
pub struct RevalidationWorker {
    receiver: TaskReceiver,
    write_through: Arc<WriteThrough>,
    permits: Arc<Semaphore>,
}

impl RevalidationWorker {
    pub(crate) fn new(
        receiver: TaskReceiver,
        write_through: Arc<WriteThrough>,
        concurrency: usize,
    ) -> Self {
        Self {
            receiver,
            write_through,
            permits: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Run every task currently queued, one at a time, on this task.
    ///
    /// Returns the number of tasks processed.
    pub async fn consume(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(task) = self.receiver.try_recv() {
            self.write_through.run_task(task).await;
            processed += 1;
        }
        processed
    }

    /// Process tasks until every queue handle is dropped, then wait for the
    /// tasks still in flight.
    ///
    /// Each task runs on its own tokio task, bounded by the configured
    /// concurrency. Aborting the future returned here aborts those tasks too.
    pub async fn run(mut self) {
        info!(
            concurrency = self.permits.available_permits(),
            "Revalidation worker started"
        );

        let mut in_flight = JoinSet::new();
        while let Some(task) = self.receiver.recv().await {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            let write_through = self.write_through.clone();
            in_flight.spawn(async move {
                write_through.run_task(task).await;
                drop(permit);
            });
            while in_flight.try_join_next().is_some() {}
        }

        let draining = in_flight.len();
        while in_flight.join_next().await.is_some() {}

        info!(drained = draining, "Revalidation worker stopped");
    }
}
