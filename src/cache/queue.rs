//! Revalidation task queue.
//!
//! The orchestrator pushes fire-and-forget refresh work here; the
//! [`RevalidationWorker`](super::worker::RevalidationWorker) drains it. Tasks
//! are not tracked, deduplicated or cancellable once enqueued.

use std::time::Instant;

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::keys::CacheKey;
use super::response::{BufferedResponse, OriginRequest};

const METRIC_REVALIDATION_SCHEDULED: &str = "isr_revalidation_scheduled_total";

/// Where the fresh response for a task comes from.
#[derive(Debug, Clone)]
pub enum TaskSource {
    /// Fetch the origin when the task runs.
    Refetch(OriginRequest),
    /// Reuse a response already fetched on the request path.
    Prefetched(BufferedResponse),
}

impl TaskSource {
    pub fn label(&self) -> &'static str {
        match self {
            TaskSource::Refetch(_) => "refetch",
            TaskSource::Prefetched(_) => "prefetched",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RevalidationTask {
    pub id: Uuid,
    pub key: CacheKey,
    /// Fresh window stamped onto the rewritten envelope.
    pub fresh_ms: u64,
    pub source: TaskSource,
    pub enqueued_at: Instant,
}

impl RevalidationTask {
    pub fn new(key: CacheKey, fresh_ms: u64, source: TaskSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            fresh_ms,
            source,
            enqueued_at: Instant::now(),
        }
    }
}

pub(crate) type TaskReceiver = mpsc::UnboundedReceiver<RevalidationTask>;

/// Sending half of the revalidation channel.
#[derive(Debug, Clone)]
pub struct RevalidationQueue {
    sender: mpsc::UnboundedSender<RevalidationTask>,
}

impl RevalidationQueue {
    pub(crate) fn channel() -> (Self, TaskReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Enqueue a task without waiting for it to run.
    pub fn schedule(&self, task: RevalidationTask) {
        let task_id = task.id;
        let hash = task.key.content_hash.clone();
        let source = task.source.label();

        match self.sender.send(task) {
            Ok(()) => {
                counter!(METRIC_REVALIDATION_SCHEDULED, "source" => source).increment(1);
                debug!(%task_id, %hash, source, "Revalidation scheduled");
            }
            Err(_) => {
                warn!(
                    %task_id,
                    %hash,
                    source,
                    "Revalidation dropped: worker has shut down"
                );
            }
        }
    }

    /// True once the worker side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
