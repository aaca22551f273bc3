//! QueueBinding - queue と Consumer をつなぐ接着剤
//!
//! The binding decides acknowledgment: every receipt of a batch is
//! acknowledged when the consumer reports success, none when it reports an
//! abort or runs past the execution limit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{BatchAbort, BatchReport, Consumer};
use crate::domain::{Delivery, QueueError};
use crate::ports::{Acknowledgement, MAX_BATCH_SIZE, MessageQueue};

/// Pause after a queue error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSettings {
    /// Messages per batch (1..=10).
    pub batch_size: usize,
    /// Upper bound on processing one batch.
    pub execution_timeout: Duration,
    /// Long-poll window of each dequeue.
    pub poll_wait: Duration,
}

impl Default for BindingSettings {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            execution_timeout: Duration::from_secs(30),
            poll_wait: Duration::from_secs(20),
        }
    }
}

/// What happened to one dequeued batch.
#[derive(Debug)]
pub enum BatchDisposition {
    /// Nothing was visible.
    Empty,
    /// Every message was processed; all receipts were acknowledged.
    Acknowledged {
        report: BatchReport,
        /// Receipts that had already gone stale when acknowledged.
        stale: usize,
    },
    /// A message failed; nothing was acknowledged.
    Aborted { size: usize, abort: BatchAbort },
    /// The execution limit elapsed; nothing was acknowledged.
    TimedOut { size: usize, after: Duration },
}

impl BatchDisposition {
    pub fn is_empty(&self) -> bool {
        matches!(self, BatchDisposition::Empty)
    }

    /// Number of messages acknowledged as a result of this batch.
    pub fn acknowledged(&self) -> usize {
        match self {
            BatchDisposition::Acknowledged { report, stale } => report.len() - stale,
            _ => 0,
        }
    }
}

pub struct QueueBinding {
    queue: Arc<dyn MessageQueue>,
    consumer: Arc<Consumer>,
    settings: BindingSettings,
}

impl QueueBinding {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        consumer: Arc<Consumer>,
        settings: BindingSettings,
    ) -> Self {
        Self {
            queue,
            consumer,
            settings,
        }
    }

    pub fn settings(&self) -> &BindingSettings {
        &self.settings
    }

    /// Dequeue one batch (long-polling up to `poll_wait`) and dispatch it.
    pub async fn run_once(&self) -> Result<BatchDisposition, QueueError> {
        let batch = self
            .queue
            .dequeue(self.settings.batch_size, self.settings.poll_wait)
            .await?;
        self.dispatch(batch).await
    }

    /// Dispatch batches until nothing is visible, without long-polling.
    ///
    /// Aborted batches stay invisible until their lease lapses, so this
    /// always terminates.
    pub async fn drain(&self) -> Result<Vec<BatchDisposition>, QueueError> {
        let mut dispositions = Vec::new();
        loop {
            let batch = self
                .queue
                .dequeue(self.settings.batch_size, Duration::ZERO)
                .await?;
            if batch.is_empty() {
                return Ok(dispositions);
            }
            dispositions.push(self.dispatch(batch).await?);
        }
    }

    /// Process one batch under the execution limit and settle acknowledgment.
    pub async fn dispatch(&self, batch: Vec<Delivery>) -> Result<BatchDisposition, QueueError> {
        if batch.is_empty() {
            return Ok(BatchDisposition::Empty);
        }
        let size = batch.len();
        tracing::info!(size, "processing batch");

        let outcome = tokio::time::timeout(
            self.settings.execution_timeout,
            self.consumer.process_batch(&batch),
        )
        .await;

        match outcome {
            Ok(Ok(report)) => {
                let stale = self.acknowledge_all(&batch).await?;
                tracing::info!(size, stale, "batch acknowledged");
                Ok(BatchDisposition::Acknowledged { report, stale })
            }
            Ok(Err(abort)) => {
                tracing::error!(
                    size,
                    index = abort.index,
                    completed = abort.completed,
                    error = %abort,
                    "batch aborted; no message acknowledged, all will be redelivered"
                );
                Ok(BatchDisposition::Aborted { size, abort })
            }
            Err(_) => {
                let after = self.settings.execution_timeout;
                tracing::error!(
                    size,
                    ?after,
                    "batch execution timed out; no message acknowledged, all will be redelivered"
                );
                Ok(BatchDisposition::TimedOut { size, after })
            }
        }
    }

    async fn acknowledge_all(&self, batch: &[Delivery]) -> Result<usize, QueueError> {
        let mut stale = 0;
        for delivery in batch {
            if self.queue.acknowledge(&delivery.receipt).await? == Acknowledgement::Stale {
                tracing::warn!(
                    queue_message_id = %delivery.message_id,
                    "receipt was stale at acknowledgment"
                );
                stale += 1;
            }
        }
        Ok(stale)
    }

    /// Spawn `concurrency` independent pollers.
    pub fn spawn(self: Arc<Self>, concurrency: usize) -> BindingGroup {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(concurrency);
        for poller_id in 0..concurrency {
            let binding = Arc::clone(&self);
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                binding.poll_loop(poller_id, &mut rx).await;
            }));
        }

        BindingGroup { shutdown_tx, joins }
    }

    async fn poll_loop(&self, poller_id: usize, shutdown_rx: &mut watch::Receiver<bool>) {
        tracing::debug!(poller_id, "poller started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // dequeue は待つ可能性があるので shutdown と競合させる。
            // batch 処理そのものは中断しない。
            let dequeue = self
                .queue
                .dequeue(self.settings.batch_size, self.settings.poll_wait);
            let batch = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                batch = dequeue => batch,
            };

            let result = match batch {
                Ok(batch) => self.dispatch(batch).await,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                tracing::warn!(poller_id, error = %err, "queue error; backing off");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
        tracing::debug!(poller_id, "poller stopped");
    }
}

/// Handle on a set of running pollers.
pub struct BindingGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl BindingGroup {
    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new batches. In-flight batches run to completion.
    pub fn request_shutdown(&self) {
        // receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "poller task failed");
            }
        }
    }
}
