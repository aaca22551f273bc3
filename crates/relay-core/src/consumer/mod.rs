//! Consumer - batch processing with all-or-nothing acknowledgment.
//!
//! # フロー
//! 1. Delivery の body を `Message` に decode（失敗 = decode failure）
//! 2. backend が設定されていれば `InvocationRequest` を同期 invoke
//! 3. 結果をログに出す
//!
//! A batch is processed sequentially. The first message that fails ends the
//! pass and the whole batch is reported as aborted: the binding then
//! acknowledges nothing, and every message in the batch (including the ones
//! that already succeeded) is redelivered after its visibility timeout.

pub mod binding;

pub use self::binding::{BatchDisposition, BindingGroup, BindingSettings, QueueBinding};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{
    BackendResponse, Delivery, InvocationRequest, Message, MessageId, ProcessError,
    QueueMessageId,
};
use crate::ports::{BackendInvoker, Clock, SystemClock};

/// What to do when the backend answers with a `Failure` response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalFailurePolicy {
    /// Treat any response as success; the failure is only logged.
    #[default]
    Accept,
    /// Escalate to a processing failure, which aborts the batch.
    #[serde(alias = "abort")]
    AbortBatch,
}

impl fmt::Display for LogicalFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalFailurePolicy::Accept => f.write_str("accept"),
            LogicalFailurePolicy::AbortBatch => f.write_str("abort_batch"),
        }
    }
}

impl FromStr for LogicalFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" => Ok(LogicalFailurePolicy::Accept),
            "abort" | "abort_batch" => Ok(LogicalFailurePolicy::AbortBatch),
            other => Err(format!(
                "unknown logical failure policy '{other}' (expected 'accept' or 'abort')"
            )),
        }
    }
}

/// Result of processing one message.
#[derive(Debug, Clone)]
pub struct MessageReport {
    pub queue_message_id: QueueMessageId,
    pub message_id: MessageId,
    /// `None` when no backend is configured.
    pub response: Option<BackendResponse>,
}

/// Every message of the batch was processed.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub processed: Vec<MessageReport>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}

/// The batch was aborted by the failure of one of its messages.
#[derive(Debug, thiserror::Error)]
#[error("batch aborted at position {index} (message {message_id}) after {completed} completed: {source}")]
pub struct BatchAbort {
    /// Zero-based position of the failing message in the batch.
    pub index: usize,
    pub message_id: QueueMessageId,
    /// Messages that completed before the failure. They are not acknowledged.
    pub completed: usize,
    #[source]
    pub source: ProcessError,
}

pub struct Consumer {
    invoker: Option<Arc<dyn BackendInvoker>>,
    target: String,
    policy: LogicalFailurePolicy,
    work_delay: Duration,
    clock: Arc<dyn Clock>,
}

impl Consumer {
    /// A consumer that only decodes and logs.
    pub fn new() -> Self {
        Self {
            invoker: None,
            target: String::new(),
            policy: LogicalFailurePolicy::default(),
            work_delay: Duration::ZERO,
            clock: Arc::new(SystemClock),
        }
    }

    /// Invoke `target` through `invoker` for every message.
    pub fn with_backend(
        mut self,
        invoker: Arc<dyn BackendInvoker>,
        target: impl Into<String>,
    ) -> Self {
        self.invoker = Some(invoker);
        self.target = target.into();
        self
    }

    pub fn with_policy(mut self, policy: LogicalFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Simulated consumer-side work per message.
    pub fn with_work_delay(mut self, delay: Duration) -> Self {
        self.work_delay = delay;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> LogicalFailurePolicy {
        self.policy
    }

    /// Process a batch in order; all-or-nothing.
    #[tracing::instrument(skip_all, fields(size = batch.len(), target = %self.target))]
    pub async fn process_batch(&self, batch: &[Delivery]) -> Result<BatchReport, BatchAbort> {
        let mut report = BatchReport {
            processed: Vec::with_capacity(batch.len()),
        };
        for (index, delivery) in batch.iter().enumerate() {
            match self.process_message(delivery).await {
                Ok(message_report) => report.processed.push(message_report),
                Err(source) => {
                    return Err(BatchAbort {
                        index,
                        message_id: delivery.message_id,
                        completed: report.processed.len(),
                        source,
                    });
                }
            }
        }
        Ok(report)
    }

    pub async fn process_message(
        &self,
        delivery: &Delivery,
    ) -> Result<MessageReport, ProcessError> {
        tracing::info!(
            queue_message_id = %delivery.message_id,
            receipt = %delivery.receipt,
            receive_count = delivery.receive_count,
            attributes = ?delivery.attributes,
            "processing message"
        );

        let result = self.decode_and_invoke(delivery).await;
        match &result {
            Ok(report) => tracing::info!(
                queue_message_id = %delivery.message_id,
                message_id = %report.message_id,
                "message processed successfully"
            ),
            Err(err) => tracing::error!(
                queue_message_id = %delivery.message_id,
                error = %err,
                body = %delivery.body,
                "failed to process message"
            ),
        }
        result
    }

    async fn decode_and_invoke(&self, delivery: &Delivery) -> Result<MessageReport, ProcessError> {
        let message = Message::from_body(&delivery.body).map_err(|source| ProcessError::Decode {
            message_id: delivery.message_id,
            source,
        })?;
        tracing::debug!(
            message_id = %message.id(),
            timestamp = %message.timestamp(),
            source = message.source(),
            data = message.data(),
            "message decoded"
        );
        let message_id = message.id().clone();

        if !self.work_delay.is_zero() {
            tokio::time::sleep(self.work_delay).await;
        }

        let Some(invoker) = &self.invoker else {
            return Ok(MessageReport {
                queue_message_id: delivery.message_id,
                message_id,
                response: None,
            });
        };

        let request = InvocationRequest::new(delivery.message_id, self.clock.now(), message);
        let response = invoker.invoke(&self.target, &request).await?;
        self.check_response(&response)?;

        Ok(MessageReport {
            queue_message_id: delivery.message_id,
            message_id,
            response: Some(response),
        })
    }

    fn check_response(&self, response: &BackendResponse) -> Result<(), ProcessError> {
        match response {
            BackendResponse::Success {
                request_id,
                processing_time_ms,
                ..
            } => {
                tracing::info!(
                    %request_id,
                    processing_time_ms,
                    target = %self.target,
                    "backend invocation succeeded"
                );
                Ok(())
            }
            BackendResponse::Failure {
                message,
                error,
                request_id,
            } => match self.policy {
                LogicalFailurePolicy::Accept => {
                    tracing::warn!(
                        %request_id,
                        %error,
                        target = %self.target,
                        "backend reported failure; accepted by policy"
                    );
                    Ok(())
                }
                LogicalFailurePolicy::AbortBatch => Err(ProcessError::LogicalFailure {
                    request_id: *request_id,
                    message: message.clone(),
                    error: error.clone(),
                }),
            },
        }
    }
}

impl Default for Consumer {
    fn default() -> Self {
        Self::new()
    }
}
