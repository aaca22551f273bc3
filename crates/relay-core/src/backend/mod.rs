//! Backend - stateless downstream unit of work.
//!
//! A backend waits for a simulated processing latency, runs its `Workload`
//! and always answers with a well-formed `BackendResponse`. Internal faults
//! become `BackendResponse::Failure`; nothing is raised across the
//! invocation boundary.

pub mod registry;

pub use self::registry::{BackendRegistry, LocalInvoker, RegistryError};

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::BackendResponse;
use crate::ports::{Clock, DelayStrategy, IdGenerator, SystemClock, UlidGenerator};

/// Fault raised by a workload. Reported back as a `Failure` response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct WorkloadError(pub String);

/// The actual work a backend performs on a payload.
#[async_trait]
pub trait Workload: Send + Sync {
    async fn run(&self, payload: &serde_json::Value) -> Result<(), WorkloadError>;
}

/// Accepts every payload as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

#[async_trait]
impl Workload for Echo {
    async fn run(&self, _payload: &serde_json::Value) -> Result<(), WorkloadError> {
        Ok(())
    }
}

pub struct Backend {
    delay: Arc<dyn DelayStrategy>,
    workload: Arc<dyn Workload>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Backend {
    pub fn new(delay: Arc<dyn DelayStrategy>) -> Self {
        Self {
            delay,
            workload: Arc::new(Echo),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        }
    }

    pub fn with_workload(mut self, workload: Arc<dyn Workload>) -> Self {
        self.workload = workload;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        self.clock = clock;
        self
    }

    /// Process one invocation payload.
    pub async fn handle(&self, payload: serde_json::Value) -> BackendResponse {
        let request_id = self.ids.request_id();
        tracing::info!(%request_id, "backend received invocation");

        let delay = self.delay.next_delay();
        tokio::time::sleep(delay).await;
        let processing_time_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);

        match self.workload.run(&payload).await {
            Ok(()) => {
                tracing::info!(%request_id, processing_time_ms, "backend processing completed");
                BackendResponse::Success {
                    message: "Backend processing completed successfully".to_string(),
                    request_id,
                    processing_time_ms,
                    processed_event: payload,
                    timestamp: self.clock.now(),
                }
            }
            Err(err) => {
                tracing::error!(%request_id, error = %err, "backend processing failed");
                BackendResponse::Failure {
                    message: "Backend processing failed".to_string(),
                    error: err.to_string(),
                    request_id,
                }
            }
        }
    }
}
