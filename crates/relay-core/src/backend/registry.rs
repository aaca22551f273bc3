use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::Backend;
use crate::domain::{BackendResponse, InvocationRequest, InvokeError};
use crate::ports::BackendInvoker;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("backend '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Registry of backends (logical name -> backend).
///
/// Built during initialization (mutable), shared read-only afterwards.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        backend: Arc<Backend>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.backends.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.backends.insert(name, backend);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Backend>> {
        self.backends.get(name)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// In-process invoker: resolves the target in a registry and calls it with a
/// per-invocation timeout.
pub struct LocalInvoker {
    registry: Arc<BackendRegistry>,
    timeout: Duration,
}

impl LocalInvoker {
    pub fn new(registry: Arc<BackendRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }
}

#[async_trait]
impl BackendInvoker for LocalInvoker {
    async fn invoke(
        &self,
        target: &str,
        request: &InvocationRequest,
    ) -> Result<BackendResponse, InvokeError> {
        let backend = self
            .registry
            .get(target)
            .ok_or_else(|| InvokeError::Unreachable {
                target: target.to_string(),
            })?;
        let payload = serde_json::to_value(request).map_err(InvokeError::Encode)?;

        tokio::time::timeout(self.timeout, backend.handle(payload))
            .await
            .map_err(|_| InvokeError::Timeout {
                target: target.to_string(),
                after: self.timeout,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Attributes, Message, MessageId, QueueMessageId};
    use crate::ports::FixedDelay;
    use chrono::Utc;
    use ulid::Ulid;

    fn request() -> InvocationRequest {
        let msg = Message::new(
            MessageId::from_ulid(Ulid::new()),
            Utc::now(),
            "publisher",
            r#"{"n":1}"#,
            Attributes::new(),
        );
        InvocationRequest::new(QueueMessageId::from_ulid(Ulid::new()), Utc::now(), msg)
    }

    fn registry_with(name: &str, delay: Duration) -> Arc<BackendRegistry> {
        let mut reg = BackendRegistry::new();
        reg.register(name, Arc::new(Backend::new(Arc::new(FixedDelay(delay)))))
            .unwrap();
        Arc::new(reg)
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = BackendRegistry::new();
        let backend = Arc::new(Backend::new(Arc::new(FixedDelay::default())));
        reg.register("backend", Arc::clone(&backend)).unwrap();
        let err = reg.register("backend", backend).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invoke_echoes_the_serialized_request() {
        let invoker = LocalInvoker::new(
            registry_with("backend", Duration::from_millis(500)),
            Duration::from_secs(30),
        );
        let req = request();

        let resp = invoker.invoke("backend", &req).await.unwrap();
        match resp {
            BackendResponse::Success { processed_event, .. } => {
                assert_eq!(processed_event, serde_json::to_value(&req).unwrap());
                assert_eq!(processed_event["source"], "consumer");
                assert_eq!(processed_event["data"]["n"], 1);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_target_is_unreachable() {
        let invoker = LocalInvoker::new(Arc::new(BackendRegistry::new()), Duration::from_secs(1));
        let err = invoker.invoke("missing", &request()).await.unwrap_err();
        assert!(matches!(err, InvokeError::Unreachable { target } if target == "missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let invoker = LocalInvoker::new(
            registry_with("slow", Duration::from_secs(5)),
            Duration::from_secs(1),
        );
        let err = invoker.invoke("slow", &request()).await.unwrap_err();
        assert!(matches!(
            err,
            InvokeError::Timeout { after, .. } if after == Duration::from_secs(1)
        ));
    }
}
