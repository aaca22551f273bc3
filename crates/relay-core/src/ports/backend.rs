//! BackendInvoker port - synchronous request/response call to a backend.

use async_trait::async_trait;

use crate::domain::{BackendResponse, InvocationRequest, InvokeError};

/// Invokes a backend identified by a logical name.
///
/// `Ok` means the call completed, whatever the response says. `Err` is a
/// transport-level failure only.
#[async_trait]
pub trait BackendInvoker: Send + Sync {
    async fn invoke(
        &self,
        target: &str,
        request: &InvocationRequest,
    ) -> Result<BackendResponse, InvokeError>;
}
