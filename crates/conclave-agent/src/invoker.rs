use crate::backends::backend_for;
use crate::capability::{CapabilityResolver, RoleBinding};
use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The agent invocation seam consumed by the orchestrator.
///
/// One call is one attempt: implementations must not retry.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Invoke the role described by `binding` with `prompt`.
    async fn invoke(&self, binding: &RoleBinding, prompt: &str) -> ConclaveResult<String>;

    /// Check up front that `binding` can be invoked at all (credentials,
    /// provider, model). Called while a job is being prepared.
    fn ensure_ready(&self, _binding: &RoleBinding) -> ConclaveResult<()> {
        Ok(())
    }
}

/// Invoker that resolves each binding through a [`CapabilityResolver`] and
/// dispatches to the matching provider backend.
pub struct ProviderInvoker {
    resolver: Arc<dyn CapabilityResolver>,
    http: reqwest::Client,
}

impl ProviderInvoker {
    /// Create an invoker whose HTTP client enforces `request_timeout`.
    pub fn new(
        resolver: Arc<dyn CapabilityResolver>,
        request_timeout: Duration,
    ) -> ConclaveResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConclaveError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { resolver, http })
    }
}

#[async_trait]
impl AgentInvoker for ProviderInvoker {
    async fn invoke(&self, binding: &RoleBinding, prompt: &str) -> ConclaveResult<String> {
        let capability = self.resolver.resolve(binding)?;
        debug!(
            role = %binding.role,
            provider = %capability.provider,
            model = %capability.model,
            prompt_chars = prompt.chars().count(),
            "Invoking agent"
        );
        backend_for(capability, self.http.clone())
            .complete(prompt)
            .await
    }

    fn ensure_ready(&self, binding: &RoleBinding) -> ConclaveResult<()> {
        self.resolver.resolve(binding).map(|_| ())
    }
}
