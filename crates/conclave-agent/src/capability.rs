use crate::config::{Capability, Provider};
use conclave_core::{ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What an agent asks for when it needs to be invoked: its role key plus any
/// provider/model pinned on the agent itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    /// Role key looked up in the fallback table (e.g. `"analyst"`, `"synthesizer"`).
    pub role: String,
    /// Provider pinned on the agent, if any.
    #[serde(default)]
    pub provider: Option<Provider>,
    /// Model pinned on the agent, if any.
    #[serde(default)]
    pub model: Option<String>,
}

impl RoleBinding {
    /// Binding with no pinned provider or model.
    pub fn role(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            provider: None,
            model: None,
        }
    }

    /// Pin a provider and model on this binding.
    pub fn pinned(mut self, provider: Provider, model: impl Into<String>) -> Self {
        self.provider = Some(provider);
        self.model = Some(model.into());
        self
    }
}

/// Resolves a [`RoleBinding`] to a usable [`Capability`].
pub trait CapabilityResolver: Send + Sync {
    /// Resolve the binding, or fail with [`ConclaveError::MissingCredential`].
    fn resolve(&self, binding: &RoleBinding) -> ConclaveResult<Capability>;
}

/// Credential entry for a single provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCredential {
    /// API key; an empty key counts as missing.
    #[serde(default)]
    pub api_key: String,
    /// Optional API root override (proxies, self-hosted gateways).
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Per-role entry of the fallback table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleDefault {
    /// Provider for this role.
    #[serde(default)]
    pub provider: Option<Provider>,
    /// Model for this role.
    #[serde(default)]
    pub model: Option<String>,
}

/// Credentials and role defaults, usually loaded from the `[credentials]`
/// section of `conclave.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Provider used when neither the agent nor its role names one.
    #[serde(default)]
    pub default_provider: Option<Provider>,
    /// Model used when neither the agent nor its role names one.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Credentials keyed by provider name (`"openai"`, `"deepseek"`, ...).
    #[serde(default)]
    pub providers: HashMap<String, ProviderCredential>,
    /// Fallback table keyed by role.
    #[serde(default)]
    pub roles: HashMap<String, RoleDefault>,
}

/// Resolver backed by an explicit fallback table.
///
/// Provider: agent pin → role entry → `default_provider`.
/// Model: agent pin → role entry (only when it uses the same provider) →
/// `default_model` (same condition) → provider's built-in default.
pub struct TableCapabilityResolver {
    config: CredentialsConfig,
}

impl TableCapabilityResolver {
    /// Create a resolver over the given table.
    pub fn new(config: CredentialsConfig) -> Self {
        Self { config }
    }

    fn credential(&self, provider: Provider) -> Option<&ProviderCredential> {
        self.config
            .providers
            .get(provider.as_str())
            .filter(|c| !c.api_key.trim().is_empty())
    }
}

impl CapabilityResolver for TableCapabilityResolver {
    fn resolve(&self, binding: &RoleBinding) -> ConclaveResult<Capability> {
        let role_entry = self.config.roles.get(&binding.role);

        let provider = binding
            .provider
            .or_else(|| role_entry.and_then(|r| r.provider))
            .or(self.config.default_provider)
            .ok_or_else(|| {
                ConclaveError::MissingCredential(format!(
                    "no provider configured for role '{}'",
                    binding.role
                ))
            })?;

        let model = binding
            .model
            .clone()
            .or_else(|| {
                role_entry
                    .filter(|r| r.provider.map_or(true, |p| p == provider))
                    .and_then(|r| r.model.clone())
            })
            .or_else(|| {
                if self.config.default_provider.map_or(true, |p| p == provider) {
                    self.config.default_model.clone()
                } else {
                    None
                }
            })
            .unwrap_or_else(|| provider.default_model().to_string());

        let credential = self.credential(provider).ok_or_else(|| {
            ConclaveError::MissingCredential(format!(
                "no API key configured for provider '{provider}' (role '{}')",
                binding.role
            ))
        })?;

        let mut capability = Capability::new(provider, model, credential.api_key.clone());
        capability.api_base_url = credential.base_url.clone();
        Ok(capability)
    }
}
