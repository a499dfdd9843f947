//! Agent invocation for Conclave.
//!
//! Turns a role binding plus a prompt into generated text: the binding is
//! resolved to a provider capability through an explicit fallback table,
//! then a provider backend performs a single completion request.

/// Agent-facing backends, one per provider protocol.
pub mod backends;
/// Role → capability resolution with a fallback table.
pub mod capability;
/// Provider and capability types.
pub mod config;
/// The invocation seam used by the orchestrator.
pub mod invoker;

pub use backends::AgentBackend;
pub use capability::{
    CapabilityResolver, CredentialsConfig, ProviderCredential, RoleBinding, RoleDefault,
    TableCapabilityResolver,
};
pub use config::{Capability, Provider};
pub use invoker::{AgentInvoker, ProviderInvoker};
