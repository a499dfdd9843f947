/// Gemini `generateContent` backend.
pub mod gemini;
/// OpenAI-compatible chat completions backend.
pub mod openai;

use crate::config::{Capability, Provider};
use async_trait::async_trait;
use conclave_core::ConclaveResult;

/// Trait for model provider backends.
///
/// A backend performs exactly one completion request per call and never
/// retries; retry policy (if any) belongs to the caller.
///
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `AgentBackend` for your struct
/// 3. Add the variant to `Provider` in `config.rs`
/// 4. Wire it up in [`backend_for`]
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Send a single-turn prompt and return the generated text.
    async fn complete(&self, prompt: &str) -> ConclaveResult<String>;
}

/// Build the backend that speaks the capability's provider protocol.
pub fn backend_for(capability: Capability, http: reqwest::Client) -> Box<dyn AgentBackend> {
    match capability.provider {
        Provider::Gemini => Box::new(gemini::GeminiBackend::new(capability, http)),
        Provider::OpenAi | Provider::DeepSeek | Provider::Qwen | Provider::SiliconFlow => {
            Box::new(openai::OpenAiCompatBackend::new(capability, http))
        }
    }
}
