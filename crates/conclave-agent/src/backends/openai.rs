use super::AgentBackend;
use crate::config::Capability;
use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult};

/// OpenAI-compatible chat completions backend.
///
/// Works with OpenAI, DeepSeek, DashScope (Qwen) compatible mode, SiliconFlow,
/// and any other provider that implements `POST {base}/chat/completions`.
pub struct OpenAiCompatBackend {
    capability: Capability,
    http: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// Create a backend for one resolved capability.
    pub fn new(capability: Capability, http: reqwest::Client) -> Self {
        Self { capability, http }
    }

    fn build_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.capability.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.capability.temperature,
        })
    }
}

#[async_trait]
impl AgentBackend for OpenAiCompatBackend {
    async fn complete(&self, prompt: &str) -> ConclaveResult<String> {
        let url = format!("{}/chat/completions", self.capability.base_url());

        let resp = self
            .http
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.capability.api_key),
            )
            .header("Content-Type", "application/json")
            .json(&self.build_body(prompt))
            .send()
            .await
            .map_err(|e| ConclaveError::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ConclaveError::Http(e.to_string()))?;

        if !status.is_success() {
            let detail: String = body.chars().take(200).collect();
            return Err(ConclaveError::Http(format!(
                "{} API error {status}: {detail}",
                self.capability.provider
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&body)?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content` from a chat completions response.
pub fn parse_chat_response(body: &serde_json::Value) -> ConclaveResult<String> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            ConclaveError::Invocation(format!("No content in chat completions response: {body}"))
        })
}
