use super::AgentBackend;
use crate::config::Capability;
use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult};

/// Google Gemini `generateContent` backend.
pub struct GeminiBackend {
    capability: Capability,
    http: reqwest::Client,
}

impl GeminiBackend {
    /// Create a backend for one resolved capability.
    pub fn new(capability: Capability, http: reqwest::Client) -> Self {
        Self { capability, http }
    }
}

#[async_trait]
impl AgentBackend for GeminiBackend {
    async fn complete(&self, prompt: &str) -> ConclaveResult<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.capability.base_url(),
            self.capability.model
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.capability.temperature },
        });

        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.capability.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ConclaveError::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ConclaveError::Http(e.to_string()))?;
        if !status.is_success() {
            let detail: String = text.chars().take(200).collect();
            return Err(ConclaveError::Http(format!(
                "gemini API error {status}: {detail}"
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&text)?;
        json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ConclaveError::Invocation(format!("No text in Gemini response: {json}")))
    }
}
