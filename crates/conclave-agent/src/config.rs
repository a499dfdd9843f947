use serde::{Deserialize, Serialize};

/// Model providers an agent can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI chat completions.
    OpenAi,
    /// DeepSeek, OpenAI-compatible API.
    DeepSeek,
    /// Alibaba DashScope in OpenAI-compatible mode.
    Qwen,
    /// SiliconFlow, OpenAI-compatible API.
    SiliconFlow,
    /// Google Gemini `generateContent` API.
    Gemini,
}

impl Provider {
    /// All supported providers.
    pub const ALL: [Provider; 5] = [
        Provider::OpenAi,
        Provider::DeepSeek,
        Provider::Qwen,
        Provider::SiliconFlow,
        Provider::Gemini,
    ];

    /// Stable lowercase name, used as the credentials table key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::DeepSeek => "deepseek",
            Provider::Qwen => "qwen",
            Provider::SiliconFlow => "siliconflow",
            Provider::Gemini => "gemini",
        }
    }

    /// Parse a provider name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|p| p.as_str() == lower)
    }

    /// API root used when no base URL override is configured.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::DeepSeek => "https://api.deepseek.com/v1",
            Provider::Qwen => "https://dashscope.aliyuncs.com/compatible-mode/v1",
            Provider::SiliconFlow => "https://api.siliconflow.cn/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    /// Model used when neither the agent, the role table, nor the defaults name one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::DeepSeek => "deepseek-chat",
            Provider::Qwen => "qwen-turbo",
            Provider::SiliconFlow => "Qwen/Qwen2.5-7B-Instruct",
            Provider::Gemini => "gemini-1.5-flash",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved (provider, model, credential) triple for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Provider to call.
    pub provider: Provider,
    /// Model identifier as the provider expects it.
    pub model: String,
    /// Secret used to authenticate against the provider.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Optional override of the provider's API root.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.7
}

impl Capability {
    /// Build a capability with the default temperature and base URL.
    pub fn new(provider: Provider, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key: api_key.into(),
            api_base_url: None,
            temperature: default_temperature(),
        }
    }

    /// API root, with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!(Provider::parse("OpenAI"), Some(Provider::OpenAi));
        assert_eq!(Provider::parse(" deepseek "), Some(Provider::DeepSeek));
        assert_eq!(Provider::parse("claude"), None);
    }

    #[test]
    fn test_base_url_override_trims_slash() {
        let mut cap = Capability::new(Provider::Qwen, "qwen-max", "k");
        assert_eq!(
            cap.base_url(),
            "https://dashscope.aliyuncs.com/compatible-mode/v1"
        );
        cap.api_base_url = Some("http://localhost:8080/v1/".into());
        assert_eq!(cap.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_api_key_not_serialized() {
        let cap = Capability::new(Provider::OpenAi, "gpt-4o", "sk-secret");
        let json = serde_json::to_string(&cap).unwrap_or_default();
        assert!(!json.contains("sk-secret"));
        assert!(json.contains("\"openai\""));
    }
}
