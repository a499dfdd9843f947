use conclave_agent::{Provider, RoleBinding};
use conclave_store::{ParticipantRef, Subject};
use serde::{Deserialize, Serialize};

/// Agent id recorded on the forced-choice decision step. Never used by a
/// real participant.
pub const DECISION_AGENT_ID: &str = "__decision__";

/// Display name recorded on the decision step.
pub const DECISION_AGENT_NAME: &str = "Decision";

/// Role key used to resolve the synthesizer's capability.
pub const SYNTHESIZER_ROLE: &str = "synthesizer";

/// Configuration of one agent role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Stable identity.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Role key for capability resolution (`"default"`, `"intraday_t"`, ...).
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Role prompt placed at the top of every prompt for this agent.
    pub prompt: String,
    /// Disabled agents cannot take part in jobs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Provider pinned on this agent.
    #[serde(default)]
    pub provider: Option<Provider>,
    /// Model pinned on this agent.
    #[serde(default)]
    pub model: Option<String>,
    /// Listing order.
    #[serde(default)]
    pub sort_order: i32,
}

fn default_kind() -> String {
    "default".to_string()
}

fn default_enabled() -> bool {
    true
}

impl AgentProfile {
    /// Enabled profile with the `default` kind.
    pub fn new(id: impl Into<String>, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: default_kind(),
            prompt: prompt.into(),
            enabled: true,
            provider: None,
            model: None,
            sort_order: 0,
        }
    }

    /// Set the role kind.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Whether this agent can be dispatched.
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.prompt.trim().is_empty()
    }

    /// Capability request for this agent.
    pub fn binding(&self) -> RoleBinding {
        RoleBinding {
            role: self.kind.clone(),
            provider: self.provider,
            model: self.model.clone(),
        }
    }

    /// Reference recorded on the job.
    pub fn participant_ref(&self) -> ParticipantRef {
        ParticipantRef {
            agent_id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Tunables of the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrent invocations within a round.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// How many of its own analysis outputs an agent sees again.
    #[serde(default = "default_memory_depth")]
    pub memory_depth: usize,
    /// Debate history window = participants × this factor.
    #[serde(default = "default_history_window_factor")]
    pub history_window_factor: usize,
    /// Per-step cap inside the synthesis transcript.
    #[serde(default = "default_transcript_step_chars")]
    pub transcript_step_chars: usize,
    /// Total cap of the synthesis transcript; oldest entries drop first.
    #[serde(default = "default_transcript_max_chars")]
    pub transcript_max_chars: usize,
    /// Transcript excerpt length in the fallback report.
    #[serde(default = "default_fallback_excerpt_chars")]
    pub fallback_excerpt_chars: usize,
    /// Default page size of `list_jobs`.
    #[serde(default = "default_list_limit")]
    pub default_list_limit: usize,
}

fn default_max_workers() -> usize {
    4
}
fn default_memory_depth() -> usize {
    2
}
fn default_history_window_factor() -> usize {
    2
}
fn default_transcript_step_chars() -> usize {
    4_000
}
fn default_transcript_max_chars() -> usize {
    60_000
}
fn default_fallback_excerpt_chars() -> usize {
    3_000
}
fn default_list_limit() -> usize {
    50
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            memory_depth: default_memory_depth(),
            history_window_factor: default_history_window_factor(),
            transcript_step_chars: default_transcript_step_chars(),
            transcript_max_chars: default_transcript_max_chars(),
            fallback_excerpt_chars: default_fallback_excerpt_chars(),
            default_list_limit: default_list_limit(),
        }
    }
}

/// Input of `JobManager::create_job`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Subject (single id, or candidates plus the multi-candidate mode).
    pub subject: Subject,
    /// Ordered participant agent ids.
    pub participant_ids: Vec<String>,
    /// Analysis rounds to run.
    pub analysis_rounds: u32,
    /// Debate rounds to run.
    pub debate_rounds: u32,
    /// Free-form metadata stored on the job.
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl JobRequest {
    /// Request without metadata.
    pub fn new(
        subject: Subject,
        participant_ids: Vec<String>,
        analysis_rounds: u32,
        debate_rounds: u32,
    ) -> Self {
        Self {
            subject,
            participant_ids,
            analysis_rounds,
            debate_rounds,
            meta: serde_json::Value::Null,
        }
    }
}
