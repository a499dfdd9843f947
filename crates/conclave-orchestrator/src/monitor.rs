use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// What a participant is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// No call in flight; the last one succeeded.
    Idle,
    /// A call is in flight.
    Invoking,
    /// The last call failed.
    Error,
}

/// Cumulative invocation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationMetrics {
    /// Settled calls.
    pub invocations: u64,
    /// Calls that failed or panicked.
    pub errors: u64,
    /// Wall time of all settled calls.
    pub duration_ms: u64,
}

/// Live state of one agent across all jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantState {
    /// Agent these counters belong to.
    pub agent_id: String,
    /// Job of the invocation in flight, if any.
    pub current_job: Option<Uuid>,
    /// Current status.
    pub status: ParticipantStatus,
    /// Counters since the monitor was created.
    pub metrics: InvocationMetrics,
}

/// Tracks invocation state and counters per agent id.
pub struct ParticipantMonitor {
    states: Arc<RwLock<HashMap<String, ParticipantState>>>,
}

impl ParticipantMonitor {
    /// Monitor with no agents seen yet.
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mark an invocation as started.
    pub async fn start_invocation(&self, agent_id: &str, job_id: Uuid) {
        let mut states = self.states.write().await;
        let state = states
            .entry(agent_id.to_string())
            .or_insert_with(|| ParticipantState {
                agent_id: agent_id.to_string(),
                current_job: None,
                status: ParticipantStatus::Idle,
                metrics: InvocationMetrics::default(),
            });
        state.current_job = Some(job_id);
        state.status = ParticipantStatus::Invoking;
    }

    /// Record a settled invocation.
    pub async fn finish_invocation(&self, agent_id: &str, duration_ms: u64, ok: bool) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent_id) {
            state.current_job = None;
            state.metrics.invocations += 1;
            state.metrics.duration_ms += duration_ms;
            if ok {
                state.status = ParticipantStatus::Idle;
            } else {
                state.metrics.errors += 1;
                state.status = ParticipantStatus::Error;
            }
        }
    }

    /// All known states, ordered by agent id.
    pub async fn snapshot(&self) -> Vec<ParticipantState> {
        let states = self.states.read().await;
        let mut all: Vec<_> = states.values().cloned().collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    /// Sum of all counters.
    pub async fn aggregate_metrics(&self) -> InvocationMetrics {
        let states = self.states.read().await;
        let mut total = InvocationMetrics::default();
        for state in states.values() {
            total.invocations += state.metrics.invocations;
            total.errors += state.metrics.errors;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Snapshot and aggregate as one JSON document.
    pub async fn to_json(&self) -> serde_json::Value {
        let participants = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "participants": participants,
            "aggregate": aggregate,
        })
    }
}

impl Default for ParticipantMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_starts_empty() {
        let monitor = ParticipantMonitor::new();
        assert!(monitor.snapshot().await.is_empty());
        assert_eq!(monitor.aggregate_metrics().await, InvocationMetrics::default());
    }

    #[tokio::test]
    async fn test_invocation_lifecycle() {
        let monitor = ParticipantMonitor::new();
        let job = Uuid::new_v4();
        monitor.start_invocation("technical", job).await;
        let state = monitor.snapshot().await.remove(0);
        assert_eq!(state.status, ParticipantStatus::Invoking);
        assert_eq!(state.current_job, Some(job));

        monitor.finish_invocation("technical", 120, true).await;
        let state = monitor.snapshot().await.remove(0);
        assert_eq!(state.status, ParticipantStatus::Idle);
        assert_eq!(state.current_job, None);
        assert_eq!(state.metrics.invocations, 1);
        assert_eq!(state.metrics.duration_ms, 120);
    }

    #[tokio::test]
    async fn test_errors_are_counted() {
        let monitor = ParticipantMonitor::new();
        let job = Uuid::new_v4();
        for ok in [true, false, false] {
            monitor.start_invocation("bearish", job).await;
            monitor.finish_invocation("bearish", 10, ok).await;
        }
        monitor.start_invocation("bullish", job).await;
        monitor.finish_invocation("bullish", 5, true).await;

        let state = monitor.snapshot().await.remove(0);
        assert_eq!(state.agent_id, "bearish");
        assert_eq!(state.status, ParticipantStatus::Error);
        assert_eq!(state.metrics.errors, 2);

        let total = monitor.aggregate_metrics().await;
        assert_eq!(total.invocations, 4);
        assert_eq!(total.errors, 2);
        assert_eq!(total.duration_ms, 35);
    }

    #[tokio::test]
    async fn test_to_json_shape() {
        let monitor = ParticipantMonitor::new();
        monitor.start_invocation("a", Uuid::new_v4()).await;
        let json = monitor.to_json().await;
        assert_eq!(json["participants"][0]["agent_id"], "a");
        assert_eq!(json["participants"][0]["status"], "invoking");
        assert_eq!(json["aggregate"]["invocations"], 0);
    }
}
