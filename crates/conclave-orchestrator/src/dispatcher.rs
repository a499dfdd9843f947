use crate::monitor::ParticipantMonitor;
use crate::types::AgentProfile;
use conclave_agent::AgentInvoker;
use conclave_core::{ConclaveError, ConclaveResult};
use conclave_store::{JobPatch, JobStore, Phase, Step, ERROR_PREFIX};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Highest progress value reachable before completion.
pub const MAX_RUNNING_PROGRESS: u8 = 99;

/// Progress reached when `round` of `phase` has fully settled.
///
/// Analysis round r maps to 20 + 10r, debate round r to 60 + 10r. Values are
/// clamped below 100; the store merges them with `max`, so the sequence stays
/// monotonic for any round counts.
pub fn round_progress(phase: Phase, round: u32) -> u8 {
    let value = match phase {
        Phase::Analysis => 20u32.saturating_add(round.saturating_mul(10)),
        Phase::Debate => 60u32.saturating_add(round.saturating_mul(10)),
        Phase::Decision => u32::from(MAX_RUNNING_PROGRESS),
    };
    u8::try_from(value.min(u32::from(MAX_RUNNING_PROGRESS))).unwrap_or(MAX_RUNNING_PROGRESS)
}

/// Progress after `done` of `total` invocations of a round have settled.
fn partial_progress(phase: Phase, round: u32, done: usize, total: usize) -> u8 {
    let start = u32::from(round_progress(phase, round.saturating_sub(1)));
    let end = u32::from(round_progress(phase, round));
    if total == 0 || end <= start {
        return round_progress(phase, round);
    }
    let span = (end - start) as usize;
    let value = start as usize + span * done.min(total) / total;
    u8::try_from(value).unwrap_or(MAX_RUNNING_PROGRESS)
}

/// Step content recorded for a failed invocation.
pub fn error_content(agent_name: &str, phase: Phase, detail: &str) -> String {
    format!("{ERROR_PREFIX} {agent_name} {phase} failed: {detail}")
}

struct Settled {
    index: usize,
    outcome: ConclaveResult<String>,
    elapsed_ms: u64,
}

/// Runs one round: every participant is invoked once, concurrently.
///
/// Concurrency is bounded by a semaphore sized `min(max_workers, n)`.
/// Steps are appended one at a time by this task in completion order, each
/// followed by a progress update. A failed or panicked invocation becomes an
/// error step; it never aborts the round.
pub struct RoundDispatcher {
    store: Arc<dyn JobStore>,
    invoker: Arc<dyn AgentInvoker>,
    monitor: Arc<ParticipantMonitor>,
    max_workers: usize,
}

impl RoundDispatcher {
    /// Dispatcher writing to `store` with at most `max_workers` calls in flight.
    pub fn new(
        store: Arc<dyn JobStore>,
        invoker: Arc<dyn AgentInvoker>,
        monitor: Arc<ParticipantMonitor>,
        max_workers: usize,
    ) -> Self {
        Self {
            store,
            invoker,
            monitor,
            max_workers,
        }
    }

    /// Run `round` of `phase` for `participants`.
    ///
    /// Prompts are built up front with `build_prompt`, so every participant
    /// sees the same snapshot of earlier rounds. Returns the steps in the
    /// order they were recorded. Only store failures are returned as errors.
    pub async fn run_round<F>(
        &self,
        job_id: Uuid,
        phase: Phase,
        round: u32,
        participants: &[AgentProfile],
        mut build_prompt: F,
    ) -> ConclaveResult<Vec<Step>>
    where
        F: FnMut(&AgentProfile) -> String,
    {
        let total = participants.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let prompts: Vec<String> = participants.iter().map(&mut build_prompt).collect();
        let pool = self.max_workers.clamp(1, total);
        info!(job_id = %job_id, phase = %phase, round, participants = total, pool, "Dispatching round");

        let semaphore = Arc::new(Semaphore::new(pool));
        let mut set = JoinSet::new();
        for (index, (agent, prompt)) in participants.iter().zip(prompts).enumerate() {
            let semaphore = semaphore.clone();
            let invoker = self.invoker.clone();
            let monitor = self.monitor.clone();
            let binding = agent.binding();
            let agent_id = agent.id.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                monitor.start_invocation(&agent_id, job_id).await;
                let started = Instant::now();
                // Inner task so a panicking invoker is caught as a JoinError.
                let call = tokio::spawn(async move { invoker.invoke(&binding, &prompt).await });
                let outcome = match call.await {
                    Ok(result) => result,
                    Err(e) => Err(ConclaveError::Invocation(format!(
                        "invocation task aborted: {e}"
                    ))),
                };
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                monitor
                    .finish_invocation(&agent_id, elapsed_ms, outcome.is_ok())
                    .await;
                Settled {
                    index,
                    outcome,
                    elapsed_ms,
                }
            });
        }

        let mut steps = Vec::with_capacity(total);
        let mut settled = vec![false; total];
        let mut store_error = None;
        while let Some(joined) = set.join_next().await {
            let Settled {
                index,
                outcome,
                elapsed_ms,
            } = match joined {
                Ok(s) => s,
                Err(e) => {
                    error!(job_id = %job_id, phase = %phase, round, error = %e, "Dispatch task lost");
                    continue;
                }
            };
            settled[index] = true;
            let agent = &participants[index];
            let content = match outcome {
                Ok(text) => {
                    debug!(job_id = %job_id, agent_id = %agent.id, elapsed_ms, "Invocation succeeded");
                    text
                }
                Err(e) => {
                    warn!(job_id = %job_id, phase = %phase, round, agent_id = %agent.id, error = %e, "Invocation failed");
                    error_content(&agent.name, phase, &e.to_string())
                }
            };
            let step = Step::new(phase, round, &agent.participant_ref(), content);
            let done = steps.len() + 1;
            if let Err(e) = self.record(job_id, &step, phase, round, done, total).await {
                store_error.get_or_insert(e);
            }
            steps.push(step);
        }

        for (index, agent) in participants.iter().enumerate() {
            if settled[index] {
                continue;
            }
            let step = Step::new(
                phase,
                round,
                &agent.participant_ref(),
                error_content(&agent.name, phase, "dispatch task lost"),
            );
            let done = steps.len() + 1;
            if let Err(e) = self.record(job_id, &step, phase, round, done, total).await {
                store_error.get_or_insert(e);
            }
            steps.push(step);
        }

        match store_error {
            Some(e) => Err(e),
            None => {
                info!(job_id = %job_id, phase = %phase, round, "Round complete");
                Ok(steps)
            }
        }
    }

    async fn record(
        &self,
        job_id: Uuid,
        step: &Step,
        phase: Phase,
        round: u32,
        done: usize,
        total: usize,
    ) -> ConclaveResult<()> {
        self.store.append_step(job_id, step.clone()).await?;
        let progress = partial_progress(phase, round, done, total);
        self.store
            .update(job_id, JobPatch::progress(progress))
            .await?;
        Ok(())
    }
}
