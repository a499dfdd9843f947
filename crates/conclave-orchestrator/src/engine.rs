use crate::context::SubjectContextBuilder;
use crate::dispatcher::RoundDispatcher;
use crate::memory::MemoryAssembler;
use crate::monitor::ParticipantMonitor;
use crate::profiles::AgentDirectory;
use crate::synthesis::SynthesisStage;
use crate::types::{AgentProfile, OrchestratorConfig};
use conclave_agent::AgentInvoker;
use conclave_core::{ConclaveError, ConclaveResult};
use conclave_store::{Job, JobPatch, JobStatus, JobStore, Phase, Step};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Progress recorded once the job is running.
const STARTED_PROGRESS: u8 = 10;
/// Progress recorded once inputs are prepared.
const PREPARED_PROGRESS: u8 = 20;

/// Everything a job needs once its inputs are validated.
struct Prepared {
    job: Job,
    participants: Vec<AgentProfile>,
    context: String,
}

/// Drives one job from `queued` to a terminal status.
///
/// Flow: queued → running → analysis rounds → debate rounds → synthesis
/// (or decision) → completed. Cancellation is checked before every round and
/// before the final call; a round already in flight always finishes.
pub struct JobController {
    store: Arc<dyn JobStore>,
    directory: Arc<dyn AgentDirectory>,
    context_builder: Arc<dyn SubjectContextBuilder>,
    invoker: Arc<dyn AgentInvoker>,
    dispatcher: RoundDispatcher,
    memory: MemoryAssembler,
    synthesis: SynthesisStage,
}

impl JobController {
    /// Controller sharing `store`, `invoker` and `monitor` with its caller.
    pub fn new(
        store: Arc<dyn JobStore>,
        directory: Arc<dyn AgentDirectory>,
        context_builder: Arc<dyn SubjectContextBuilder>,
        invoker: Arc<dyn AgentInvoker>,
        monitor: Arc<ParticipantMonitor>,
        synthesizer: AgentProfile,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            dispatcher: RoundDispatcher::new(
                store.clone(),
                invoker.clone(),
                monitor,
                config.max_workers,
            ),
            memory: MemoryAssembler::new(config.memory_depth, config.history_window_factor),
            synthesis: SynthesisStage::new(invoker.clone(), synthesizer, config),
            store,
            directory,
            context_builder,
            invoker,
        }
    }

    /// Run the job to completion. Returns its terminal status.
    ///
    /// A job that is no longer `queued` (for example canceled before it was
    /// picked up) is left untouched.
    pub async fn run(&self, job_id: Uuid, cancel: CancellationToken) -> ConclaveResult<JobStatus> {
        match self
            .store
            .update(
                job_id,
                JobPatch {
                    status: Some(JobStatus::Running),
                    progress: Some(STARTED_PROGRESS),
                    ..JobPatch::default()
                },
            )
            .await
        {
            Ok(_) => {}
            Err(ConclaveError::InvalidState(reason)) => {
                info!(job_id = %job_id, reason = %reason, "Job not started");
                let job = self
                    .store
                    .get(job_id)
                    .await?
                    .ok_or_else(|| ConclaveError::NotFound(format!("job {job_id}")))?;
                return Ok(job.status);
            }
            Err(e) => return Err(e),
        }
        info!(job_id = %job_id, "Job started");

        match self.drive(job_id, &cancel).await {
            Ok(status) => Ok(status),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Job failed");
                self.store
                    .update(job_id, JobPatch::failed(e.to_string()))
                    .await?;
                Ok(JobStatus::Failed)
            }
        }
    }

    async fn drive(&self, job_id: Uuid, cancel: &CancellationToken) -> ConclaveResult<JobStatus> {
        let Prepared {
            job,
            participants,
            context,
        } = self.prepare(job_id).await?;
        self.store
            .update(job_id, JobPatch::progress(PREPARED_PROGRESS))
            .await?;

        for round in 1..=job.analysis_rounds {
            if self.cancel_requested(job_id, cancel).await? {
                return self.finish_canceled(job_id).await;
            }
            let steps = self.current_steps(job_id).await?;
            self.dispatcher
                .run_round(job_id, Phase::Analysis, round, &participants, |agent| {
                    self.memory
                        .analysis_prompt(agent, &job.subject, &context, &steps, round)
                })
                .await?;
        }

        for round in 1..=job.debate_rounds {
            if self.cancel_requested(job_id, cancel).await? {
                return self.finish_canceled(job_id).await;
            }
            let steps = self.current_steps(job_id).await?;
            self.dispatcher
                .run_round(job_id, Phase::Debate, round, &participants, |agent| {
                    self.memory
                        .debate_prompt(agent, &job.subject, &participants, &steps, round)
                })
                .await?;
        }

        if self.cancel_requested(job_id, cancel).await? {
            return self.finish_canceled(job_id).await;
        }

        let steps = self.current_steps(job_id).await?;
        let report = if job.subject.is_multi_candidate() {
            let (decision, step) = self.synthesis.decide(job_id, &job.subject, &steps).await;
            self.store.append_step(job_id, step).await?;
            decision.content
        } else {
            self.synthesis
                .synthesize(job_id, &job.subject, &steps)
                .await
        };

        self.store
            .update(job_id, JobPatch::completed(report))
            .await?;
        info!(job_id = %job_id, "Job completed");
        Ok(JobStatus::Completed)
    }

    /// Resolve participants, check the synthesizer's credentials and build
    /// the subject context. Any failure here is a setup error.
    async fn prepare(&self, job_id: Uuid) -> ConclaveResult<Prepared> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| ConclaveError::NotFound(format!("job {job_id}")))?;

        let mut participants = Vec::with_capacity(job.participants.len());
        for reference in &job.participants {
            let profile = self.directory.get(&reference.agent_id).ok_or_else(|| {
                ConclaveError::Setup(format!("unknown agent '{}'", reference.agent_id))
            })?;
            if !profile.is_usable() {
                return Err(ConclaveError::Setup(format!(
                    "agent '{}' ({}) is disabled or has no prompt",
                    profile.id, profile.name
                )));
            }
            participants.push(profile);
        }

        let synthesizer = self.synthesis.synthesizer();
        self.invoker
            .ensure_ready(&synthesizer.binding())
            .map_err(|e| ConclaveError::Setup(format!("synthesizer unavailable: {e}")))?;

        let context = self
            .context_builder
            .build_context(&job.subject)
            .await
            .map_err(|e| {
                if e.is_setup() {
                    e
                } else {
                    ConclaveError::Setup(format!("context build failed: {e}"))
                }
            })?;

        Ok(Prepared {
            job,
            participants,
            context,
        })
    }

    async fn current_steps(&self, job_id: Uuid) -> ConclaveResult<Vec<Step>> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| ConclaveError::NotFound(format!("job {job_id}")))?;
        Ok(job.steps)
    }

    /// Token first; the persisted flag covers cancels issued elsewhere.
    async fn cancel_requested(&self, job_id: Uuid, cancel: &CancellationToken) -> ConclaveResult<bool> {
        if cancel.is_cancelled() {
            return Ok(true);
        }
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| ConclaveError::NotFound(format!("job {job_id}")))?;
        Ok(job.cancel_requested)
    }

    async fn finish_canceled(&self, job_id: Uuid) -> ConclaveResult<JobStatus> {
        warn!(job_id = %job_id, "Job canceled");
        self.store
            .update(job_id, JobPatch::status(JobStatus::Canceled))
            .await?;
        Ok(JobStatus::Canceled)
    }
}
