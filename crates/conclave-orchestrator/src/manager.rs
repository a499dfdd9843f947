use crate::context::SubjectContextBuilder;
use crate::engine::JobController;
use crate::monitor::ParticipantMonitor;
use crate::profiles::AgentDirectory;
use crate::types::{AgentProfile, JobRequest, OrchestratorConfig};
use conclave_agent::AgentInvoker;
use conclave_core::{ConclaveError, ConclaveResult};
use conclave_store::{Job, JobPatch, JobStore, ParticipantRef, StatusFilter};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Error text recorded on a force-canceled job.
pub const FORCE_CANCEL_REASON: &str = "force-canceled: no live task was running the job";

struct RunningJob {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Entry point for creating, observing, canceling and deleting jobs.
///
/// Each job runs on its own tokio task. Callers observe progress by polling
/// [`JobManager::get_job_status`] or await the end with [`JobManager::wait`].
pub struct JobManager {
    store: Arc<dyn JobStore>,
    directory: Arc<dyn AgentDirectory>,
    controller: Arc<JobController>,
    monitor: Arc<ParticipantMonitor>,
    default_list_limit: usize,
    running: Mutex<HashMap<Uuid, RunningJob>>,
}

impl JobManager {
    /// Manager with a fresh [`ParticipantMonitor`] and no running jobs.
    pub fn new(
        store: Arc<dyn JobStore>,
        directory: Arc<dyn AgentDirectory>,
        context_builder: Arc<dyn SubjectContextBuilder>,
        invoker: Arc<dyn AgentInvoker>,
        synthesizer: AgentProfile,
        config: OrchestratorConfig,
    ) -> Self {
        let monitor = Arc::new(ParticipantMonitor::new());
        let controller = Arc::new(JobController::new(
            store.clone(),
            directory.clone(),
            context_builder,
            invoker,
            monitor.clone(),
            synthesizer,
            &config,
        ));
        Self {
            store,
            directory,
            controller,
            monitor,
            default_list_limit: config.default_list_limit,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Invocation counters of all participants.
    pub fn monitor(&self) -> &ParticipantMonitor {
        &self.monitor
    }

    /// Validate the request, persist a queued job and start it.
    ///
    /// Participant usability is checked when the job starts; an unknown or
    /// disabled agent fails the job rather than the request.
    pub async fn create_job(&self, request: JobRequest) -> ConclaveResult<Uuid> {
        validate(&request)?;

        let participants: Vec<ParticipantRef> = request
            .participant_ids
            .iter()
            .map(|id| match self.directory.get(id) {
                Some(profile) => profile.participant_ref(),
                None => ParticipantRef {
                    agent_id: id.clone(),
                    name: id.clone(),
                },
            })
            .collect();
        let job = Job::new(
            request.subject,
            participants,
            request.analysis_rounds,
            request.debate_rounds,
        )
        .with_meta(request.meta);
        let job_id = job.job_id;
        self.store.create(&job).await?;
        info!(
            job_id = %job_id,
            subject = %job.subject.name,
            participants = job.participants.len(),
            analysis_rounds = job.analysis_rounds,
            debate_rounds = job.debate_rounds,
            "Job created"
        );

        let token = CancellationToken::new();
        let controller = self.controller.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = controller.run(job_id, task_token).await {
                error!(job_id = %job_id, error = %e, "Job task ended with an error");
            }
        });

        let mut running = self.running.lock();
        running.retain(|_, job| !job.handle.is_finished());
        running.insert(job_id, RunningJob { token, handle });
        Ok(job_id)
    }

    /// Current snapshot of a job.
    pub async fn get_job_status(&self, job_id: Uuid) -> ConclaveResult<Job> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| ConclaveError::NotFound(format!("job {job_id}")))
    }

    /// Jobs matching `status_filter` (`"active"` or a status name), most
    /// recently updated first.
    pub async fn list_jobs(&self, status_filter: Option<&str>, limit: Option<usize>) -> ConclaveResult<Vec<Job>> {
        let filter = status_filter.map(StatusFilter::parse).transpose()?;
        self.store
            .list(filter, limit.unwrap_or(self.default_list_limit))
            .await
    }

    /// Ask a job to stop at its next round boundary.
    ///
    /// A queued job is canceled at once. Terminal jobs are rejected.
    pub async fn request_cancel(&self, job_id: Uuid) -> ConclaveResult<Job> {
        let job = self.store.update(job_id, JobPatch::cancel()).await?;
        if let Some(running) = self.running.lock().get(&job_id) {
            running.token.cancel();
        }
        info!(job_id = %job_id, status = %job.status, "Cancellation requested");
        Ok(job)
    }

    /// Move an active job straight to `canceled` when no task will ever
    /// honour its flag, for example after the `conclave run` process that
    /// owned it exited mid-job.
    ///
    /// Jobs still running on this manager are rejected; use
    /// [`JobManager::request_cancel`] for those.
    pub async fn force_cancel(&self, job_id: Uuid) -> ConclaveResult<Job> {
        let owned = self
            .running
            .lock()
            .get(&job_id)
            .is_some_and(|running| !running.handle.is_finished());
        if owned {
            return Err(ConclaveError::InvalidState(format!(
                "job {job_id} is running in this process; request a cancel instead"
            )));
        }
        let job = self
            .store
            .update(job_id, JobPatch::force_cancel(FORCE_CANCEL_REASON))
            .await?;
        warn!(job_id = %job_id, progress = job.progress, "Job force-canceled");
        Ok(job)
    }

    /// Remove a terminal job.
    pub async fn delete_job(&self, job_id: Uuid) -> ConclaveResult<()> {
        let job = self.get_job_status(job_id).await?;
        if job.status.is_active() {
            return Err(ConclaveError::InvalidState(format!(
                "job {job_id} is {}; cancel it before deleting",
                job.status
            )));
        }
        if !self.store.delete(job_id).await? {
            return Err(ConclaveError::NotFound(format!("job {job_id}")));
        }
        self.running.lock().remove(&job_id);
        info!(job_id = %job_id, "Job deleted");
        Ok(())
    }

    /// Wait for the job's task to finish and return the final snapshot.
    ///
    /// For jobs not started by this manager the current snapshot is returned.
    pub async fn wait(&self, job_id: Uuid) -> ConclaveResult<Job> {
        let handle = self.running.lock().remove(&job_id).map(|r| r.handle);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(job_id = %job_id, error = %e, "Job task panicked");
            }
        }
        self.get_job_status(job_id).await
    }
}

fn validate(request: &JobRequest) -> ConclaveResult<()> {
    if request.participant_ids.len() < 2 {
        return Err(ConclaveError::Setup(format!(
            "at least 2 participants are required, got {}",
            request.participant_ids.len()
        )));
    }
    let mut seen = HashSet::new();
    for id in &request.participant_ids {
        if id.trim().is_empty() {
            return Err(ConclaveError::Setup("empty participant id".into()));
        }
        if !seen.insert(id.as_str()) {
            return Err(ConclaveError::Setup(format!("participant '{id}' listed twice")));
        }
    }

    let subject = &request.subject;
    if subject.ids.is_empty() || subject.ids.iter().any(|id| id.trim().is_empty()) {
        return Err(ConclaveError::Setup("subject id is required".into()));
    }
    if subject.is_multi_candidate() {
        let distinct: HashSet<&str> = subject.ids.iter().map(String::as_str).collect();
        if distinct.len() < 2 {
            return Err(ConclaveError::Setup(
                "a decision job needs at least 2 distinct candidates".into(),
            ));
        }
    } else if subject.ids.len() != 1 {
        return Err(ConclaveError::Setup(format!(
            "a single-subject job takes exactly 1 subject id, got {}",
            subject.ids.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conclave_store::{Subject, SubjectMode};

    fn request(ids: &[&str], subject: Subject) -> JobRequest {
        JobRequest::new(subject, ids.iter().map(|s| s.to_string()).collect(), 1, 1)
    }

    #[test]
    fn test_validate_participant_count() {
        let err = validate(&request(&["technical"], Subject::single("X"))).unwrap_err();
        assert!(err.is_setup());
        assert!(validate(&request(&["technical", "bearish"], Subject::single("X"))).is_ok());
    }

    #[test]
    fn test_validate_duplicates() {
        let err = validate(&request(&["a", "a"], Subject::single("X"))).unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn test_validate_candidates() {
        let one = Subject {
            ids: vec!["A".into()],
            name: "A".into(),
            mode: SubjectMode::MultiCandidate,
        };
        assert!(validate(&request(&["a", "b"], one)).is_err());
        let same = Subject::candidates(["A", "A"]);
        assert!(validate(&request(&["a", "b"], same)).is_err());
        assert!(validate(&request(&["a", "b"], Subject::candidates(["A", "B"]))).is_ok());
    }

    #[test]
    fn test_validate_single_subject_shape() {
        let two = Subject {
            ids: vec!["A".into(), "B".into()],
            name: "A".into(),
            mode: SubjectMode::Single,
        };
        assert!(validate(&request(&["a", "b"], two)).is_err());
        assert!(validate(&request(&["a", "b"], Subject::single(" "))).is_err());
    }
}
