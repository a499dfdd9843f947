use chrono::{DateTime, Utc};
use conclave_core::{ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Persisted, not yet picked up.
    Queued,
    /// Rounds are being dispatched.
    Running,
    /// Finished with a report.
    Completed,
    /// Aborted by a setup error.
    Failed,
    /// Stopped by a cancellation request.
    Canceled,
}

impl JobStatus {
    /// Terminal states never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Queued or running.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether moving from `self` to `next` respects the lifecycle order.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running) => true,
            (JobStatus::Queued | JobStatus::Running, n) => n.is_terminal(),
            _ => false,
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    /// Parse a lowercase status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "canceled" | "cancelled" => Some(JobStatus::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter accepted by `JobStore::list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    /// Queued or running.
    Active,
    /// Exactly this status.
    Exactly(JobStatus),
}

impl StatusFilter {
    /// `"active"` or any status name.
    pub fn parse(s: &str) -> ConclaveResult<Self> {
        if s.trim().eq_ignore_ascii_case("active") {
            return Ok(StatusFilter::Active);
        }
        JobStatus::parse(s)
            .map(StatusFilter::Exactly)
            .ok_or_else(|| ConclaveError::Config(format!("Unknown status filter '{s}'")))
    }

    /// Whether `status` passes this filter.
    pub fn matches(&self, status: JobStatus) -> bool {
        match self {
            StatusFilter::Active => status.is_active(),
            StatusFilter::Exactly(s) => *s == status,
        }
    }
}

/// Phase a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Independent analysis rounds.
    Analysis,
    /// Cross-critique rounds.
    Debate,
    /// Final forced-choice decision (multi-candidate jobs).
    Decision,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Analysis => write!(f, "analysis"),
            Phase::Debate => write!(f, "debate"),
            Phase::Decision => write!(f, "decision"),
        }
    }
}

/// Whether a job analyses one subject or chooses among candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectMode {
    /// One subject, free-form synthesized report.
    #[default]
    Single,
    /// Several candidates, forced-choice decision at the end.
    MultiCandidate,
}

/// What a job is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Subject identifiers, in the order given by the caller.
    pub ids: Vec<String>,
    /// Human-readable name (defaults to the joined ids).
    pub name: String,
    /// Single or multi-candidate.
    #[serde(default)]
    pub mode: SubjectMode,
}

impl Subject {
    /// A single-subject job.
    pub fn single(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            ids: vec![id],
            mode: SubjectMode::Single,
        }
    }

    /// A forced-choice job over `ids`.
    pub fn candidates<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        Self {
            name: ids.join(" vs "),
            ids,
            mode: SubjectMode::MultiCandidate,
        }
    }

    /// Override the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Whether this is a forced-choice job.
    pub fn is_multi_candidate(&self) -> bool {
        self.mode == SubjectMode::MultiCandidate
    }
}

/// Reference to an agent taking part in a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRef {
    /// Stable agent identity.
    pub agent_id: String,
    /// Display name at the time the job was created.
    pub name: String,
}

/// One immutable record of one participant's output in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Phase of the round.
    pub phase: Phase,
    /// 1-based round number within the phase.
    pub round: u32,
    /// Agent that produced this step.
    pub agent_id: String,
    /// Agent display name.
    pub agent_name: String,
    /// Generated text, or an `[ERROR] ...` line if the invocation failed.
    pub content: String,
    /// When the invocation settled.
    pub timestamp: DateTime<Utc>,
}

impl Step {
    /// Build a step stamped with the current time.
    pub fn new(
        phase: Phase,
        round: u32,
        participant: &ParticipantRef,
        content: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            round,
            agent_id: participant.agent_id.clone(),
            agent_name: participant.name.clone(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether the step records a failed invocation.
    pub fn is_error(&self) -> bool {
        self.content.starts_with(ERROR_PREFIX)
    }
}

/// Prefix of step content produced by a failed invocation.
pub const ERROR_PREFIX: &str = "[ERROR]";

/// A unit of orchestrated work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique key.
    pub job_id: Uuid,
    /// What the job is about.
    pub subject: Subject,
    /// Ordered participants; size fixed for the job's lifetime.
    pub participants: Vec<ParticipantRef>,
    /// Number of analysis rounds.
    pub analysis_rounds: u32,
    /// Number of debate rounds.
    pub debate_rounds: u32,
    /// Lifecycle status.
    pub status: JobStatus,
    /// 0–100, never decreases.
    pub progress: u8,
    /// Append-only step log.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Final report, empty until synthesis or fallback.
    #[serde(default)]
    pub report: String,
    /// Setup error if the job failed, or why it was force-canceled.
    #[serde(default)]
    pub error: Option<String>,
    /// Set once a cancellation has been requested.
    #[serde(default)]
    pub cancel_requested: bool,
    /// Free-form metadata supplied at creation.
    #[serde(default)]
    pub meta: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time, advances on every write.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a `queued` job.
    pub fn new(
        subject: Subject,
        participants: Vec<ParticipantRef>,
        analysis_rounds: u32,
        debate_rounds: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            subject,
            participants,
            analysis_rounds,
            debate_rounds,
            status: JobStatus::Queued,
            progress: 0,
            steps: Vec::new(),
            report: String::new(),
            error: None,
            cancel_requested: false,
            meta: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach metadata.
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    /// Apply a patch, enforcing the lifecycle invariants.
    ///
    /// Either the whole patch applies or nothing does.
    pub fn apply(&mut self, patch: &JobPatch) -> ConclaveResult<()> {
        if patch.cancel && self.status.is_terminal() {
            return Err(ConclaveError::InvalidState(format!(
                "job {} is already {}",
                self.job_id, self.status
            )));
        }

        let mut next_status = self.status;
        if patch.cancel && self.status == JobStatus::Queued {
            next_status = JobStatus::Canceled;
        }
        if let Some(status) = patch.status {
            if status != next_status {
                if !next_status.can_transition_to(status) {
                    return Err(ConclaveError::InvalidState(format!(
                        "job {} cannot move from {} to {}",
                        self.job_id, next_status, status
                    )));
                }
                next_status = status;
            }
        }

        self.status = next_status;
        if patch.cancel {
            self.cancel_requested = true;
        }
        if let Some(progress) = patch.progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if let Some(report) = &patch.report {
            self.report.clone_from(report);
        }
        if let Some(error) = &patch.error {
            self.error = Some(error.clone());
        }
        self.touch();
        Ok(())
    }

    /// Append a step. Terminal jobs accept no further steps.
    pub fn push_step(&mut self, step: Step) -> ConclaveResult<()> {
        if self.status.is_terminal() {
            return Err(ConclaveError::InvalidState(format!(
                "job {} is {}; step from {} rejected",
                self.job_id, self.status, step.agent_id
            )));
        }
        self.steps.push(step);
        self.touch();
        Ok(())
    }

    /// Advance `updated_at`, never moving it backwards.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }

    /// Steps of one phase.
    pub fn steps_in(&self, phase: Phase) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(move |s| s.phase == phase)
    }
}

/// Partial update of a job's scalar fields.
///
/// Steps are never written through a patch; see `JobStore::append_step`.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    /// New status; must be a legal transition.
    pub status: Option<JobStatus>,
    /// Candidate progress; merged with `max`.
    pub progress: Option<u8>,
    /// Replacement report.
    pub report: Option<String>,
    /// Error text.
    pub error: Option<String>,
    /// Request cancellation. Rejected on terminal jobs; a queued job goes
    /// straight to `canceled`.
    pub cancel: bool,
}

impl JobPatch {
    /// Patch that only changes status.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Patch that only proposes a progress value.
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    /// Cancellation request.
    pub fn cancel() -> Self {
        Self {
            cancel: true,
            ..Self::default()
        }
    }

    /// Cancel a job that no live task will ever stop: straight to `canceled`,
    /// with `reason` kept in `error`. Rejected on terminal jobs.
    pub fn force_cancel(reason: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Canceled),
            error: Some(reason.into()),
            cancel: true,
            ..Self::default()
        }
    }

    /// Terminal failure with an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Successful completion with a report.
    pub fn completed(report: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            report: Some(report.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn participants() -> Vec<ParticipantRef> {
        vec![
            ParticipantRef {
                agent_id: "1".into(),
                name: "Technical".into(),
            },
            ParticipantRef {
                agent_id: "2".into(),
                name: "Capital Flow".into(),
            },
        ]
    }

    fn job() -> Job {
        Job::new(Subject::single("600519"), participants(), 2, 1)
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert!(job.steps.is_empty());
        assert!(job.report.is_empty());
        assert!(!job.cancel_requested);
    }

    #[test]
    fn test_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Canceled));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Canceled.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut job = job();
        job.apply(&JobPatch::status(JobStatus::Running)).unwrap();
        job.apply(&JobPatch::completed("report")).unwrap();
        let err = job.apply(&JobPatch::failed("late")).unwrap_err();
        assert!(matches!(err, ConclaveError::InvalidState(_)));
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
    }

    #[test]
    fn test_rejected_patch_changes_nothing() {
        let mut job = job();
        let before = job.updated_at;
        let patch = JobPatch {
            status: Some(JobStatus::Queued),
            progress: Some(50),
            ..JobPatch::default()
        };
        job.apply(&JobPatch::status(JobStatus::Running)).unwrap();
        job.apply(&JobPatch::completed("r")).unwrap();
        assert!(job.apply(&patch).is_err());
        assert_eq!(job.progress, 100);
        assert!(job.updated_at >= before);
    }

    #[test]
    fn test_force_cancel_ends_running_job() {
        let mut job = job();
        job.apply(&JobPatch::status(JobStatus::Running)).unwrap();
        job.apply(&JobPatch::progress(40)).unwrap();
        job.apply(&JobPatch::force_cancel("runner gone")).unwrap();
        assert_eq!(job.status, JobStatus::Canceled);
        assert!(job.cancel_requested);
        assert_eq!(job.error.as_deref(), Some("runner gone"));
        assert_eq!(job.progress, 40);

        let err = job.apply(&JobPatch::force_cancel("again")).unwrap_err();
        assert!(matches!(err, ConclaveError::InvalidState(_)));
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = job();
        job.apply(&JobPatch::progress(40)).unwrap();
        job.apply(&JobPatch::progress(30)).unwrap();
        assert_eq!(job.progress, 40);
        job.apply(&JobPatch::progress(250)).unwrap();
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_cancel_queued_goes_terminal() {
        let mut job = job();
        job.apply(&JobPatch::cancel()).unwrap();
        assert!(job.cancel_requested);
        assert_eq!(job.status, JobStatus::Canceled);
    }

    #[test]
    fn test_cancel_running_only_sets_flag() {
        let mut job = job();
        job.apply(&JobPatch::status(JobStatus::Running)).unwrap();
        job.apply(&JobPatch::cancel()).unwrap();
        assert!(job.cancel_requested);
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_cancel_terminal_rejected() {
        let mut job = job();
        job.apply(&JobPatch::failed("agent 9 disabled")).unwrap();
        let err = job.apply(&JobPatch::cancel()).unwrap_err();
        assert!(matches!(err, ConclaveError::InvalidState(_)));
        assert!(!job.cancel_requested);
    }

    #[test]
    fn test_push_step_rejected_after_terminal() {
        let mut job = job();
        let p = job.participants[0].clone();
        job.apply(&JobPatch::status(JobStatus::Running)).unwrap();
        job.push_step(Step::new(Phase::Analysis, 1, &p, "ok")).unwrap();
        job.apply(&JobPatch::status(JobStatus::Canceled)).unwrap();
        assert!(job.push_step(Step::new(Phase::Analysis, 2, &p, "late")).is_err());
        assert_eq!(job.steps.len(), 1);
    }

    #[test]
    fn test_status_filter() {
        let active = StatusFilter::parse("active").unwrap();
        assert!(active.matches(JobStatus::Queued));
        assert!(active.matches(JobStatus::Running));
        assert!(!active.matches(JobStatus::Completed));

        let failed = StatusFilter::parse("failed").unwrap();
        assert!(failed.matches(JobStatus::Failed));
        assert!(!failed.matches(JobStatus::Canceled));

        assert!(StatusFilter::parse("paused").is_err());
    }

    #[test]
    fn test_step_error_detection() {
        let p = &participants()[0];
        let ok = Step::new(Phase::Debate, 1, p, "rebuttal");
        let bad = Step::new(Phase::Debate, 1, p, "[ERROR] Technical debate failed: 429");
        assert!(!ok.is_error());
        assert!(bad.is_error());
    }

    #[test]
    fn test_job_serialization() {
        let job = job().with_meta(serde_json::json!({"source": "watchlist"}));
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"queued\""));
        let parsed: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.job_id, job.job_id);
        assert_eq!(parsed.meta["source"], "watchlist");
    }

    #[test]
    fn test_candidates_subject() {
        let subject = Subject::candidates(["600519", "000858"]);
        assert!(subject.is_multi_candidate());
        assert_eq!(subject.name, "600519 vs 000858");
    }
}
