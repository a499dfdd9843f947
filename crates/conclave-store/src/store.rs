use crate::job::{Job, JobPatch, StatusFilter, Step};
use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable keyed storage for jobs.
///
/// Scalar fields change through [`JobStore::update`]; steps only ever grow
/// through [`JobStore::append_step`]. Both are atomic per call, so concurrent
/// appends to the same job are never lost.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job.
    async fn create(&self, job: &Job) -> ConclaveResult<()>;

    /// Load a job with its full step log.
    async fn get(&self, id: Uuid) -> ConclaveResult<Option<Job>>;

    /// Apply `patch` atomically and return the updated job.
    ///
    /// Fails with `NotFound` for unknown ids and `InvalidState` when the
    /// patch would break a lifecycle invariant.
    async fn update(&self, id: Uuid, patch: JobPatch) -> ConclaveResult<Job>;

    /// Atomically append one step; returns the new step count.
    async fn append_step(&self, id: Uuid, step: Step) -> ConclaveResult<usize>;

    /// Jobs matching `filter`, most recently updated first.
    async fn list(&self, filter: Option<StatusFilter>, limit: usize) -> ConclaveResult<Vec<Job>>;

    /// Remove a job. Returns whether it existed.
    async fn delete(&self, id: Uuid) -> ConclaveResult<bool>;
}

pub(crate) fn not_found(id: Uuid) -> ConclaveError {
    ConclaveError::NotFound(format!("job {id}"))
}

pub(crate) fn newest_first(mut jobs: Vec<Job>, filter: Option<StatusFilter>, limit: usize) -> Vec<Job> {
    jobs.retain(|j| filter.map_or(true, |f| f.matches(j.status)));
    jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    jobs.truncate(limit);
    jobs
}

/// In-process store. Used by tests and short-lived CLI runs.
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> ConclaveResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.job_id) {
            return Err(ConclaveError::Store(format!(
                "job {} already exists",
                job.job_id
            )));
        }
        jobs.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> ConclaveResult<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, patch: JobPatch) -> ConclaveResult<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        job.apply(&patch)?;
        Ok(job.clone())
    }

    async fn append_step(&self, id: Uuid, step: Step) -> ConclaveResult<usize> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        job.push_step(step)?;
        Ok(job.steps.len())
    }

    async fn list(&self, filter: Option<StatusFilter>, limit: usize) -> ConclaveResult<Vec<Job>> {
        let jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        Ok(newest_first(jobs, filter, limit))
    }

    async fn delete(&self, id: Uuid) -> ConclaveResult<bool> {
        Ok(self.jobs.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, ParticipantRef, Phase, Subject};
    use std::sync::Arc;

    fn participants(n: usize) -> Vec<ParticipantRef> {
        (1..=n)
            .map(|i| ParticipantRef {
                agent_id: i.to_string(),
                name: format!("Agent {i}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryJobStore::new();
        let job = Job::new(Subject::single("600519"), participants(2), 1, 1);
        store.create(&job).await.unwrap();

        let loaded = store.get(job.job_id).await.unwrap().unwrap();
        assert_eq!(loaded.subject.ids, vec!["600519".to_string()]);
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = InMemoryJobStore::new();
        let job = Job::new(Subject::single("600519"), participants(2), 1, 1);
        store.create(&job).await.unwrap();
        assert!(store.create(&job).await.is_err());
    }

    #[tokio::test]
    async fn test_update_unknown_is_not_found() {
        let store = InMemoryJobStore::new();
        let err = store
            .update(Uuid::new_v4(), JobPatch::progress(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = Job::new(Subject::single("000001"), participants(16), 1, 0);
        store.create(&job).await.unwrap();
        store
            .update(job.job_id, JobPatch::status(JobStatus::Running))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for p in job.participants.clone() {
            let store = store.clone();
            let id = job.job_id;
            handles.push(tokio::spawn(async move {
                store
                    .append_step(id, Step::new(Phase::Analysis, 1, &p, "view"))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let loaded = store.get(job.job_id).await.unwrap().unwrap();
        assert_eq!(loaded.steps.len(), 16);
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let store = InMemoryJobStore::new();
        let a = Job::new(Subject::single("A"), participants(2), 1, 0);
        let b = Job::new(Subject::single("B"), participants(2), 1, 0);
        let c = Job::new(Subject::single("C"), participants(2), 1, 0);
        for j in [&a, &b, &c] {
            store.create(j).await.unwrap();
        }
        store
            .update(b.job_id, JobPatch::failed("bad agent"))
            .await
            .unwrap();
        store
            .update(c.job_id, JobPatch::status(JobStatus::Running))
            .await
            .unwrap();

        let active = store.list(Some(StatusFilter::Active), 50).await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|j| j.status.is_active()));

        let failed = store
            .list(Some(StatusFilter::Exactly(JobStatus::Failed)), 50)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job_id, b.job_id);

        let all = store.list(None, 2).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].updated_at >= all[1].updated_at);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryJobStore::new();
        let job = Job::new(Subject::single("600519"), participants(2), 1, 1);
        store.create(&job).await.unwrap();
        assert!(store.delete(job.job_id).await.unwrap());
        assert!(!store.delete(job.job_id).await.unwrap());
        assert!(store.get(job.job_id).await.unwrap().is_none());
    }
}
