use crate::job::{Job, JobPatch, StatusFilter, Step};
use crate::store::{newest_first, not_found, JobStore};
use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult};
use fs4::fs_std::FileExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// File-based job store.
///
/// Each job is two files: `<id>.json` holds the scalar record (with an empty
/// step list) and `<id>.steps.jsonl` is the append-only step log. Every
/// read-modify-write runs under the store's async lock and then an exclusive
/// OS lock on `<id>.lock`, so handles in other processes (a `cancel` from a
/// second CLI, say) are serialised against the process running the job.
pub struct FileJobStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJobStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn new(dir: PathBuf) -> ConclaveResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn steps_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.steps.jsonl"))
    }

    fn lock_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.lock"))
    }

    /// Block (off the runtime) until this handle owns the job's lock file.
    async fn lock_job(&self, id: Uuid) -> ConclaveResult<JobLock> {
        let path = self.lock_path(id);
        tokio::task::spawn_blocking(move || -> std::io::Result<JobLock> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(JobLock { _file: file })
        })
        .await
        .map_err(|e| ConclaveError::Store(format!("Lock task for job {id} failed: {e}")))?
        .map_err(ConclaveError::from)
    }

    async fn read_record(&self, id: Uuid) -> ConclaveResult<Option<Job>> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let job: Job = serde_json::from_str(&data)
            .map_err(|e| ConclaveError::Store(format!("Failed to parse job {id}: {e}")))?;
        Ok(Some(job))
    }

    async fn read_steps(&self, id: Uuid) -> ConclaveResult<Vec<Step>> {
        let path = self.steps_path(id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let mut steps = Vec::new();
        for line in data.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<Step>(line) {
                Ok(step) => steps.push(step),
                // A torn final line from a crashed writer; everything before it is intact.
                Err(e) => warn!(job_id = %id, error = %e, "Skipping unreadable step line"),
            }
        }
        Ok(steps)
    }

    async fn load(&self, id: Uuid) -> ConclaveResult<Option<Job>> {
        let Some(mut job) = self.read_record(id).await? else {
            return Ok(None);
        };
        job.steps = self.read_steps(id).await?;
        Ok(Some(job))
    }

    async fn write_record(&self, job: &Job) -> ConclaveResult<()> {
        let mut record = job.clone();
        record.steps.clear();
        let json = serde_json::to_string_pretty(&record)?;
        write_atomically(&self.record_path(job.job_id), json.as_bytes()).await
    }
}

/// Exclusive OS lock on a job, released when the file handle closes.
struct JobLock {
    _file: std::fs::File,
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> ConclaveResult<()> {
    let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create(&self, job: &Job) -> ConclaveResult<()> {
        let _guard = self.write_lock.lock().await;
        let _lock = self.lock_job(job.job_id).await?;
        if self.record_path(job.job_id).exists() {
            return Err(ConclaveError::Store(format!(
                "job {} already exists",
                job.job_id
            )));
        }
        self.write_record(job).await?;
        for step in &job.steps {
            append_line(&self.steps_path(job.job_id), step).await?;
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> ConclaveResult<Option<Job>> {
        self.load(id).await
    }

    async fn update(&self, id: Uuid, patch: JobPatch) -> ConclaveResult<Job> {
        let _guard = self.write_lock.lock().await;
        let _lock = self.lock_job(id).await?;
        let mut job = self.load(id).await?.ok_or_else(|| not_found(id))?;
        job.apply(&patch)?;
        self.write_record(&job).await?;
        Ok(job)
    }

    async fn append_step(&self, id: Uuid, step: Step) -> ConclaveResult<usize> {
        let _guard = self.write_lock.lock().await;
        let _lock = self.lock_job(id).await?;
        let mut job = self.load(id).await?.ok_or_else(|| not_found(id))?;
        job.push_step(step.clone())?;
        append_line(&self.steps_path(id), &step).await?;
        self.write_record(&job).await?;
        Ok(job.steps.len())
    }

    async fn list(&self, filter: Option<StatusFilter>, limit: usize) -> ConclaveResult<Vec<Job>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            let Ok(id) = Uuid::parse_str(stem) else {
                continue;
            };
            if let Some(job) = self.load(id).await? {
                jobs.push(job);
            }
        }
        Ok(newest_first(jobs, filter, limit))
    }

    async fn delete(&self, id: Uuid) -> ConclaveResult<bool> {
        let _guard = self.write_lock.lock().await;
        let record = self.record_path(id);
        if !record.exists() {
            return Ok(false);
        }
        let lock = self.lock_job(id).await?;
        if !record.exists() {
            return Ok(false);
        }
        tokio::fs::remove_file(record).await?;
        let steps = self.steps_path(id);
        if steps.exists() {
            tokio::fs::remove_file(steps).await?;
        }
        drop(lock);
        tokio::fs::remove_file(self.lock_path(id)).await.ok();
        Ok(true)
    }
}

async fn append_line(path: &Path, step: &Step) -> ConclaveResult<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let mut line = serde_json::to_string(step)?;
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
