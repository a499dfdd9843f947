use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult};
use conclave_store::Subject;
use std::path::PathBuf;
use tracing::debug;

/// Produces the data document every participant analyses.
///
/// Called once per job, before the first round. An error here fails the job.
#[async_trait]
pub trait SubjectContextBuilder: Send + Sync {
    /// Build the context text for `subject`.
    async fn build_context(&self, subject: &Subject) -> ConclaveResult<String>;
}

/// Returns the same text for every subject.
pub struct StaticContextBuilder {
    text: String,
}

impl StaticContextBuilder {
    /// Builder answering with `text`.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl SubjectContextBuilder for StaticContextBuilder {
    async fn build_context(&self, _subject: &Subject) -> ConclaveResult<String> {
        Ok(self.text.clone())
    }
}

/// Reads `<dir>/<id>.md` (or `.txt`) for each subject id.
///
/// Several ids are joined under `## <id>` headings, in request order.
pub struct FileContextBuilder {
    dir: PathBuf,
}

impl FileContextBuilder {
    /// Builder reading from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn read_one(&self, id: &str) -> ConclaveResult<String> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(ConclaveError::Setup(format!("invalid subject id '{id}'")));
        }
        for ext in ["md", "txt"] {
            let path = self.dir.join(format!("{id}.{ext}"));
            if tokio::fs::try_exists(&path).await? {
                debug!(path = %path.display(), "Reading subject context");
                return Ok(tokio::fs::read_to_string(&path).await?);
            }
        }
        Err(ConclaveError::Setup(format!(
            "no context file for subject '{id}' in {}",
            self.dir.display()
        )))
    }
}

#[async_trait]
impl SubjectContextBuilder for FileContextBuilder {
    async fn build_context(&self, subject: &Subject) -> ConclaveResult<String> {
        if let [only] = subject.ids.as_slice() {
            return self.read_one(only).await;
        }
        let mut sections = Vec::with_capacity(subject.ids.len());
        for id in &subject.ids {
            let body = self.read_one(id).await?;
            sections.push(format!("## {id}\n\n{}", body.trim_end()));
        }
        Ok(sections.join("\n\n"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_static_builder() {
        let b = StaticContextBuilder::new("price 10.0");
        let text = b.build_context(&Subject::single("X")).await.unwrap();
        assert_eq!(text, "price 10.0");
    }

    #[tokio::test]
    async fn test_file_builder_single_and_fallback_extension() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("600519.txt"), "close 1700").unwrap();
        let b = FileContextBuilder::new(tmp.path());
        let text = b.build_context(&Subject::single("600519")).await.unwrap();
        assert_eq!(text, "close 1700");
    }

    #[tokio::test]
    async fn test_file_builder_joins_candidates() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("A.md"), "alpha data\n").unwrap();
        std::fs::write(tmp.path().join("B.md"), "beta data").unwrap();
        let b = FileContextBuilder::new(tmp.path());
        let text = b
            .build_context(&Subject::candidates(["A", "B"]))
            .await
            .unwrap();
        assert_eq!(text, "## A\n\nalpha data\n\n## B\n\nbeta data");
    }

    #[tokio::test]
    async fn test_file_builder_missing_is_setup_error() {
        let tmp = TempDir::new().unwrap();
        let b = FileContextBuilder::new(tmp.path());
        let err = b.build_context(&Subject::single("nope")).await.unwrap_err();
        assert!(err.is_setup());
    }

    #[tokio::test]
    async fn test_file_builder_rejects_path_traversal() {
        let tmp = TempDir::new().unwrap();
        let b = FileContextBuilder::new(tmp.path());
        let err = b
            .build_context(&Subject::single("../secret"))
            .await
            .unwrap_err();
        assert!(err.is_setup());
    }
}
