use pl_types::{Job, JobError, PlResult};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;

/// Writes one JSON snapshot per job to `<dir>/<job_id>.json`.
///
/// Each write lands in a uniquely named hidden file first and is renamed over
/// the snapshot, so a reader sees either the previous or the new state.
#[derive(Debug, Clone)]
pub struct StatusPersister {
    dir: PathBuf,
}

impl StatusPersister {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.status_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    pub async fn ensure_dir(&self) -> PlResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Overwrite the snapshot for `job` with its current state.
    pub async fn persist(&self, job: &Job) -> PlResult<()> {
        let persist_error = |message: String| JobError::Persist {
            job_id: job.id.clone(),
            message,
        };

        let body = serde_json::to_vec_pretty(job).map_err(|e| persist_error(e.to_string()))?;
        let path = self.snapshot_path(&job.id);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", job.id, Uuid::new_v4().simple()));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| persist_error(e.to_string()))?;
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| persist_error(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| persist_error(e.to_string()))?;

        debug!(job_id = %job.id, status = ?job.status, path = %path.display(), "status snapshot written");
        Ok(())
    }

    /// Read back one snapshot. Unknown or malformed ids yield `None`.
    pub async fn load(&self, job_id: &str) -> PlResult<Option<Job>> {
        if !is_valid_job_id(job_id) {
            return Ok(None);
        }
        let path = self.snapshot_path(job_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => parse_snapshot(&path, &bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every readable snapshot in the directory. Unparseable files are
    /// skipped with a warning.
    pub async fn load_all(&self) -> PlResult<Vec<Job>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_snapshot = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_snapshot {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable snapshot");
                    continue;
                }
            };
            match parse_snapshot(&path, &bytes) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable snapshot"),
            }
        }
        Ok(jobs)
    }
}

fn parse_snapshot(path: &Path, bytes: &[u8]) -> PlResult<Job> {
    serde_json::from_slice(bytes).map_err(|e| {
        JobError::InvalidSnapshot {
            path: path.display().to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pl_types::{
        HyperparameterConfig, IntRange, JobRequest, JobStatus, LearningRateRange, PlError,
    };

    fn sample_job() -> Job {
        let config = HyperparameterConfig::new(
            LearningRateRange {
                min: 0.001,
                max: 0.01,
                step: None,
                distribution: None,
            },
            vec![16],
            IntRange { min: 1, max: 3 },
        );
        Job::new(JobRequest::new("persist", "m", "d", "out", config))
    }

    #[tokio::test]
    async fn persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let persister = StatusPersister::new(dir.path().join("optimization"));
        let mut job = sample_job();

        persister.persist(&job).await.unwrap();
        job.mark_running();
        persister.persist(&job).await.unwrap();
        persister.persist(&job).await.unwrap();

        let loaded = persister.load(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded, job);
        assert_eq!(loaded.status, JobStatus::Running);
        assert!(persister.snapshot_path(&job.id).is_file());

        let names: Vec<String> = std::fs::read_dir(persister.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}.json", job.id)]);
    }

    #[tokio::test]
    async fn load_missing_or_hostile_ids() {
        let dir = tempfile::tempdir().unwrap();
        let persister = StatusPersister::new(dir.path());
        assert!(persister.load("opt_missing").await.unwrap().is_none());
        assert!(persister.load("../etc/passwd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_all_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let persister = StatusPersister::new(dir.path());
        let job = sample_job();
        persister.persist(&job).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();

        let jobs = persister.load_all().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job.id);

        // A directory named like a snapshot cannot be read as one.
        std::fs::create_dir(dir.path().join("stray.json")).unwrap();
        let jobs = persister.load_all().await.unwrap();
        assert_eq!(jobs.len(), 1);

        let err = persister.load("broken").await.unwrap_err();
        assert!(matches!(err, PlError::Job(JobError::InvalidSnapshot { .. })));
    }

    #[tokio::test]
    async fn load_all_on_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let persister = StatusPersister::new(dir.path().join("never-created"));
        assert!(persister.load_all().await.unwrap().is_empty());
    }
}
