//! Background passes.
//!
//! A long-running pass is submitted as a job and the call returns its id
//! straight away. The id can be polled for `running`, `done` (with the
//! pass's summary) or `failed`.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Running,
    Done { summary: serde_json::Value },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    pub kind: String,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Finished jobs kept for polling before the oldest are dropped.
const KEEP_FINISHED: usize = 100;

#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, JobStatus>>>,
    keep_finished: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_history(KEEP_FINISHED)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that remembers at most `keep_finished` finished jobs.
    /// Running jobs are never dropped.
    pub fn with_history(keep_finished: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            keep_finished,
        }
    }

    /// Spawn `work` on the runtime and track it under a fresh id.
    pub async fn submit<F, T>(&self, kind: &str, work: F) -> JobId
    where
        F: Future<Output = Result<T, AppError>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let id = Uuid::new_v4();
        {
            let mut jobs = self.jobs.write().await;
            prune_finished(&mut jobs, self.keep_finished);
            jobs.insert(
                id,
                JobStatus {
                    id,
                    kind: kind.to_string(),
                    state: JobState::Running,
                    started_at: Utc::now(),
                    finished_at: None,
                },
            );
        }
        log::info!("Started {} job {}", kind, id);

        let jobs = self.jobs.clone();
        let kind = kind.to_string();
        tokio::spawn(async move {
            let state = match tokio::spawn(work).await {
                Ok(Ok(summary)) => JobState::Done {
                    summary: serde_json::to_value(&summary).unwrap_or(serde_json::Value::Null),
                },
                Ok(Err(e)) => JobState::Failed {
                    message: e.to_string(),
                },
                Err(join_err) => JobState::Failed {
                    message: format!("job aborted: {}", join_err),
                },
            };

            match &state {
                JobState::Failed { message } => log::error!("{} job {} failed: {}", kind, id, message),
                _ => log::info!("{} job {} finished", kind, id),
            }

            if let Some(job) = jobs.write().await.get_mut(&id) {
                job.state = state;
                job.finished_at = Some(Utc::now());
            }
        });

        id
    }

    pub async fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// All known jobs, oldest first.
    pub async fn list(&self) -> Vec<JobStatus> {
        let mut jobs: Vec<_> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }
}

fn prune_finished(jobs: &mut HashMap<JobId, JobStatus>, keep: usize) {
    let mut finished: Vec<(DateTime<Utc>, JobId)> = jobs
        .values()
        .filter_map(|job| job.finished_at.map(|at| (at, job.id)))
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
    log::debug!("Dropped {} finished jobs from the registry", excess);
}
