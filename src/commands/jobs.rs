use crate::error::AppError;
use crate::jobs::{JobId, JobStatus};
use crate::AppState;

pub async fn get_job_status(state: &AppState, job_id: JobId) -> Result<JobStatus, AppError> {
    state
        .jobs
        .status(job_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))
}

pub async fn list_jobs(state: &AppState) -> Result<Vec<JobStatus>, AppError> {
    Ok(state.jobs.list().await)
}
