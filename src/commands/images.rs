use crate::database::{DiscoveredImage, ImageRecord, IngestReport};
use crate::error::AppError;
use crate::jobs::JobId;
use crate::AppState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct ImageFilters {
    pub category: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ImagesResponse {
    pub images: Vec<ImageRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

/// Insert URLs from the discovery collaborator as pending records.
pub async fn ingest(state: &AppState, images: Vec<DiscoveredImage>) -> Result<IngestReport, AppError> {
    let report = state
        .db
        .insert_discovered(&images, &state.config.categories)?;
    log::info!(
        "Ingested {} images ({} duplicates, {} invalid)",
        report.inserted,
        report.duplicates,
        report.invalid
    );
    Ok(report)
}

pub async fn get_images(state: &AppState, filters: Option<ImageFilters>) -> Result<ImagesResponse, AppError> {
    let filters = filters.unwrap_or_default();
    let limit = filters.limit.unwrap_or(50).max(0);
    let offset = filters.offset.unwrap_or(0).max(0);

    let (images, total) = state
        .db
        .get_images(filters.category.as_deref(), limit, offset)?;
    let has_more = offset + (images.len() as i64) < total;

    Ok(ImagesResponse {
        images,
        total,
        limit,
        offset,
        has_more,
    })
}

pub async fn get_image(state: &AppState, image_id: i64) -> Result<ImageRecord, AppError> {
    state
        .db
        .get_image(image_id)?
        .ok_or_else(|| AppError::NotFound(format!("image {}", image_id)))
}

/// Start a background download pass over pending records; failed records are
/// included only when `retry_failed` is set.
pub async fn start_download_pass(
    state: &AppState,
    limit: Option<i64>,
    retry_failed: bool,
) -> Result<JobId, AppError> {
    let downloader = state.downloader.clone();
    let id = state
        .jobs
        .submit("download", async move {
            downloader
                .download_pending(limit, retry_failed)
                .await
                .map_err(AppError::from)
        })
        .await;
    Ok(id)
}

/// Start a background normalize pass. The pass runs on the blocking pool,
/// one image at a time.
pub async fn start_normalize_pass(
    state: &AppState,
    limit: Option<i64>,
    retry_failed: bool,
) -> Result<JobId, AppError> {
    let normalizer = state.normalizer.clone();
    let id = state
        .jobs
        .submit("normalize", async move {
            tokio::task::spawn_blocking(move || normalizer.normalize_pending(limit, retry_failed))
                .await
                .map_err(|e| AppError::Other(format!("normalize pass aborted: {}", e)))?
                .map_err(AppError::from)
        })
        .await;
    Ok(id)
}

/// Return claims older than `older_than_secs` (all claims when zero) to
/// `pending`. Use after a pass was killed, once nothing else is running.
pub async fn recover_interrupted(state: &AppState, older_than_secs: u64) -> Result<usize, AppError> {
    let age = chrono::Duration::seconds(older_than_secs.min(i64::MAX as u64 / 1000) as i64);
    Ok(state.db.reset_interrupted(age)?)
}
