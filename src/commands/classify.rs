use crate::classifier::{ModelInfo, Prediction};
use crate::error::AppError;
use crate::jobs::JobId;
use crate::AppState;

const DEFAULT_LIMIT_PER_GROUP: i64 = 10;

pub async fn classify_image(
    state: &AppState,
    image_id: i64,
    top_k: Option<usize>,
) -> Result<Vec<Prediction>, AppError> {
    state.review.classify_image(image_id, top_k).await
}

/// Start a bulk classify-and-persist pass in the background.
///
/// The model is checked first so an unavailable service fails this call
/// directly instead of surfacing later in the job status.
pub async fn start_batch_classify(
    state: &AppState,
    limit_per_group: Option<i64>,
    top_k: Option<usize>,
) -> Result<JobId, AppError> {
    state.classifier.init().await?;

    let review = state.review.clone();
    let limit = limit_per_group.unwrap_or(DEFAULT_LIMIT_PER_GROUP);
    let id = state
        .jobs
        .submit("classify", async move { review.batch_classify(limit, top_k).await })
        .await;
    Ok(id)
}

pub async fn get_model_info(state: &AppState) -> Result<ModelInfo, AppError> {
    Ok(state.classifier.model_info().await)
}

/// Forget the cached model description, e.g. after the service swaps models.
pub async fn reset_classifier(state: &AppState) -> Result<(), AppError> {
    state.classifier.reset().await;
    Ok(())
}
