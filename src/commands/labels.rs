use crate::category::GroupFilter;
use crate::database::{ImageLabel, ProvenanceFilter, ReviewItem, TrainingSample};
use crate::error::AppError;
use crate::review::DeleteOutcome;
use crate::AppState;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct NewLabel {
    pub image_id: i64,
    pub label: String,
    #[serde(default = "default_manual")]
    pub is_manual: bool,
    pub confidence: Option<f64>,
}

fn default_manual() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewQueueQuery {
    #[serde(default)]
    pub filter: ProvenanceFilter,
    pub group: Option<GroupFilter>,
}

pub async fn add_label(state: &AppState, new_label: NewLabel) -> Result<ImageLabel, AppError> {
    state.review.add_label(
        new_label.image_id,
        &new_label.label,
        new_label.is_manual,
        new_label.confidence,
    )
}

pub async fn get_labels(state: &AppState, image_id: i64) -> Result<Vec<ImageLabel>, AppError> {
    state.review.list_labels(image_id)
}

pub async fn mark_label_reviewed(state: &AppState, label_id: i64) -> Result<ImageLabel, AppError> {
    state.review.mark_reviewed(label_id)
}

pub async fn delete_label(state: &AppState, label_id: i64) -> Result<DeleteOutcome, AppError> {
    state.review.delete_label(label_id)
}

pub async fn get_review_queue(
    state: &AppState,
    query: Option<ReviewQueueQuery>,
) -> Result<Vec<ReviewItem>, AppError> {
    let query = query.unwrap_or_default();
    state.review.review_queue(query.filter, query.group.as_ref())
}

pub async fn get_training_set(state: &AppState) -> Result<Vec<TrainingSample>, AppError> {
    state.review.training_set()
}
