use crate::database::{CategoryCount, CurationStats, LabelStats};
use crate::error::AppError;
use crate::AppState;

pub async fn get_stats(state: &AppState) -> Result<CurationStats, AppError> {
    state.db.get_stats().map_err(AppError::from)
}

pub async fn get_category_stats(state: &AppState) -> Result<Vec<CategoryCount>, AppError> {
    state.db.get_category_stats().map_err(AppError::from)
}

pub async fn get_label_stats(state: &AppState) -> Result<LabelStats, AppError> {
    state.review.label_stats()
}
