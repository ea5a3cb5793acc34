//! Boundary operations for a presentation layer.
//!
//! Each command is a thin async fn over `AppState` returning
//! `Result<T, AppError>`.

mod classify;
mod images;
mod jobs;
mod labels;
mod stats;

pub use classify::*;
pub use images::*;
pub use jobs::*;
pub use labels::*;
pub use stats::*;
