use thiserror::Error;

/// Typed error hierarchy for every boundary operation.
///
/// Serializes as a plain string so a presentation layer receives the same
/// `"error message"` shape regardless of variant, while Rust callers can
/// still match on the variant.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Classifier unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Json(String),

    #[error("{0}")]
    Other(String),
}

impl serde::Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

// ── From impls ─────────────────────────────────────────────────────────────

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Json(e.to_string())
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Other(s)
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Other(s.to_string())
    }
}

/// Per-item failure inside a download or normalize pass.
///
/// These never propagate out of a batch: the pass records `to_string()` into
/// the record's `error_message` column and counts the item as failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid content: {0}")]
    ContentValidation(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        PipelineError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PipelineError::Network(format!("request timed out: {}", e))
        } else {
            PipelineError::Network(e.to_string())
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Filesystem(e.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::IoError(io) => PipelineError::Filesystem(io.to_string()),
            other => PipelineError::Decode(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_serializes_as_plain_string() {
        let err = AppError::NotFound("label 7".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Not found: label 7\"");
    }

    #[test]
    fn test_pipeline_error_message_prefixes() {
        let err = PipelineError::ContentValidation("content-type text/html".into());
        assert!(err.to_string().starts_with("Invalid content"));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(PipelineError::from(io), PipelineError::Filesystem(_)));
    }
}
