//! Inference collaborator integration
//!
//! The model itself runs in a separate inference service. `HttpClassifier`
//! talks to its REST API; `ClassifierService` wraps any `Classifier` with a
//! cached model description that can be initialised and reset explicitly.

use crate::config::ClassifierConfig;
use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// One ranked guess from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

/// What the inference service reports about its loaded model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub available: bool,
    #[serde(default)]
    pub model: Option<String>,
    /// Fixed label vocabulary the model predicts over.
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Boundary to the inference collaborator.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Check the service. `Err` means it could not be reached at all.
    async fn model_info(&self) -> Result<ModelInfo, String>;

    /// Ranked predictions for one image file.
    async fn classify(&self, image_path: &Path, top_k: usize) -> Result<Vec<Prediction>, String>;
}

// ============================================================================
// HTTP client
// ============================================================================

pub struct HttpClassifier {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    image_path: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    predictions: Vec<Prediction>,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn model_info(&self) -> Result<ModelInfo, String> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Inference service not running: {}", e))?;

        if !response.status().is_success() {
            return Err(format!(
                "Inference service returned {}",
                response.status()
            ));
        }

        response
            .json::<ModelInfo>()
            .await
            .map_err(|e| format!("Failed to parse inference health response: {}", e))
    }

    async fn classify(&self, image_path: &Path, top_k: usize) -> Result<Vec<Prediction>, String> {
        let url = format!("{}/classify", self.base_url);
        let image_path = image_path.to_string_lossy();
        let request = ClassifyRequest {
            image_path: &image_path,
            top_k,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Failed to call inference service: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Inference service returned {}: {}", status, body));
        }

        let result: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse inference response: {}", e))?;
        Ok(result.predictions)
    }
}

// ============================================================================
// Cached service
// ============================================================================

/// Injectable wrapper holding the model description once it has been loaded.
pub struct ClassifierService {
    inner: Arc<dyn Classifier>,
    cached: RwLock<Option<ModelInfo>>,
}

impl ClassifierService {
    pub fn new(inner: Arc<dyn Classifier>) -> Self {
        Self {
            inner,
            cached: RwLock::new(None),
        }
    }

    pub fn http(config: &ClassifierConfig) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(HttpClassifier::new(config)?)))
    }

    /// Load and cache the model description. Fails with
    /// `CollaboratorUnavailable` when the service is down or has no model.
    pub async fn init(&self) -> Result<ModelInfo, AppError> {
        if let Some(info) = self.cached.read().await.as_ref() {
            return Ok(info.clone());
        }

        let info = self
            .inner
            .model_info()
            .await
            .map_err(AppError::CollaboratorUnavailable)?;
        if !info.available {
            return Err(AppError::CollaboratorUnavailable(
                "no model loaded".to_string(),
            ));
        }

        log::info!(
            "Classifier ready: model={}, {} labels",
            info.model.as_deref().unwrap_or("unknown"),
            info.labels.len()
        );
        *self.cached.write().await = Some(info.clone());
        Ok(info)
    }

    /// Drop the cached model description; the next call checks again.
    pub async fn reset(&self) {
        *self.cached.write().await = None;
        log::info!("Classifier cache cleared");
    }

    pub async fn is_available(&self) -> bool {
        self.init().await.is_ok()
    }

    /// Never fails: an unreachable service reports `available = false`.
    pub async fn model_info(&self) -> ModelInfo {
        self.init().await.unwrap_or_default()
    }

    /// Predictions sorted by descending confidence, at most `top_k`, with
    /// confidences clamped into [0, 1].
    pub async fn classify(&self, image_path: &Path, top_k: usize) -> Result<Vec<Prediction>, AppError> {
        self.init().await?;
        let mut predictions = self
            .inner
            .classify(image_path, top_k)
            .await
            .map_err(AppError::Other)?;

        predictions.retain(|p| p.confidence.is_finite());
        for p in predictions.iter_mut() {
            p.confidence = p.confidence.clamp(0.0, 1.0);
        }
        predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        predictions.truncate(top_k.max(1));
        Ok(predictions)
    }
}
