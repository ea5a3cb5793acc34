use serde::{Deserialize, Serialize};

// ============================================================================
// Record lifecycle
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    #[default]
    Pending,
    Downloading,
    Downloaded,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for DownloadStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "downloading" => Self::Downloading,
            "downloaded" => Self::Downloaded,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    #[default]
    Pending,
    Processing,
    Processed,
    Failed,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// The one cross-field rule: processing may only begin on a downloaded file.
    pub fn may_leave_pending(download: DownloadStatus) -> bool {
        download == DownloadStatus::Downloaded
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ProcessStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => Self::Processing,
            "processed" => Self::Processed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

// ============================================================================
// Images
// ============================================================================

/// One tuple produced by the URL discovery collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredImage {
    pub url: String,
    #[serde(default)]
    pub alt_text: String,
    pub source_group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    pub url: String,
    pub alt_text: String,
    pub source_group: String,
    pub category: String,
    pub file_name: Option<String>,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub checksum: Option<String>,
    pub budget_met: Option<bool>,
    pub download_status: DownloadStatus,
    pub process_status: ProcessStatus,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

/// Fields written when a download completes.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub checksum: String,
}

/// Fields written when normalization completes.
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub width: i64,
    pub height: i64,
    pub budget_met: bool,
}

// ============================================================================
// Annotations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageLabel {
    pub id: i64,
    pub image_id: i64,
    pub label: String,
    pub confidence: f64,
    pub is_manual: bool,
    pub reviewed: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Provenance filter for the review queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceFilter {
    Ai,
    Manual,
    #[default]
    All,
}

impl ProvenanceFilter {
    pub fn accepts(&self, is_manual: bool) -> bool {
        match self {
            Self::Ai => !is_manual,
            Self::Manual => is_manual,
            Self::All => true,
        }
    }
}

/// An image waiting for review, with its unreviewed annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub image: ImageRecord,
    pub pending_labels: Vec<ImageLabel>,
}

/// Candidate for a bulk classification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlabeledImage {
    pub id: i64,
    pub source_group: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSample {
    pub image_id: i64,
    pub file_path: String,
    pub label: String,
    pub is_manual: bool,
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurationStats {
    pub total_collected: i64,
    pub total_downloaded: i64,
    pub total_processed: i64,
    pub download_failed: i64,
    pub process_failed: i64,
    pub over_budget: i64,
    pub average_file_size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelStats {
    pub total_images: i64,
    pub total_labeled: i64,
    pub total_unlabeled: i64,
    pub total_manual: i64,
    pub total_ai: i64,
    pub total_reviewed: i64,
}
