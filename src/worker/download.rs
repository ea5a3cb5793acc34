use super::{BatchOutcome, Progress};
use crate::config::DownloadConfig;
use crate::database::{Database, DownloadedFile, ImageRecord};
use crate::error::PipelineError;
use futures_util::future::join_all;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Fetches pending records into the raw image directory.
pub struct Downloader {
    db: Arc<Database>,
    client: reqwest::Client,
    raw_dir: PathBuf,
    concurrency: usize,
}

impl Downloader {
    pub fn new(db: Arc<Database>, config: &DownloadConfig, raw_dir: PathBuf) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            db,
            client,
            raw_dir,
            concurrency: config.concurrency.max(1),
        })
    }

    /// Claim pending records (plus failed ones when `include_failed`) and
    /// download them with the configured concurrency.
    pub async fn download_pending(
        &self,
        limit: Option<i64>,
        include_failed: bool,
    ) -> anyhow::Result<BatchOutcome> {
        let records = self.db.claim_downloads(limit, include_failed)?;
        if records.is_empty() {
            log::info!("No images waiting for download");
            return Ok(BatchOutcome::default());
        }
        log::info!("Downloading {} images", records.len());
        Ok(self.download_batch(&records, self.concurrency).await)
    }

    /// Download `records` in consecutive chunks of `concurrency`. A chunk
    /// must fully settle before the next one starts.
    pub async fn download_batch(&self, records: &[ImageRecord], concurrency: usize) -> BatchOutcome {
        if let Err(e) = tokio::fs::create_dir_all(&self.raw_dir).await {
            log::warn!("Failed to create {}: {}", self.raw_dir.display(), e);
        }

        let mut progress = Progress::new("download", records.len());
        for chunk in records.chunks(concurrency.max(1)) {
            let results = join_all(chunk.iter().map(|record| self.download_record(record))).await;
            for ok in results {
                progress.record(ok);
            }
        }
        progress.finish()
    }

    /// Download one record and persist the outcome. Returns true on success.
    async fn download_record(&self, record: &ImageRecord) -> bool {
        match self.fetch(record).await {
            Ok(file) => {
                log::debug!("Downloaded image {} ({} bytes)", record.id, file.file_size);
                true
            }
            Err(e) => {
                log::warn!("Download failed for image {} ({}): {}", record.id, record.url, e);
                if let Err(db_err) = self.db.mark_download_failed(record.id, &e.to_string()) {
                    log::error!("Failed to record download failure for {}: {}", record.id, db_err);
                }
                false
            }
        }
    }

    async fn fetch(&self, record: &ImageRecord) -> Result<DownloadedFile, PipelineError> {
        let response = self.client.get(&record.url).send().await?;

        if response.status() != StatusCode::OK {
            return Err(PipelineError::ContentValidation(format!(
                "HTTP status {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.starts_with("image/") {
            return Err(PipelineError::ContentValidation(format!(
                "unexpected content-type '{}'",
                content_type
            )));
        }

        let file_name = format!(
            "image_{}_{}.{}",
            record.id,
            uuid::Uuid::new_v4().simple(),
            extension_for(&content_type)
        );
        let file_path = self.raw_dir.join(&file_name);

        let (file_size, checksum) = match write_body(response, &file_path).await {
            Ok(written) => written,
            Err(e) => {
                // Clean up partial file
                let _ = tokio::fs::remove_file(&file_path).await;
                return Err(e);
            }
        };

        let file = DownloadedFile {
            file_name,
            file_path: file_path.to_string_lossy().to_string(),
            file_size,
            checksum,
        };
        if let Err(e) = self.db.mark_downloaded(record.id, &file) {
            let _ = tokio::fs::remove_file(&file_path).await;
            return Err(e.into());
        }
        Ok(file)
    }
}

/// Stream the body to `file_path`, hashing as it goes.
/// Returns the byte count and hex BLAKE3 checksum.
async fn write_body(
    response: reqwest::Response,
    file_path: &Path,
) -> Result<(i64, String), PipelineError> {
    let content_length = response.content_length();
    let mut stream = response.bytes_stream();
    let mut file = tokio::fs::File::create(file_path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
    }
    file.flush().await?;

    if let Some(expected) = content_length {
        if downloaded != expected {
            return Err(PipelineError::Network(format!(
                "incomplete body: got {} bytes, expected {}",
                downloaded, expected
            )));
        }
    }
    if downloaded == 0 {
        return Err(PipelineError::ContentValidation("empty body".to_string()));
    }

    Ok((downloaded as i64, hasher.finalize().to_hex().to_string()))
}

fn extension_for(content_type: &str) -> &'static str {
    let subtype = content_type
        .trim_start_matches("image/")
        .split(';')
        .next()
        .unwrap_or("")
        .trim();
    match subtype {
        "png" => "png",
        "gif" => "gif",
        "webp" => "webp",
        "bmp" => "bmp",
        "avif" => "avif",
        _ => "jpg",
    }
}
