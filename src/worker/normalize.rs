//! Resize downloaded images to the target box and recompress them under the
//! byte budget.
//!
//! The quality search walks down from `quality_max` in `quality_step`
//! decrements. If the floor still misses the budget, one geometric rescale by
//! `sqrt(budget / size)` is applied and re-encoded at the floor, and that
//! result is accepted whatever its size. `budget_met` reports which case
//! happened.

use super::{BatchOutcome, Progress};
use crate::config::ProcessConfig;
use crate::database::{Database, ImageRecord, ProcessStatus, ProcessedFile};
use crate::error::PipelineError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output of the budget search for one image.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Every quality value encoded during the search, in order.
    pub qualities: Vec<u8>,
    pub fallback_used: bool,
    pub budget_met: bool,
}

/// Cover-crop target size. Images already inside the box keep their size;
/// otherwise scale by the larger of the two ratios and clip to the box.
pub fn cover_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::max(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_width);
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_height);
    (w, h)
}

pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, PipelineError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&rgb)
        .map_err(|e| PipelineError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Crop to the target box, then search encode quality against the budget.
pub fn fit_to_budget(img: &DynamicImage, settings: &ProcessConfig) -> Result<NormalizedImage, PipelineError> {
    let (target_w, target_h) = cover_dimensions(
        img.width(),
        img.height(),
        settings.max_width,
        settings.max_height,
    );
    let mut current = if (target_w, target_h) == (img.width(), img.height()) {
        img.clone()
    } else {
        img.resize_to_fill(target_w, target_h, FilterType::Lanczos3)
    };

    let budget = settings.max_file_size;
    let mut quality = settings.quality_max;
    let mut qualities = Vec::new();

    for _ in 0..settings.max_attempts {
        let bytes = encode_jpeg(&current, quality)?;
        qualities.push(quality);

        if bytes.len() as u64 <= budget {
            return Ok(NormalizedImage {
                width: current.width(),
                height: current.height(),
                bytes,
                qualities,
                fallback_used: false,
                budget_met: true,
            });
        }

        if quality <= settings.quality_min {
            let scale = (budget as f64 / bytes.len() as f64).sqrt();
            let w = ((current.width() as f64 * scale).floor() as u32).max(1);
            let h = ((current.height() as f64 * scale).floor() as u32).max(1);
            current = current.resize_to_fill(w, h, FilterType::Lanczos3);

            let bytes = encode_jpeg(&current, settings.quality_min)?;
            let budget_met = bytes.len() as u64 <= budget;
            if !budget_met {
                log::warn!(
                    "Accepted {}x{} image at {} bytes, over the {} byte budget",
                    w,
                    h,
                    bytes.len(),
                    budget
                );
            }
            return Ok(NormalizedImage {
                bytes,
                width: w,
                height: h,
                qualities,
                fallback_used: true,
                budget_met,
            });
        }

        quality = quality
            .saturating_sub(settings.quality_step)
            .max(settings.quality_min);
    }

    Err(PipelineError::Encode(format!(
        "cannot compress to {} bytes within {} attempts",
        budget, settings.max_attempts
    )))
}

/// Sequential normalize pass over downloaded records.
pub struct Normalizer {
    db: Arc<Database>,
    settings: ProcessConfig,
    processed_dir: PathBuf,
}

impl Normalizer {
    pub fn new(db: Arc<Database>, settings: ProcessConfig, processed_dir: PathBuf) -> Self {
        Self {
            db,
            settings,
            processed_dir,
        }
    }

    /// Claim downloaded records and normalize them one at a time.
    pub fn normalize_pending(&self, limit: Option<i64>, include_failed: bool) -> anyhow::Result<BatchOutcome> {
        let records = self.db.claim_processing(limit, include_failed)?;
        if records.is_empty() {
            log::info!("No images waiting for processing");
            return Ok(BatchOutcome::default());
        }
        log::info!("Processing {} images", records.len());
        Ok(self.normalize_batch(&records))
    }

    pub fn normalize_batch(&self, records: &[ImageRecord]) -> BatchOutcome {
        let mut progress = Progress::new("normalize", records.len());
        for record in records {
            progress.record(self.normalize(record).is_ok());
        }
        progress.finish()
    }

    /// Normalize one record, marking it processed or failed.
    ///
    /// The stored row is authoritative, not `record`: a record that is not
    /// downloaded, already processed, or claimed by another pass is left
    /// untouched. A `record` in `processing` state is taken to be this
    /// pass's own claim.
    pub fn normalize(&self, record: &ImageRecord) -> Result<ProcessedFile, PipelineError> {
        let current = self
            .db
            .get_image(record.id)?
            .ok_or_else(|| PipelineError::Database(format!("image {} not found", record.id)))?;
        if !ProcessStatus::may_leave_pending(current.download_status) {
            return Err(PipelineError::Filesystem(format!(
                "image {} has not been downloaded",
                record.id
            )));
        }
        match current.process_status {
            ProcessStatus::Processed => {
                return Err(PipelineError::Database(format!(
                    "image {} is already processed",
                    record.id
                )));
            }
            ProcessStatus::Processing if record.process_status == ProcessStatus::Processing => {}
            _ => {
                if !self.db.begin_processing(record.id)? {
                    return Err(PipelineError::Database(format!(
                        "image {} is already being processed",
                        record.id
                    )));
                }
            }
        }

        let result = self.process_claimed(&current);
        if let Err(e) = &result {
            log::warn!("Processing failed for image {}: {}", record.id, e);
            if let Err(db_err) = self.db.mark_process_failed(record.id, &e.to_string()) {
                log::error!("Failed to record processing failure for {}: {}", record.id, db_err);
            }
        }
        result
    }

    fn process_claimed(&self, record: &ImageRecord) -> Result<ProcessedFile, PipelineError> {
        let source = record.file_path.as_deref().ok_or_else(|| {
            PipelineError::Filesystem(format!("image {} has no file path", record.id))
        })?;
        let data = std::fs::read(source)
            .map_err(|e| PipelineError::Filesystem(format!("{}: {}", source, e)))?;
        let img = image::load_from_memory(&data).map_err(|e| PipelineError::Decode(e.to_string()))?;

        let normalized = fit_to_budget(&img, &self.settings)?;

        let stem = Path::new(source)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("image_{}", record.id));
        let file_name = format!("processed_{}.jpg", stem);
        let out_path = self.processed_dir.join(&file_name);
        std::fs::create_dir_all(&self.processed_dir)?;

        if let Err(e) = std::fs::write(&out_path, &normalized.bytes) {
            let _ = std::fs::remove_file(&out_path);
            return Err(e.into());
        }

        let file = ProcessedFile {
            file_name,
            file_path: out_path.to_string_lossy().to_string(),
            file_size: normalized.bytes.len() as i64,
            width: normalized.width as i64,
            height: normalized.height as i64,
            budget_met: normalized.budget_met,
        };
        if let Err(e) = self.db.mark_processed(record.id, &file) {
            let _ = std::fs::remove_file(&out_path);
            return Err(e.into());
        }

        log::debug!(
            "Processed image {}: {}x{} {} bytes (qualities {:?}, fallback: {})",
            record.id,
            file.width,
            file.height,
            file.file_size,
            normalized.qualities,
            normalized.fallback_used
        );
        Ok(file)
    }
}
