//! Annotation and review workflow on top of the store.
//!
//! Manual labels are self-attesting (`reviewed = true` at creation). AI
//! labels start unreviewed and only `batch_classify` refuses to add one to an
//! image that already has an annotation.

use crate::category::GroupFilter;
use crate::classifier::{ClassifierService, Prediction};
use crate::config::ClassifierConfig;
use crate::database::{
    Database, ImageLabel, LabelStats, ProvenanceFilter, ReviewItem, TrainingSample, UnlabeledImage,
};
use crate::error::AppError;
use futures_util::future::join_all;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Summary of one bulk classification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassifyReport {
    pub candidates: usize,
    pub labeled: usize,
    /// Annotated by someone else mid-pass, or no prediction returned.
    pub skipped: usize,
    pub failed: usize,
}

pub struct ReviewWorkflow {
    db: Arc<Database>,
    classifier: Arc<ClassifierService>,
    settings: ClassifierConfig,
}

impl ReviewWorkflow {
    pub fn new(db: Arc<Database>, classifier: Arc<ClassifierService>, settings: ClassifierConfig) -> Self {
        Self {
            db,
            classifier,
            settings,
        }
    }

    // =========================================================================
    // Annotations
    // =========================================================================

    /// Add one annotation. Confidence defaults to 1.0 for manual labels and
    /// 0.0 for AI labels. Existing annotations on the image are not checked.
    pub fn add_label(
        &self,
        image_id: i64,
        label: &str,
        is_manual: bool,
        confidence: Option<f64>,
    ) -> Result<ImageLabel, AppError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(AppError::InvalidArgument("label must not be empty".to_string()));
        }
        let confidence = confidence.unwrap_or(if is_manual { 1.0 } else { 0.0 });
        if !(0.0..=1.0).contains(&confidence) {
            return Err(AppError::InvalidArgument(format!(
                "confidence must be within [0, 1], got {}",
                confidence
            )));
        }
        self.require_image(image_id)?;

        let id = self
            .db
            .add_label(image_id, label, confidence, is_manual, is_manual)?;
        self.db
            .get_label(id)?
            .ok_or_else(|| AppError::NotFound(format!("label {}", id)))
    }

    pub fn list_labels(&self, image_id: i64) -> Result<Vec<ImageLabel>, AppError> {
        self.require_image(image_id)?;
        Ok(self.db.get_labels(image_id)?)
    }

    /// Idempotent: reviewing an already-reviewed label succeeds unchanged.
    pub fn mark_reviewed(&self, label_id: i64) -> Result<ImageLabel, AppError> {
        if !self.db.mark_label_reviewed(label_id)? {
            return Err(AppError::NotFound(format!("label {}", label_id)));
        }
        self.db
            .get_label(label_id)?
            .ok_or_else(|| AppError::NotFound(format!("label {}", label_id)))
    }

    pub fn delete_label(&self, label_id: i64) -> Result<DeleteOutcome, AppError> {
        if self.db.delete_label(label_id)? {
            log::info!("Deleted label {}", label_id);
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Ranked predictions for one image; nothing is persisted.
    pub async fn classify_image(&self, image_id: i64, top_k: Option<usize>) -> Result<Vec<Prediction>, AppError> {
        let image = self.require_image(image_id)?;
        let path = image
            .file_path
            .ok_or_else(|| AppError::InvalidArgument(format!("image {} has no local file", image_id)))?;
        self.classifier
            .classify(Path::new(&path), top_k.unwrap_or(self.settings.top_k))
            .await
    }

    /// Label every processed, unannotated image (at most `limit_per_group`
    /// per source group) with the model's top prediction.
    ///
    /// An unavailable model fails the whole call before any image is touched.
    /// Per-image failures are counted, not raised.
    pub async fn batch_classify(&self, limit_per_group: i64, top_k: Option<usize>) -> Result<ClassifyReport, AppError> {
        self.classifier.init().await?;

        let top_k = top_k.unwrap_or(self.settings.top_k).max(1);
        let candidates = self.db.get_unlabeled_images_per_group(limit_per_group)?;
        let mut report = ClassifyReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        log::info!("Classifying {} unlabeled images", candidates.len());

        for group in candidates.chunk_by(|a, b| a.source_group == b.source_group) {
            for batch in group.chunks(self.settings.batch_size.max(1)) {
                let results = join_all(batch.iter().map(|candidate| async move {
                    let predictions = self
                        .classifier
                        .classify(Path::new(&candidate.file_path), top_k)
                        .await;
                    (candidate, predictions)
                }))
                .await;

                for (candidate, predictions) in results {
                    self.persist_top_prediction(candidate, predictions, &mut report);
                }
            }
            log::info!(
                "Classified group '{}': {} images",
                group[0].source_group,
                group.len()
            );
        }

        log::info!(
            "Batch classify complete: {} labeled, {} skipped, {} failed",
            report.labeled,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    fn persist_top_prediction(
        &self,
        candidate: &UnlabeledImage,
        predictions: Result<Vec<Prediction>, AppError>,
        report: &mut ClassifyReport,
    ) {
        let top = match predictions {
            Ok(predictions) => predictions.into_iter().next(),
            Err(e) => {
                log::warn!("Classification failed for image {}: {}", candidate.id, e);
                report.failed += 1;
                return;
            }
        };
        let Some(top) = top else {
            report.skipped += 1;
            return;
        };

        match self
            .db
            .add_ai_label_if_unlabeled(candidate.id, &top.label, top.confidence)
        {
            Ok(Some(_)) => report.labeled += 1,
            Ok(None) => report.skipped += 1,
            Err(e) => {
                log::warn!("Failed to save label for image {}: {}", candidate.id, e);
                report.failed += 1;
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn review_queue(
        &self,
        provenance: ProvenanceFilter,
        group: Option<&GroupFilter>,
    ) -> Result<Vec<ReviewItem>, AppError> {
        Ok(self.db.get_review_queue(provenance, group)?)
    }

    pub fn label_stats(&self) -> Result<LabelStats, AppError> {
        Ok(self.db.get_label_stats()?)
    }

    pub fn training_set(&self) -> Result<Vec<TrainingSample>, AppError> {
        Ok(self.db.get_labeled_images_for_training()?)
    }

    fn require_image(&self, image_id: i64) -> Result<crate::database::ImageRecord, AppError> {
        self.db
            .get_image(image_id)?
            .ok_or_else(|| AppError::NotFound(format!("image {}", image_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classifier, ModelInfo};
    use crate::config::CategoryConfig;
    use crate::database::{DiscoveredImage, DownloadedFile, ProcessedFile};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Predicts from the file name; paths containing "broken" fail.
    struct FakeClassifier {
        available: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Classifier for FakeClassifier {
        async fn model_info(&self) -> Result<ModelInfo, String> {
            if !self.available {
                return Err("connection refused".to_string());
            }
            Ok(ModelInfo {
                available: true,
                model: Some("fake".into()),
                labels: vec!["noodles".into(), "rice".into()],
            })
        }

        async fn classify(&self, image_path: &Path, _top_k: usize) -> Result<Vec<Prediction>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = image_path.to_string_lossy();
            if path.contains("broken") {
                return Err("model crashed".to_string());
            }
            Ok(vec![
                Prediction { label: "rice".into(), confidence: 0.3 },
                Prediction { label: "noodles".into(), confidence: 0.7 },
            ])
        }
    }

    struct Fixture {
        workflow: ReviewWorkflow,
        db: Arc<Database>,
        fake: Arc<FakeClassifier>,
        _temp: TempDir,
    }

    fn setup(available: bool) -> Fixture {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("test.db")).unwrap());
        let fake = Arc::new(FakeClassifier {
            available,
            calls: AtomicUsize::new(0),
        });
        let service = Arc::new(ClassifierService::new(fake.clone()));
        let settings = ClassifierConfig {
            batch_size: 2,
            ..ClassifierConfig::default()
        };
        Fixture {
            workflow: ReviewWorkflow::new(db.clone(), service, settings),
            db,
            fake,
            _temp: temp,
        }
    }

    /// Insert processed images, one per `(group, file stem)`.
    fn processed(db: &Database, items: &[(&str, &str)]) -> Vec<i64> {
        let images: Vec<_> = items
            .iter()
            .map(|(group, stem)| DiscoveredImage {
                url: format!("https://img.test/{}.jpg", stem),
                alt_text: String::new(),
                source_group: group.to_string(),
            })
            .collect();
        db.insert_discovered(&images, &CategoryConfig::default()).unwrap();
        let claimed = db.claim_downloads(None, false).unwrap();
        for (record, (_, stem)) in claimed.iter().zip(items) {
            db.mark_downloaded(
                record.id,
                &DownloadedFile {
                    file_name: format!("{}.jpg", stem),
                    file_path: format!("/tmp/raw/{}.jpg", stem),
                    file_size: 10,
                    checksum: "x".into(),
                },
            )
            .unwrap();
            db.begin_processing(record.id).unwrap();
            db.mark_processed(
                record.id,
                &ProcessedFile {
                    file_name: format!("processed_{}.jpg", stem),
                    file_path: format!("/tmp/processed/processed_{}.jpg", stem),
                    file_size: 10,
                    width: 500,
                    height: 500,
                    budget_met: true,
                },
            )
            .unwrap();
        }
        claimed.iter().map(|r| r.id).collect()
    }

    // =========================================================================
    // Annotations
    // =========================================================================

    #[test]
    fn test_manual_label_round_trip() {
        let f = setup(true);
        let ids = processed(&f.db, &[("Thai food", "a")]);
        f.workflow.add_label(ids[0], "food", true, None).unwrap();

        let labels = f.workflow.list_labels(ids[0]).unwrap();
        assert_eq!(labels.len(), 1);
        assert!(labels[0].is_manual);
        assert!(labels[0].reviewed);
        assert_eq!(labels[0].confidence, 1.0);
    }

    #[test]
    fn test_ai_label_defaults() {
        let f = setup(true);
        let ids = processed(&f.db, &[("Thai food", "a")]);
        let label = f.workflow.add_label(ids[0], "noodles", false, Some(0.42)).unwrap();
        assert!(!label.is_manual);
        assert!(!label.reviewed);
        assert_eq!(label.confidence, 0.42);

        let default = f.workflow.add_label(ids[0], "rice", false, None).unwrap();
        assert_eq!(default.confidence, 0.0);
    }

    #[test]
    fn test_manual_label_allowed_alongside_ai() {
        let f = setup(true);
        let ids = processed(&f.db, &[("Thai food", "a")]);
        f.workflow.add_label(ids[0], "rice", false, Some(0.99)).unwrap();
        f.workflow.add_label(ids[0], "noodles", true, Some(0.2)).unwrap();
        f.workflow.add_label(ids[0], "noodles", true, Some(0.2)).unwrap();

        let labels = f.workflow.list_labels(ids[0]).unwrap();
        assert_eq!(labels.len(), 3);
        assert!(labels[0].is_manual && labels[1].is_manual);
        assert_eq!(labels[2].label, "rice");
    }

    #[test]
    fn test_add_label_validation() {
        let f = setup(true);
        let ids = processed(&f.db, &[("Thai food", "a")]);

        assert!(matches!(
            f.workflow.add_label(ids[0], "   ", true, None),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.workflow.add_label(ids[0], "x", false, Some(1.2)),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.workflow.add_label(ids[0], "x", false, Some(f64::NAN)),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.workflow.add_label(9999, "x", true, None),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(f.workflow.list_labels(9999), Err(AppError::NotFound(_))));
        assert_eq!(f.db.count_labels(ids[0]).unwrap(), 0);
    }

    #[test]
    fn test_mark_reviewed_twice() {
        let f = setup(true);
        let ids = processed(&f.db, &[("Thai food", "a")]);
        let label = f.workflow.add_label(ids[0], "rice", false, Some(0.5)).unwrap();

        assert!(f.workflow.mark_reviewed(label.id).unwrap().reviewed);
        assert!(f.workflow.mark_reviewed(label.id).unwrap().reviewed);
        assert!(matches!(
            f.workflow.mark_reviewed(label.id + 100),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_missing_label_is_not_found_and_leaves_others() {
        let f = setup(true);
        let ids = processed(&f.db, &[("Thai food", "a")]);
        let keep = f.workflow.add_label(ids[0], "rice", true, None).unwrap();
        let gone = f.workflow.add_label(ids[0], "noodles", true, None).unwrap();

        assert_eq!(f.workflow.delete_label(gone.id).unwrap(), DeleteOutcome::Deleted);
        assert_eq!(f.workflow.delete_label(gone.id).unwrap(), DeleteOutcome::NotFound);
        assert_eq!(f.workflow.delete_label(12345).unwrap(), DeleteOutcome::NotFound);

        let labels = f.workflow.list_labels(ids[0]).unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].id, keep.id);
    }

    // =========================================================================
    // Classification
    // =========================================================================

    #[tokio::test]
    async fn test_batch_classify_never_adds_second_annotation() {
        let f = setup(true);
        let ids = processed(
            &f.db,
            &[("Thai food", "a"), ("Thai food", "b"), ("Thai food", "c")],
        );
        f.workflow.add_label(ids[0], "manual", true, None).unwrap();
        f.workflow.add_label(ids[1], "ai", false, Some(0.5)).unwrap();

        let report = f.workflow.batch_classify(10, None).await.unwrap();
        assert_eq!(report.candidates, 1);
        assert_eq!(report.labeled, 1);

        assert_eq!(f.db.count_labels(ids[0]).unwrap(), 1);
        assert_eq!(f.db.count_labels(ids[1]).unwrap(), 1);
        let labels = f.workflow.list_labels(ids[2]).unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].label, "noodles");
        assert!(!labels[0].is_manual);
        assert!(!labels[0].reviewed);

        // Second pass has nothing left to do
        let again = f.workflow.batch_classify(10, None).await.unwrap();
        assert_eq!(again.candidates, 0);
    }

    #[tokio::test]
    async fn test_batch_classify_caps_per_group() {
        let f = setup(true);
        processed(
            &f.db,
            &[
                ("Thai food", "t1"),
                ("Thai food", "t2"),
                ("Thai food", "t3"),
                ("Korean kimchi", "k1"),
                ("Korean kimchi", "k2"),
            ],
        );

        let report = f.workflow.batch_classify(2, None).await.unwrap();
        assert_eq!(report.candidates, 4);
        assert_eq!(report.labeled, 4);
        assert_eq!(f.fake.calls.load(Ordering::SeqCst), 4);
        assert_eq!(f.workflow.label_stats().unwrap().total_unlabeled, 1);
    }

    #[tokio::test]
    async fn test_batch_classify_counts_per_image_failures() {
        let f = setup(true);
        let ids = processed(&f.db, &[("Thai food", "ok"), ("Thai food", "broken")]);

        let report = f.workflow.batch_classify(10, None).await.unwrap();
        assert_eq!(report.labeled, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(f.db.count_labels(ids[1]).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_classify_unavailable_fails_before_work() {
        let f = setup(false);
        processed(&f.db, &[("Thai food", "a")]);

        let err = f.workflow.batch_classify(10, None).await.unwrap_err();
        assert!(matches!(err, AppError::CollaboratorUnavailable(_)));
        assert_eq!(f.fake.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.workflow.label_stats().unwrap().total_labeled, 0);
    }

    #[tokio::test]
    async fn test_classify_image_does_not_persist() {
        let f = setup(true);
        let ids = processed(&f.db, &[("Thai food", "a")]);

        let predictions = f.workflow.classify_image(ids[0], Some(2)).await.unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].label, "noodles");
        assert_eq!(f.db.count_labels(ids[0]).unwrap(), 0);

        assert!(matches!(
            f.workflow.classify_image(777, None).await,
            Err(AppError::NotFound(_))
        ));
    }

    // =========================================================================
    // Review queue
    // =========================================================================

    #[tokio::test]
    async fn test_review_flow_empties_queue() {
        let f = setup(true);
        processed(&f.db, &[("Thai food", "a"), ("Korean kimchi", "b")]);
        f.workflow.batch_classify(10, None).await.unwrap();

        let queue = f.workflow.review_queue(ProvenanceFilter::Ai, None).unwrap();
        assert_eq!(queue.len(), 2);

        let thai = f
            .workflow
            .review_queue(ProvenanceFilter::Ai, Some(&GroupFilter::Category("Thailand".into())))
            .unwrap();
        assert_eq!(thai.len(), 1);
        assert_eq!(thai[0].image.source_group, "Thai food");

        for item in &queue {
            for label in &item.pending_labels {
                f.workflow.mark_reviewed(label.id).unwrap();
            }
        }
        assert!(f.workflow.review_queue(ProvenanceFilter::All, None).unwrap().is_empty());
        assert_eq!(f.workflow.training_set().unwrap().len(), 2);
    }
}
