use super::{image_at, Database, IMAGE_COLUMNS};
use super::models::*;
use crate::category::GroupFilter;
use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};

const LABEL_COLUMNS: &str =
    "id, image_id, label, confidence, is_manual, reviewed, created_at, updated_at";

impl Database {
    // =========================================================================
    // Annotations
    // =========================================================================

    /// Insert one annotation row. Never looks at existing annotations.
    pub fn add_label(
        &self,
        image_id: i64,
        label: &str,
        confidence: f64,
        is_manual: bool,
        reviewed: bool,
    ) -> Result<i64> {
        let conn = self.lock()?;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO image_labels
                (image_id, label, confidence, is_manual, reviewed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![image_id, label, confidence, is_manual as i32, reviewed as i32, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert an unreviewed AI annotation only if the image has none yet.
    /// Returns `None` when the image was already annotated.
    pub fn add_ai_label_if_unlabeled(
        &self,
        image_id: i64,
        label: &str,
        confidence: f64,
    ) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let now = chrono::Utc::now().to_rfc3339();
        let changed = conn.execute(
            "INSERT INTO image_labels
                (image_id, label, confidence, is_manual, reviewed, created_at, updated_at)
             SELECT ?1, ?2, ?3, 0, 0, ?4, ?4
             WHERE NOT EXISTS (SELECT 1 FROM image_labels WHERE image_id = ?1)",
            params![image_id, label, confidence, now],
        )?;
        Ok((changed == 1).then(|| conn.last_insert_rowid()))
    }

    pub fn get_label(&self, id: i64) -> Result<Option<ImageLabel>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM image_labels WHERE id = ?1", LABEL_COLUMNS);
        let label = conn.query_row(&sql, params![id], label_from_row).optional()?;
        Ok(label)
    }

    /// Manual annotations first, then by descending confidence.
    pub fn get_labels(&self, image_id: i64) -> Result<Vec<ImageLabel>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM image_labels
             WHERE image_id = ?1
             ORDER BY is_manual DESC, confidence DESC, id ASC",
            LABEL_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let labels = stmt
            .query_map(params![image_id], label_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    pub fn count_labels(&self, image_id: i64) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM image_labels WHERE image_id = ?1",
            params![image_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Set `reviewed = 1`. Returns false only when the id does not exist;
    /// an already-reviewed row keeps its `updated_at`.
    pub fn mark_label_reviewed(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE image_labels
             SET updated_at = CASE WHEN reviewed = 1 THEN updated_at ELSE ?1 END,
                 reviewed = 1
             WHERE id = ?2",
            params![chrono::Utc::now().to_rfc3339(), id],
        )?;
        Ok(changed > 0)
    }

    /// Hard delete. Returns false when nothing matched.
    pub fn delete_label(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM image_labels WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // =========================================================================
    // Classification candidates and review queue
    // =========================================================================

    /// Processed images with zero annotations, at most `limit_per_group` per
    /// source group.
    pub fn get_unlabeled_images_per_group(&self, limit_per_group: i64) -> Result<Vec<UnlabeledImage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, source_group, file_path FROM (
                 SELECT i.id, i.source_group, i.file_path,
                        ROW_NUMBER() OVER (PARTITION BY i.source_group ORDER BY i.id) AS rn
                 FROM images i
                 WHERE i.process_status = 'processed'
                   AND i.file_path IS NOT NULL
                   AND NOT EXISTS (SELECT 1 FROM image_labels il WHERE il.image_id = i.id)
             )
             WHERE rn <= ?1
             ORDER BY source_group, id",
        )?;
        let images = stmt
            .query_map(params![limit_per_group], |row| {
                Ok(UnlabeledImage {
                    id: row.get(0)?,
                    source_group: row.get(1)?,
                    file_path: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(images)
    }

    /// Images with at least one unreviewed annotation of the requested
    /// provenance, optionally restricted to a group.
    pub fn get_review_queue(
        &self,
        provenance: ProvenanceFilter,
        group: Option<&GroupFilter>,
    ) -> Result<Vec<ReviewItem>> {
        let conn = self.lock()?;

        let label_cols = LABEL_COLUMNS
            .split(", ")
            .map(|c| format!("il.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let image_cols = IMAGE_COLUMNS
            .split(',')
            .map(|c| format!("i.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {}, {} FROM image_labels il
             JOIN images i ON i.id = il.image_id
             WHERE il.reviewed = 0
             ORDER BY i.id, il.is_manual DESC, il.confidence DESC, il.id",
            label_cols, image_cols
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let label = label_from_row(row)?;
                let image = image_at(row, 8)?;
                Ok((image, label))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut queue: Vec<ReviewItem> = Vec::new();
        for (image, label) in rows {
            if !provenance.accepts(label.is_manual) {
                continue;
            }
            if let Some(filter) = group {
                if !filter.matches(&image.category, &image.source_group) {
                    continue;
                }
            }
            match queue.last_mut() {
                Some(item) if item.image.id == image.id => item.pending_labels.push(label),
                _ => queue.push(ReviewItem {
                    image,
                    pending_labels: vec![label],
                }),
            }
        }
        Ok(queue)
    }

    /// Annotations usable as training data: manual or reviewed.
    pub fn get_labeled_images_for_training(&self) -> Result<Vec<TrainingSample>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT il.image_id, i.file_path, il.label, il.is_manual
             FROM image_labels il
             JOIN images i ON il.image_id = i.id
             WHERE (il.is_manual = 1 OR il.reviewed = 1) AND i.file_path IS NOT NULL
             ORDER BY il.image_id, il.id",
        )?;
        let samples = stmt
            .query_map([], |row| {
                Ok(TrainingSample {
                    image_id: row.get(0)?,
                    file_path: row.get(1)?,
                    label: row.get(2)?,
                    is_manual: row.get::<_, i32>(3)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    pub fn get_label_stats(&self) -> Result<LabelStats> {
        let conn = self.lock()?;
        let (total_labeled, total_manual, total_ai, total_reviewed) = conn.query_row(
            "SELECT
                COUNT(DISTINCT image_id),
                COALESCE(SUM(is_manual = 1), 0),
                COALESCE(SUM(is_manual = 0), 0),
                COALESCE(SUM(reviewed = 1), 0)
             FROM image_labels",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        let (total_images, total_unlabeled) = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(NOT EXISTS (SELECT 1 FROM image_labels il WHERE il.image_id = i.id)), 0)
             FROM images i
             WHERE i.process_status = 'processed'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(LabelStats {
            total_images,
            total_labeled,
            total_unlabeled,
            total_manual,
            total_ai,
            total_reviewed,
        })
    }
}

fn label_from_row(row: &Row) -> rusqlite::Result<ImageLabel> {
    Ok(ImageLabel {
        id: row.get(0)?,
        image_id: row.get(1)?,
        label: row.get(2)?,
        confidence: row.get(3)?,
        is_manual: row.get::<_, i32>(4)? != 0,
        reviewed: row.get::<_, i32>(5)? != 0,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
