pub mod labels;
pub mod models;


use crate::category;
use crate::config::CategoryConfig;
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub use models::*;

/// Column list shared by every query that builds an `ImageRecord`.
const IMAGE_COLUMNS: &str = "id, url, alt_text, source_group, category, file_name, file_path,
    file_size, width, height, checksum, budget_met, download_status, process_status,
    error_message, created_at, updated_at";

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=5000;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                alt_text TEXT NOT NULL DEFAULT '',
                source_group TEXT NOT NULL,
                category TEXT NOT NULL,
                file_name TEXT,
                file_path TEXT,
                file_size INTEGER,
                width INTEGER,
                height INTEGER,
                checksum TEXT,
                budget_met INTEGER,
                download_status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (download_status IN ('pending', 'downloading', 'downloaded', 'failed')),
                process_status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (process_status IN ('pending', 'processing', 'processed', 'failed')),
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK (process_status = 'pending' OR download_status = 'downloaded')
            );

            CREATE INDEX IF NOT EXISTS idx_images_status
                ON images(download_status, process_status);
            CREATE INDEX IF NOT EXISTS idx_images_category ON images(category);
            CREATE INDEX IF NOT EXISTS idx_images_source_group ON images(source_group);

            -- Annotations. No uniqueness on (image_id, label): duplicates are allowed.
            CREATE TABLE IF NOT EXISTS image_labels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                image_id INTEGER NOT NULL,
                label TEXT NOT NULL,
                confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
                is_manual INTEGER NOT NULL DEFAULT 0,
                reviewed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (image_id) REFERENCES images(id)
            );

            CREATE INDEX IF NOT EXISTS idx_image_labels_image ON image_labels(image_id);
            CREATE INDEX IF NOT EXISTS idx_image_labels_review
                ON image_labels(reviewed, is_manual);
            "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Ingest
    // =========================================================================

    /// Insert discovered URLs as pending records. Duplicate URLs are skipped
    /// silently; the category is derived here, once.
    pub fn insert_discovered(
        &self,
        images: &[DiscoveredImage],
        categories: &CategoryConfig,
    ) -> Result<IngestReport> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();
        let mut report = IngestReport::default();

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO images
                    (url, alt_text, source_group, category, download_status, process_status,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', 'pending', ?5, ?5)",
            )?;

            for image in images {
                let url = image.url.trim();
                if url.is_empty() {
                    log::warn!("Skipping discovered image with empty URL");
                    report.invalid += 1;
                    continue;
                }
                let category = category::derive_category(
                    &image.source_group,
                    &categories.rules,
                    &categories.fallback,
                );
                let changed =
                    stmt.execute(params![url, image.alt_text, image.source_group, category, now])?;
                if changed == 0 {
                    report.duplicates += 1;
                } else {
                    report.inserted += 1;
                }
            }
        }

        tx.commit()?;
        Ok(report)
    }

    // =========================================================================
    // Image queries
    // =========================================================================

    pub fn get_image(&self, id: i64) -> Result<Option<ImageRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM images WHERE id = ?1", IMAGE_COLUMNS);
        let image = conn
            .query_row(&sql, params![id], image_from_row)
            .optional()?;
        Ok(image)
    }

    pub fn get_image_by_url(&self, url: &str) -> Result<Option<ImageRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM images WHERE url = ?1", IMAGE_COLUMNS);
        let image = conn
            .query_row(&sql, params![url], image_from_row)
            .optional()?;
        Ok(image)
    }

    /// Page through records, optionally restricted to one category.
    /// Returns the page plus the total matching count.
    pub fn get_images(
        &self,
        category: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ImageRecord>, i64)> {
        let conn = self.lock()?;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM images WHERE ?1 IS NULL OR category = ?1",
            params![category],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM images
             WHERE ?1 IS NULL OR category = ?1
             ORDER BY id
             LIMIT ?2 OFFSET ?3",
            IMAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let images = stmt
            .query_map(params![category, limit, offset], image_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((images, total))
    }

    pub fn get_images_by_status(
        &self,
        download_status: Option<DownloadStatus>,
        process_status: Option<ProcessStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<ImageRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM images
             WHERE (?1 IS NULL OR download_status = ?1)
               AND (?2 IS NULL OR process_status = ?2)
             ORDER BY id
             LIMIT ?3",
            IMAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let images = stmt
            .query_map(
                params![
                    download_status.map(|s| s.as_str()),
                    process_status.map(|s| s.as_str()),
                    limit.unwrap_or(-1)
                ],
                image_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(images)
    }

    // =========================================================================
    // Download lifecycle
    // =========================================================================

    /// Claim records for a download pass: `pending` (and `failed` when asked)
    /// move to `downloading` in one statement, so two overlapping passes never
    /// receive the same record.
    pub fn claim_downloads(&self, limit: Option<i64>, include_failed: bool) -> Result<Vec<ImageRecord>> {
        let conn = self.lock()?;
        let now = chrono::Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE images SET download_status = 'downloading', updated_at = ?1
             WHERE id IN (
                 SELECT id FROM images
                 WHERE download_status = 'pending'
                    OR (?2 = 1 AND download_status = 'failed')
                 ORDER BY id
                 LIMIT ?3
             )
             RETURNING {}",
            IMAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut images = stmt
            .query_map(
                params![now, include_failed as i32, limit.unwrap_or(-1)],
                image_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        images.sort_by_key(|i| i.id);
        Ok(images)
    }

    pub fn mark_downloaded(&self, id: i64, file: &DownloadedFile) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE images SET download_status = 'downloaded', file_name = ?1, file_path = ?2,
                    file_size = ?3, checksum = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                file.file_name,
                file.file_path,
                file.file_size,
                file.checksum,
                chrono::Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }

    pub fn mark_download_failed(&self, id: i64, error: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE images SET download_status = 'failed', error_message = ?1, updated_at = ?2
             WHERE id = ?3",
            params![error, chrono::Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    // =========================================================================
    // Process lifecycle
    // =========================================================================

    /// Claim downloaded records for a normalize pass (`pending`, plus `failed`
    /// when asked) by moving them to `processing`.
    pub fn claim_processing(&self, limit: Option<i64>, include_failed: bool) -> Result<Vec<ImageRecord>> {
        let conn = self.lock()?;
        let now = chrono::Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE images SET process_status = 'processing', updated_at = ?1
             WHERE id IN (
                 SELECT id FROM images
                 WHERE download_status = 'downloaded'
                   AND (process_status = 'pending'
                        OR (?2 = 1 AND process_status = 'failed'))
                 ORDER BY id
                 LIMIT ?3
             )
             RETURNING {}",
            IMAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut images = stmt
            .query_map(
                params![now, include_failed as i32, limit.unwrap_or(-1)],
                image_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        images.sort_by_key(|i| i.id);
        Ok(images)
    }

    /// Claim a single record. Only `pending` or `failed` records can be
    /// claimed; returns false otherwise or if it is not downloaded.
    pub fn begin_processing(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE images SET process_status = 'processing', updated_at = ?1
             WHERE id = ?2 AND download_status = 'downloaded'
               AND process_status IN ('pending', 'failed')",
            params![chrono::Utc::now().to_rfc3339(), id],
        )?;
        Ok(changed == 1)
    }

    pub fn mark_processed(&self, id: i64, file: &ProcessedFile) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE images SET process_status = 'processed', file_name = ?1, file_path = ?2,
                    file_size = ?3, width = ?4, height = ?5, budget_met = ?6, updated_at = ?7
             WHERE id = ?8 AND download_status = 'downloaded'",
            params![
                file.file_name,
                file.file_path,
                file.file_size,
                file.width,
                file.height,
                file.budget_met as i32,
                chrono::Utc::now().to_rfc3339(),
                id
            ],
        )?;
        if changed == 0 {
            return Err(anyhow!("image {} is not in a downloaded state", id));
        }
        Ok(())
    }

    pub fn mark_process_failed(&self, id: i64, error: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE images SET process_status = 'failed', error_message = ?1, updated_at = ?2
             WHERE id = ?3 AND download_status = 'downloaded'",
            params![error, chrono::Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Return records stuck mid-pass (after a crash) to `pending`.
    ///
    /// Only claims untouched for at least `older_than` are reset, so a pass
    /// still running in another process keeps its records. A zero duration
    /// resets every claim.
    pub fn reset_interrupted(&self, older_than: chrono::Duration) -> Result<usize> {
        let conn = self.lock()?;
        let now = chrono::Utc::now();
        let cutoff = now
            .checked_sub_signed(older_than)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
            .to_rfc3339();
        let now = now.to_rfc3339();
        let downloads = conn.execute(
            "UPDATE images SET download_status = 'pending', updated_at = ?1
             WHERE download_status = 'downloading' AND updated_at <= ?2",
            params![now, cutoff],
        )?;
        let processing = conn.execute(
            "UPDATE images SET process_status = 'pending', updated_at = ?1
             WHERE process_status = 'processing' AND updated_at <= ?2",
            params![now, cutoff],
        )?;
        let count = downloads + processing;
        if count > 0 {
            log::info!(
                "Reset {} interrupted records ({} downloading, {} processing)",
                count,
                downloads,
                processing
            );
        }
        Ok(count)
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub fn get_stats(&self) -> Result<CurationStats> {
        let conn = self.lock()?;
        let stats = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(download_status = 'downloaded'), 0),
                COALESCE(SUM(process_status = 'processed'), 0),
                COALESCE(SUM(download_status = 'failed'), 0),
                COALESCE(SUM(process_status = 'failed'), 0),
                COALESCE(SUM(process_status = 'processed' AND budget_met = 0), 0),
                COALESCE(AVG(CASE WHEN process_status = 'processed' AND file_size > 0
                                  THEN file_size END), 0.0)
             FROM images",
            [],
            |row| {
                Ok(CurationStats {
                    total_collected: row.get(0)?,
                    total_downloaded: row.get(1)?,
                    total_processed: row.get(2)?,
                    download_failed: row.get(3)?,
                    process_failed: row.get(4)?,
                    over_budget: row.get(5)?,
                    average_file_size: row.get(6)?,
                })
            },
        )?;
        Ok(stats)
    }

    pub fn get_category_stats(&self) -> Result<Vec<CategoryCount>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT category, COUNT(*) FROM images GROUP BY category ORDER BY COUNT(*) DESC, category",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok(CategoryCount {
                    category: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }
}

fn image_from_row(row: &Row) -> rusqlite::Result<ImageRecord> {
    image_at(row, 0)
}

/// Build an `ImageRecord` from `IMAGE_COLUMNS` starting at column `offset`.
fn image_at(row: &Row, offset: usize) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(offset)?,
        url: row.get(offset + 1)?,
        alt_text: row.get(offset + 2)?,
        source_group: row.get(offset + 3)?,
        category: row.get(offset + 4)?,
        file_name: row.get(offset + 5)?,
        file_path: row.get(offset + 6)?,
        file_size: row.get(offset + 7)?,
        width: row.get(offset + 8)?,
        height: row.get(offset + 9)?,
        checksum: row.get(offset + 10)?,
        budget_met: row.get::<_, Option<i32>>(offset + 11)?.map(|v| v != 0),
        download_status: row.get::<_, String>(offset + 12)?.into(),
        process_status: row.get::<_, String>(offset + 13)?.into(),
        error_message: row.get(offset + 14)?,
        created_at: row.get(offset + 15)?,
        updated_at: row.get(offset + 16)?,
    })
}
