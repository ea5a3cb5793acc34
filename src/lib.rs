pub mod category;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod jobs;
pub mod review;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

use classifier::ClassifierService;
use config::Config;
use database::Database;
use jobs::JobRegistry;
use review::ReviewWorkflow;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use worker::download::Downloader;
use worker::normalize::Normalizer;

/// Everything a boundary operation needs, built once at startup.
pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    pub downloader: Arc<Downloader>,
    pub normalizer: Arc<Normalizer>,
    pub classifier: Arc<ClassifierService>,
    pub review: Arc<ReviewWorkflow>,
    pub jobs: JobRegistry,
}

impl AppState {
    /// Open the store under `config.data_dir` and talk to the configured
    /// inference service over HTTP.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let classifier = Arc::new(ClassifierService::http(&config.classifier)?);
        Self::with_classifier(config, classifier)
    }

    pub fn with_classifier(config: Config, classifier: Arc<ClassifierService>) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(config.raw_dir())?;
        std::fs::create_dir_all(config.processed_dir())?;

        let db = Database::new(&config.db_path())?;

        // Records left mid-pass by a crash go back to pending
        match db.reset_interrupted(config.stale_claim_age()) {
            Ok(count) if count > 0 => log::info!("Startup cleanup: reset {} interrupted records", count),
            Ok(_) => {}
            Err(e) => log::warn!("Failed to reset interrupted records: {}", e),
        }

        let db = Arc::new(db);
        let downloader = Arc::new(Downloader::new(
            db.clone(),
            &config.download,
            config.raw_dir(),
        )?);
        let normalizer = Arc::new(Normalizer::new(
            db.clone(),
            config.process.clone(),
            config.processed_dir(),
        ));
        let review = Arc::new(ReviewWorkflow::new(
            db.clone(),
            classifier.clone(),
            config.classifier.clone(),
        ));

        log::info!("Dataset store opened at {}", config.db_path().display());

        Ok(Self {
            config,
            db,
            downloader,
            normalizer,
            classifier,
            review,
            jobs: JobRegistry::new(),
        })
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`
/// filter; `log` macros are bridged into it.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
