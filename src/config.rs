//! Runtime configuration.
//!
//! Loaded from `config.yaml` in the project directory, with a couple of
//! `.env` overrides. Every field has a default so a missing file is fine.

use crate::category::CategoryRule;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Claims older than this are treated as left behind by a crashed pass
    /// and reset when the store is opened.
    pub stale_claim_secs: u64,
    pub download: DownloadConfig,
    pub process: ProcessConfig,
    pub classifier: ClassifierConfig,
    pub categories: CategoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
}

/// Normalization targets. `max_file_size` is the byte budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub max_file_size: u64,
    pub quality_max: u8,
    pub quality_min: u8,
    pub quality_step: u8,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub batch_size: usize,
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    pub rules: Vec<CategoryRule>,
    pub fallback: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dataset-curator");
        Self {
            data_dir,
            stale_claim_secs: 6 * 60 * 60,
            download: DownloadConfig::default(),
            process: ProcessConfig::default(),
            classifier: ClassifierConfig::default(),
            categories: CategoryConfig::default(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            max_width: 500,
            max_height: 500,
            max_file_size: 50 * 1024,
            quality_max: 80,
            quality_min: 50,
            quality_step: 5,
            max_attempts: 10,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8500".to_string(),
            timeout_secs: 60,
            batch_size: 8,
            top_k: 1,
        }
    }
}

impl Default for CategoryConfig {
    fn default() -> Self {
        let table = [
            ("Chinese cuisine", "China"),
            ("Japanese sushi", "Japan"),
            ("Italian pizza", "Italy"),
            ("French cuisine", "France"),
            ("Mexican tacos", "Mexico"),
            ("Indian curry", "India"),
            ("Thai food", "Thailand"),
            ("Korean kimchi", "Korea"),
            ("Vietnamese pho", "Vietnam"),
            ("Spanish paella", "Spain"),
            ("Greek traditional", "Greece"),
            ("Turkish kebab", "Turkey"),
            ("Brazilian feijoada", "Brazil"),
            ("American burger", "USA"),
            ("British fish", "UK"),
        ];
        Self {
            rules: table
                .iter()
                .map(|(pattern, category)| CategoryRule::contains(*pattern, *category))
                .collect(),
            fallback: "Others".to_string(),
        }
    }
}

impl Config {
    /// Load `config.yaml` from `project_dir` (defaults if absent), then apply
    /// `.env` overrides.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE_NAME);
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            serde_yaml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            log::info!("No {} found, using defaults", CONFIG_FILE_NAME);
            Config::default()
        };

        if let Some(dir) = load_env_value(project_dir, "CURATOR_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = load_env_value(project_dir, "CURATOR_INFERENCE_URL") {
            config.classifier.base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.process;
        if p.quality_min == 0 || p.quality_max > 100 || p.quality_min > p.quality_max {
            anyhow::bail!(
                "process quality range must satisfy 1 <= min <= max <= 100 (got {}..{})",
                p.quality_min,
                p.quality_max
            );
        }
        if p.quality_step == 0 {
            anyhow::bail!("process.quality_step must be positive");
        }
        if p.max_width == 0 || p.max_height == 0 || p.max_file_size == 0 {
            anyhow::bail!("process dimensions and max_file_size must be positive");
        }
        if self.download.concurrency == 0 {
            anyhow::bail!("download.concurrency must be positive");
        }
        if self.classifier.batch_size == 0 {
            anyhow::bail!("classifier.batch_size must be positive");
        }
        Ok(())
    }

    pub fn stale_claim_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_claim_secs.min(i64::MAX as u64 / 1000) as i64)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("images.db")
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("images").join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("images").join("processed")
    }
}

/// Load a value from the .env file by key name
pub fn load_env_value(project_dir: &Path, key: &str) -> Option<String> {
    let env_path = project_dir.join(".env");
    let prefix = format!("{}=", key);
    let content = std::fs::read_to_string(&env_path).ok()?;
    content.lines().find_map(|line| {
        let value = line
            .trim()
            .strip_prefix(&prefix)?
            .trim()
            .trim_matches('"')
            .trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_no_file() {
        let temp = TempDir::new().unwrap();
        let config = Config::load(temp.path()).unwrap();
        assert_eq!(config.process.max_width, 500);
        assert_eq!(config.process.max_file_size, 51200);
        assert_eq!(config.process.quality_max, 80);
        assert_eq!(config.process.quality_min, 50);
        assert_eq!(config.download.concurrency, 10);
        assert_eq!(config.categories.rules.len(), 15);
        assert_eq!(config.stale_claim_age(), chrono::Duration::hours(6));
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "process:\n  max_file_size: 10240\ndownload:\n  concurrency: 4\n",
        )
        .unwrap();

        let config = Config::load(temp.path()).unwrap();
        assert_eq!(config.process.max_file_size, 10240);
        assert_eq!(config.process.quality_step, 5);
        assert_eq!(config.download.concurrency, 4);
        assert_eq!(config.download.timeout_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".env"),
            "OTHER=1\nCURATOR_DATA_DIR=\"/tmp/curator-data\"\nCURATOR_INFERENCE_URL='http://10.0.0.2:9000'\n",
        )
        .unwrap();

        let config = Config::load(temp.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/curator-data"));
        assert_eq!(config.classifier.base_url, "http://10.0.0.2:9000");
        assert_eq!(config.db_path(), PathBuf::from("/tmp/curator-data/images.db"));
    }

    #[test]
    fn test_category_rules_from_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "categories:\n  fallback: Misc\n  rules:\n    - pattern: '^(ramen|udon)'\n      category: Japan\n      match_type: regex\n",
        )
        .unwrap();
        let config = Config::load(temp.path()).unwrap();
        assert_eq!(config.categories.rules.len(), 1);
        assert_eq!(config.categories.rules[0].category(), "Japan");
        assert!(config.categories.rules[0].matches("udon noodle soup"));

        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "categories:\n  rules:\n    - pattern: '(['\n      category: X\n      match_type: regex\n",
        )
        .unwrap();
        assert!(Config::load(temp.path()).is_err());
    }

    #[test]
    fn test_invalid_quality_range_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "process:\n  quality_min: 90\n  quality_max: 80\n",
        )
        .unwrap();
        assert!(Config::load(temp.path()).is_err());
    }
}
