// Dataset curator CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dataset_curator::category::GroupFilter;
use dataset_curator::commands::{self, ReviewQueueQuery};
use dataset_curator::config::Config;
use dataset_curator::database::{DiscoveredImage, ProvenanceFilter};
use dataset_curator::AppState;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "curator")]
#[command(about = "Collect, normalize and label an image dataset", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding config.yaml and .env (defaults to current directory)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert discovered images from a JSON array of {url, altText, sourceGroup}
    Ingest {
        /// Path to the JSON file
        file: PathBuf,
    },

    /// Download pending images
    Download {
        /// Maximum records to claim
        #[arg(long)]
        limit: Option<i64>,
        /// Also re-select records whose last download failed
        #[arg(long)]
        retry_failed: bool,
    },

    /// Resize and compress downloaded images
    Normalize {
        /// Maximum records to claim
        #[arg(long)]
        limit: Option<i64>,
        /// Also re-select records whose last normalize failed
        #[arg(long)]
        retry_failed: bool,
    },

    /// Label unannotated images with the inference service's top prediction
    Classify {
        /// Images per source group
        #[arg(long, default_value = "10")]
        per_group: i64,
    },

    /// List images waiting for review
    Review {
        /// Which annotations to list by provenance
        #[arg(long, value_enum, default_value_t = FilterArg::All)]
        filter: FilterArg,
        /// Exact category key
        #[arg(long)]
        category: Option<String>,
        /// Substring match on source group
        #[arg(long, conflicts_with = "category")]
        group_contains: Option<String>,
    },

    /// Return records claimed by a killed pass to pending
    Recover {
        /// Only reset claims at least this many seconds old (0 resets all)
        #[arg(long, default_value = "0")]
        older_than: u64,
    },

    /// Show collection and label statistics
    Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FilterArg {
    Ai,
    Manual,
    All,
}

impl From<FilterArg> for ProvenanceFilter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::Ai => ProvenanceFilter::Ai,
            FilterArg::Manual => ProvenanceFilter::Manual,
            FilterArg::All => ProvenanceFilter::All,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dataset_curator::init_logging();
    let cli = Cli::parse();

    let project_dir = match cli.project {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let config = Config::load(&project_dir)?;
    tracing::debug!(project = %project_dir.display(), data_dir = %config.data_dir.display(), "configuration loaded");
    let state = AppState::open(config)?;

    match cli.command {
        Commands::Ingest { file } => cmd_ingest(&state, file).await,
        Commands::Download { limit, retry_failed } => {
            let outcome = state.downloader.download_pending(limit, retry_failed).await?;
            println!(
                "Downloaded {} of {} ({} failed)",
                outcome.succeeded, outcome.total, outcome.failed
            );
            Ok(())
        }
        Commands::Normalize { limit, retry_failed } => {
            let normalizer = state.normalizer.clone();
            let outcome =
                tokio::task::spawn_blocking(move || normalizer.normalize_pending(limit, retry_failed))
                    .await??;
            println!(
                "Processed {} of {} ({} failed)",
                outcome.succeeded, outcome.total, outcome.failed
            );
            Ok(())
        }
        Commands::Classify { per_group } => {
            let report = state.review.batch_classify(per_group, None).await?;
            println!(
                "Classified {} candidates: {} labeled, {} skipped, {} failed",
                report.candidates, report.labeled, report.skipped, report.failed
            );
            Ok(())
        }
        Commands::Review {
            filter,
            category,
            group_contains,
        } => cmd_review(&state, filter.into(), category, group_contains).await,
        Commands::Recover { older_than } => {
            let count = commands::recover_interrupted(&state, older_than).await?;
            println!("Reset {} interrupted records", count);
            Ok(())
        }
        Commands::Stats => cmd_stats(&state).await,
    }
}

async fn cmd_ingest(state: &AppState, file: PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let images: Vec<DiscoveredImage> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let report = commands::ingest(state, images).await?;
    println!(
        "Inserted {} new images ({} duplicates, {} invalid)",
        report.inserted, report.duplicates, report.invalid
    );
    Ok(())
}

async fn cmd_review(
    state: &AppState,
    filter: ProvenanceFilter,
    category: Option<String>,
    group_contains: Option<String>,
) -> Result<()> {
    let group = category
        .map(GroupFilter::Category)
        .or(group_contains.map(GroupFilter::Fuzzy));

    let queue = commands::get_review_queue(state, Some(ReviewQueueQuery { filter, group })).await?;
    if queue.is_empty() {
        println!("Nothing to review");
        return Ok(());
    }
    for item in queue {
        println!(
            "#{} [{}] {}",
            item.image.id,
            item.image.category,
            item.image.file_path.as_deref().unwrap_or(&item.image.url)
        );
        for label in item.pending_labels {
            println!(
                "    label {}: {} ({:.2}, {})",
                label.id,
                label.label,
                label.confidence,
                if label.is_manual { "manual" } else { "ai" }
            );
        }
    }
    Ok(())
}

async fn cmd_stats(state: &AppState) -> Result<()> {
    let stats = commands::get_stats(state).await?;
    println!("Collected:   {}", stats.total_collected);
    println!("Downloaded:  {} ({} failed)", stats.total_downloaded, stats.download_failed);
    println!(
        "Processed:   {} ({} failed, {} over budget)",
        stats.total_processed, stats.process_failed, stats.over_budget
    );
    println!("Avg size:    {:.1} KB", stats.average_file_size / 1024.0);

    println!();
    for row in commands::get_category_stats(state).await? {
        println!("  {:<12} {}", row.category, row.count);
    }

    let labels = commands::get_label_stats(state).await?;
    println!();
    println!(
        "Labeled:     {} of {} processed ({} manual, {} ai, {} reviewed)",
        labels.total_labeled, labels.total_images, labels.total_manual, labels.total_ai, labels.total_reviewed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review_filter(args: &[&str]) -> Result<FilterArg, clap::Error> {
        let cli = Cli::try_parse_from(args.iter().copied())?;
        match cli.command {
            Commands::Review { filter, .. } => Ok(filter),
            _ => panic!("expected review subcommand"),
        }
    }

    #[test]
    fn test_review_filter_parses_to_provenance() {
        assert_eq!(review_filter(&["curator", "review"]).unwrap(), FilterArg::All);
        let ai = review_filter(&["curator", "review", "--filter", "ai"]).unwrap();
        assert_eq!(ProvenanceFilter::from(ai), ProvenanceFilter::Ai);
        let manual = review_filter(&["curator", "review", "--filter", "manual"]).unwrap();
        assert_eq!(ProvenanceFilter::from(manual), ProvenanceFilter::Manual);
    }

    #[test]
    fn test_review_filter_rejects_unknown_value() {
        let err = review_filter(&["curator", "review", "--filter", "robots"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_group_options_conflict() {
        assert!(Cli::try_parse_from([
            "curator",
            "review",
            "--category",
            "Japan",
            "--group-contains",
            "sushi"
        ])
        .is_err());
    }
}
