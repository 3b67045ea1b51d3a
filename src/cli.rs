use crate::config::{self, HarvestConfig};
use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Harvests a paginated product catalog into a relational store.",
    long_about = None
)]
pub struct CliArgs {
    #[arg(
        short, long,
        default_value = config::DEFAULT_CONFIG_FILE,
        value_name = "FILE_PATH",
        help = "TOML configuration file"
    )]
    config: String,

    #[arg(long, value_name = "FILE_PATH", help = "Also write logs to this file")]
    log_file: Option<String>,

    #[arg(
        long,
        help = "Rebuild the category id seed file from the taxonomy endpoints and exit",
        conflicts_with_all = ["report", "parse_file"]
    )]
    seed_categories: bool,

    #[arg(
        long,
        help = "Print the largest stored discounts and exit",
        conflicts_with = "parse_file"
    )]
    report: bool,

    #[arg(
        long,
        value_name = "FILE_PATH",
        help = "Run the parse step over a saved search response and exit"
    )]
    parse_file: Option<String>,

    #[arg(
        long,
        default_value = "parse_output.json",
        value_name = "OUTPUT_FILE",
        help = "Output file for --parse-file",
        requires = "parse_file"
    )]
    parse_output: String,

    #[arg(long, help = "Keep products in memory instead of writing to the database")]
    dry_run: bool,

    #[arg(long, value_name = "N", help = "Override processing.fetch_workers")]
    fetch_workers: Option<usize>,

    #[arg(long, value_name = "N", help = "Override processing.parse_workers")]
    parse_workers: Option<usize>,

    #[arg(long, value_name = "N", help = "Override processing.batch_size")]
    batch_size: Option<usize>,

    #[arg(long, value_name = "URL", help = "Override database.url")]
    database_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Harvest { dry_run: bool },
    SeedCategories,
    Report,
    ParseFile { input: PathBuf, output: PathBuf },
}

impl CliArgs {
    pub fn get_config_path(&self) -> PathBuf {
        PathBuf::from(&self.config)
    }

    pub fn get_log_file(&self) -> Option<PathBuf> {
        self.log_file.as_deref().map(PathBuf::from)
    }

    pub fn mode(&self) -> Mode {
        if let Some(input) = &self.parse_file {
            Mode::ParseFile {
                input: PathBuf::from(input),
                output: PathBuf::from(&self.parse_output),
            }
        } else if self.seed_categories {
            Mode::SeedCategories
        } else if self.report {
            Mode::Report
        } else {
            Mode::Harvest {
                dry_run: self.dry_run,
            }
        }
    }

    /// Applies command-line overrides on top of the loaded file (and env).
    pub fn apply_overrides(&self, config: &mut HarvestConfig) -> AppResult<()> {
        if let Some(n) = self.fetch_workers {
            config.processing.fetch_workers = n;
        }
        if let Some(n) = self.parse_workers {
            config.processing.parse_workers = n;
        }
        if let Some(n) = self.batch_size {
            config.processing.batch_size = n;
        }
        if let Some(url) = &self.database_url {
            if url.trim().is_empty() {
                return Err(AppError::Argument("--database-url must not be empty".into()));
            }
            config.database.url = url.clone();
        }
        if self.dry_run && self.mode() != (Mode::Harvest { dry_run: true }) {
            log(
                LogLevel::Warning,
                "Ignoring --dry-run: it only applies to a harvest run.",
            );
        }
        Ok(())
    }
}
