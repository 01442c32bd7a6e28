use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::client::{FetcherConfig, RetryPolicy};
use crate::domain::{Category, DataQuery, Taxonomy};
use crate::reliability::CacheConfig;
use crate::scraper::ScraperConfig;
use crate::service::DataServiceConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    Env(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Shape of emitted log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single line
    #[default]
    Compact,
    /// One JSON object per line
    Json,
}

/// Rendering of a query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Full response envelope as JSON
    #[default]
    Json,
    /// Cleaned records as CSV
    Csv,
    /// Cleaned records as Parquet
    Parquet,
}

const DEFAULT_BASE_URL: &str = "http://vitibrasil.cnpuv.embrapa.br/index.php";

fn default_category() -> Category {
    Category::Producao
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about = "Grape and wine statistics from the VitiBrasil portal", long_about = None)]
#[serde(default)]
pub struct Config {
    /// Upstream portal base URL
    #[arg(long, env = "VITIBRASIL_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Fresh cache entry lifetime in seconds
    #[arg(long, env = "CACHE_TTL", default_value = "86400")]
    pub cache_ttl_secs: u64,

    /// Fresh cache capacity (historical store holds twice as many)
    #[arg(long, env = "CACHE_MAX_SIZE", default_value = "100")]
    pub cache_max_size: usize,

    /// Directory holding the bundled CSV snapshots
    #[arg(long, env = "FALLBACK_DIR", default_value = "data/fallback")]
    pub fallback_dir: PathBuf,

    /// Per-request HTTP timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// HTTP attempts per page on retryable failures
    #[arg(long, env = "HTTP_MAX_ATTEMPTS", default_value = "3")]
    pub max_attempts: u32,

    /// Base backoff between HTTP attempts in milliseconds
    #[arg(long, env = "HTTP_BACKOFF_MS", default_value = "1000")]
    pub backoff_base_ms: u64,

    /// Attempts per year before the year is skipped
    #[arg(long, env = "YEAR_RETRIES", default_value = "3")]
    pub year_retries: u32,

    /// Pause between consecutive year requests in milliseconds
    #[arg(long, env = "REQUEST_PAUSE_MS", default_value = "1000")]
    pub request_pause_ms: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Extra `target=level` filter directives, comma separated
    #[arg(long, env = "LOG_DIRECTIVES")]
    pub log_directives: Option<String>,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Taxonomy definition in TOML (built-in when absent)
    #[arg(long, env = "TAXONOMY_FILE")]
    pub taxonomy_file: Option<PathBuf>,

    /// Category to query
    #[serde(skip, default = "default_category")]
    #[arg(long, default_value = "producao")]
    pub category: Category,

    /// First year of the range
    #[serde(skip)]
    #[arg(long, default_value = "2023")]
    pub start_year: i32,

    /// Last year of the range
    #[serde(skip)]
    #[arg(long, default_value = "2023")]
    pub end_year: i32,

    #[serde(skip)]
    #[arg(long)]
    pub subcategory: Option<String>,

    #[serde(skip)]
    #[arg(long)]
    pub region: Option<String>,

    #[serde(skip)]
    #[arg(long)]
    pub product_type: Option<String>,

    #[serde(skip)]
    #[arg(long)]
    pub channel: Option<String>,

    #[serde(skip)]
    #[arg(long)]
    pub origin: Option<String>,

    #[serde(skip)]
    #[arg(long)]
    pub destination: Option<String>,

    /// Output format
    #[serde(skip)]
    #[arg(long, default_value = "json")]
    pub format: OutputFormat,

    /// Output path (stdout for JSON when omitted)
    #[serde(skip)]
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub cache_ttl: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub request_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub backoff_base: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub request_pause: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_ttl_secs: 86_400,
            cache_max_size: 100,
            fallback_dir: PathBuf::from("data/fallback"),
            request_timeout_secs: 30,
            max_attempts: 3,
            backoff_base_ms: 1000,
            year_retries: 3,
            request_pause_ms: 1000,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            log_directives: None,
            config_file: None,
            taxonomy_file: None,
            category: default_category(),
            start_year: 2023,
            end_year: 2023,
            subcategory: None,
            region: None,
            product_type: None,
            channel: None,
            origin: None,
            destination: None,
            format: OutputFormat::Json,
            output: None,
            cache_ttl: Duration::from_secs(86_400),
            request_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_millis(1000),
            request_pause: Duration::from_millis(1000),
        }
    }
}

impl Config {
    /// Parses CLI arguments (environment variables fill unset flags). When a
    /// config file is named, its settings replace the flag values while the
    /// query and output choice still come from the command line.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Config::parse_from(args);
        let mut config = match &cli.config_file {
            Some(path) => Self::from_file(path)?.with_query_from(&cli),
            None => cli,
        };
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// Settings from environment variables only, defaults elsewhere.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        load_env_string("VITIBRASIL_BASE_URL", &mut config.base_url);
        load_env_var("CACHE_TTL", &mut config.cache_ttl_secs)?;
        load_env_var("CACHE_MAX_SIZE", &mut config.cache_max_size)?;
        load_env_path("FALLBACK_DIR", &mut config.fallback_dir);
        load_env_var("REQUEST_TIMEOUT_SECS", &mut config.request_timeout_secs)?;
        load_env_var("HTTP_MAX_ATTEMPTS", &mut config.max_attempts)?;
        load_env_var("HTTP_BACKOFF_MS", &mut config.backoff_base_ms)?;
        load_env_var("YEAR_RETRIES", &mut config.year_retries)?;
        load_env_var("REQUEST_PAUSE_MS", &mut config.request_pause_ms)?;
        load_env_path_opt("CONFIG_FILE", &mut config.config_file);
        load_env_path_opt("TAXONOMY_FILE", &mut config.taxonomy_file);
        if let Ok(directives) = std::env::var("LOG_DIRECTIVES") {
            config.log_directives = Some(directives);
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = LogLevel::from_str(&level, true)
                .map_err(|_| ConfigError::Env(format!("Invalid LOG_LEVEL: {level}")))?;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.log_format = LogFormat::from_str(&format, true).map_err(|_| {
                ConfigError::Env(format!("Invalid LOG_FORMAT: {format}. Valid values: compact, json"))
            })?;
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// Copies the query and output selection from another config.
    #[must_use]
    pub fn with_query_from(mut self, other: &Config) -> Self {
        self.category = other.category;
        self.start_year = other.start_year;
        self.end_year = other.end_year;
        self.subcategory.clone_from(&other.subcategory);
        self.region.clone_from(&other.region);
        self.product_type.clone_from(&other.product_type);
        self.channel.clone_from(&other.channel);
        self.origin.clone_from(&other.origin);
        self.destination.clone_from(&other.destination);
        self.format = other.format;
        self.output.clone_from(&other.output);
        self
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.cache_ttl = Duration::from_secs(self.cache_ttl_secs);
        self.request_timeout = Duration::from_secs(self.request_timeout_secs);
        self.backoff_base = Duration::from_millis(self.backoff_base_ms);
        self.request_pause = Duration::from_millis(self.request_pause_ms);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidUrl("Base URL must not be empty".to_string()));
        }
        Url::parse(&self.base_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid base URL '{}': {e}", self.base_url))
        })?;

        if self.cache_max_size == 0 {
            return Err(ConfigError::Invalid(
                "Cache max size must be greater than 0".to_string(),
            ));
        }
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "Cache TTL must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "Request timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "HTTP max attempts must be greater than 0".to_string(),
            ));
        }
        if self.year_retries == 0 {
            return Err(ConfigError::Invalid(
                "Year retries must be greater than 0".to_string(),
            ));
        }

        if self.start_year > self.end_year {
            return Err(ConfigError::Invalid(format!(
                "Start year ({}) must not be after end year ({})",
                self.start_year, self.end_year
            )));
        }

        if self.format != OutputFormat::Json && self.output.is_none() {
            return Err(ConfigError::Invalid(format!(
                "--output is required for {:?} output",
                self.format
            )));
        }

        Ok(())
    }

    pub fn query(&self) -> DataQuery {
        DataQuery {
            category: self.category,
            start_year: self.start_year,
            end_year: self.end_year,
            region: self.region.clone(),
            product_type: self.product_type.clone(),
            subcategory: self.subcategory.clone(),
            channel: self.channel.clone(),
            origin: self.origin.clone(),
            destination: self.destination.clone(),
        }
    }

    pub fn service_config(&self) -> DataServiceConfig {
        DataServiceConfig {
            fetcher: FetcherConfig {
                timeout: self.request_timeout,
                retry: RetryPolicy::new(self.max_attempts, self.backoff_base),
                ..FetcherConfig::default()
            },
            scraper: ScraperConfig {
                base_url: self.base_url.clone(),
                year_retries: self.year_retries,
                year_backoff: self.backoff_base,
                request_pause: self.request_pause,
            },
            cache: CacheConfig {
                ttl: self.cache_ttl,
                max_size: self.cache_max_size,
            },
            fallback_dir: self.fallback_dir.clone(),
        }
    }

    pub fn load_taxonomy(&self) -> Result<Taxonomy, ConfigError> {
        match &self.taxonomy_file {
            Some(path) => {
                Taxonomy::from_toml_file(path).map_err(|e| ConfigError::Invalid(e.to_string()))
            }
            None => Ok(Taxonomy::builtin()),
        }
    }
}

/// Parses an environment variable into `target`; an unset variable keeps
/// the current value.
fn load_env_var<T>(name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(name) {
        *target = value
            .parse()
            .map_err(|e| ConfigError::Env(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

fn load_env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

fn load_env_path(name: &str, target: &mut PathBuf) {
    if let Ok(value) = std::env::var(name) {
        *target = PathBuf::from(value);
    }
}

fn load_env_path_opt(name: &str, target: &mut Option<PathBuf>) {
    if let Ok(value) = std::env::var(name) {
        *target = Some(PathBuf::from(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_query_and_defaults() {
        let config = Config::from_args([
            "vini-data",
            "--category",
            "processamento",
            "--start-year",
            "2019",
            "--end-year",
            "2020",
            "--subcategory",
            "viniferas",
        ])
        .unwrap();

        let query = config.query();
        assert_eq!(query.category, Category::Processamento);
        assert_eq!(query.start_year, 2019);
        assert_eq!(query.end_year, 2020);
        assert_eq!(query.subcategory.as_deref(), Some("viniferas"));
        assert_eq!(config.format, OutputFormat::Json);
    }

    #[test]
    fn unknown_category_is_rejected_by_the_parser() {
        let result = Config::try_parse_from(["vini-data", "--category", "vinagre"]);
        assert!(result.is_err());
    }

    #[test]
    fn inverted_range_fails_validation() {
        let config = Config {
            start_year: 2021,
            end_year: 2020,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn file_outputs_need_a_path() {
        let config = Config {
            format: OutputFormat::Parquet,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            format: OutputFormat::Csv,
            output: Some(PathBuf::from("out.csv")),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_capacity_and_bad_url_are_rejected() {
        let config = Config {
            cache_max_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            base_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn file_settings_with_cli_query() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "base_url = \"http://localhost:8080/index.php\"\ncache_max_size = 7\nrequest_pause_ms = 0"
        )
        .unwrap();

        let path = file.path().to_string_lossy().into_owned();
        let config = Config::from_args([
            "vini-data",
            "--config-file",
            path.as_str(),
            "--category",
            "exportacao",
        ])
        .unwrap();

        assert_eq!(config.base_url, "http://localhost:8080/index.php");
        assert_eq!(config.cache_max_size, 7);
        assert_eq!(config.request_pause, Duration::ZERO);
        assert_eq!(config.cache_ttl, Duration::from_secs(86_400));
        assert_eq!(config.category, Category::Exportacao);
    }

    #[test]
    fn service_config_carries_durations() {
        let mut config = Config {
            backoff_base_ms: 250,
            request_timeout_secs: 5,
            ..Config::default()
        };
        config.post_process().unwrap();

        let service = config.service_config();
        assert_eq!(service.fetcher.timeout, Duration::from_secs(5));
        assert_eq!(service.fetcher.retry.base_delay, Duration::from_millis(250));
        assert_eq!(service.scraper.year_backoff, Duration::from_millis(250));
        assert_eq!(service.cache.max_size, 100);
    }
}
