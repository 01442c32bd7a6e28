pub mod config;
pub mod initialization;
pub mod logging_system;

pub use config::{Config, ConfigError, LogFormat, LogLevel, OutputFormat};
pub use initialization::InitializationError;
pub use logging_system::{LoggingSystem, setup_logging_safe};

use anyhow::Context;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::DataResponse;
use crate::service::{DataService, export_to_csv, export_to_parquet};

pub struct App {
    config: Config,
    service: DataService,
}

impl App {
    pub fn from_args<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args(args)?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let taxonomy = Arc::new(config.load_taxonomy()?);
        let service = DataService::new(config.service_config(), taxonomy).map_err(|e| {
            InitializationError::ComponentInitFailed {
                component: "data service".to_string(),
                source: Box::new(e),
            }
        })?;

        info!(
            base_url = %config.base_url,
            fallback_dir = %config.fallback_dir.display(),
            cache_ttl_secs = config.cache_ttl_secs,
            cache_max_size = config.cache_max_size,
            "Data service ready"
        );

        Ok(Self { config, service })
    }

    pub fn service(&self) -> &DataService {
        &self.service
    }

    /// Runs the configured query and renders the result.
    pub async fn run(&self) -> anyhow::Result<DataResponse> {
        let query = self.config.query();
        let response = self
            .service
            .get_data(&query)
            .await
            .context("query rejected")?;

        if let Some(message) = &response.error {
            warn!(category = %query.category, error = %message, "No data available");
        }

        self.render(&response)?;
        Ok(response)
    }

    fn render(&self, response: &DataResponse) -> anyhow::Result<()> {
        match (self.config.format, &self.config.output) {
            (OutputFormat::Json, None) => {
                let body = serde_json::to_string_pretty(response)?;
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{body}")?;
            }
            (OutputFormat::Json, Some(path)) => {
                let body = serde_json::to_string_pretty(response)?;
                std::fs::write(path, body)
                    .with_context(|| format!("writing {}", path.display()))?;
                info!(path = %path.display(), records = response.total_records, "Wrote JSON");
            }
            (OutputFormat::Csv, Some(path)) => {
                export_to_csv(&response.data, path)
                    .with_context(|| format!("exporting CSV to {}", path.display()))?;
            }
            (OutputFormat::Parquet, Some(path)) => {
                export_to_parquet(&response.data, path)
                    .with_context(|| format!("exporting Parquet to {}", path.display()))?;
            }
            (format, None) => anyhow::bail!("{format:?} output needs --output"),
        }
        Ok(())
    }
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub async fn main() -> anyhow::Result<()> {
    let config = match Config::from_args(std::env::args_os()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            process::exit(2);
        }
    };

    if let Err(e) = setup_logging_safe(
        config.log_level,
        config.log_format,
        config.log_directives.as_deref(),
    ) {
        eprintln!("Warning: {e}");
    }
    info!("Starting vini-data v{}", get_version());

    let app = App::from_config(config)?;
    match app.run().await {
        Ok(response) if response.is_error() => process::exit(1),
        Ok(_) => Ok(()),
        Err(e) => {
            error!("Application error: {e:#}");
            process::exit(1);
        }
    }
}
