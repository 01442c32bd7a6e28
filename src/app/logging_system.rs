use parking_lot::RwLock;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use super::config::{LogFormat, LogLevel};
use super::initialization::{DirectiveRecovery, InitializationError, LogDirective};

/// Targets that are chatty at info and below.
const QUIET_TARGETS: [&str; 6] = ["hyper", "hyper_util", "reqwest", "html5ever", "selectors", "parquet"];

/// Collects `EnvFilter` directives and installs the global subscriber.
pub struct LoggingSystem {
    directives: RwLock<Vec<LogDirective>>,
    fallback_level: LogLevel,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: RwLock::new(Vec::new()),
            fallback_level: LogLevel::Info,
        }
    }

    /// Adds a `target=level` directive, replacing any earlier one for the
    /// same target. Malformed directives are skipped and unknown levels fall
    /// back to the default level.
    pub fn add_directive(&self, directive: &str) -> Result<(), InitializationError> {
        match LogDirective::parse(directive) {
            Ok(parsed) => {
                self.push(parsed);
                Ok(())
            }
            Err(e) => match e.directive_recovery() {
                DirectiveRecovery::UseDefaultLevel => {
                    eprintln!("Warning: {e}, using default level");
                    let target = directive.split('=').next().unwrap_or_default().trim();
                    self.push(LogDirective::new(target, self.fallback_level));
                    Ok(())
                }
                DirectiveRecovery::Skip => {
                    eprintln!("Warning: {e}, skipping directive");
                    Ok(())
                }
                DirectiveRecovery::Abort => Err(e),
            },
        }
    }

    /// Adds every entry of a comma-separated directive list.
    pub fn add_directive_list(&self, list: &str) -> Result<(), InitializationError> {
        list.split(',')
            .map(str::trim)
            .filter(|directive| !directive.is_empty())
            .try_for_each(|directive| self.add_directive(directive))
    }

    fn push(&self, directive: LogDirective) {
        let mut directives = self.directives.write();
        directives.retain(|existing| existing.target != directive.target);
        directives.push(directive);
    }

    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in QUIET_TARGETS {
            directives.push(LogDirective::new(target, LogLevel::Warn));
        }
    }

    /// `default_level` followed by every directive, comma separated.
    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();
        std::iter::once(default_level.as_str().to_string())
            .chain(directives.iter().map(LogDirective::to_filter_string))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Installs the global subscriber. `RUST_LOG`, when set and valid, wins
    /// over the collected directives.
    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        format: LogFormat,
    ) -> Result<(), InitializationError> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => {
                let filter_string = self.build_filter_string(default_level);
                EnvFilter::try_new(&filter_string).map_err(|e| {
                    InitializationError::LoggingInitFailed {
                        details: format!("Failed to create EnvFilter with '{filter_string}'"),
                        source: Box::new(e),
                    }
                })?
            }
        };

        let registry = tracing_subscriber::registry().with(env_filter);
        let installed = match format {
            LogFormat::Compact => tracing::subscriber::set_global_default(
                registry.with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_level(true)
                        .compact(),
                ),
            ),
            LogFormat::Json => tracing::subscriber::set_global_default(
                registry.with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .json()
                        .with_current_span(false),
                ),
            ),
        };

        installed.map_err(|e| InitializationError::LoggingInitFailed {
            details: "Failed to set global tracing subscriber".to_string(),
            source: Box::new(e),
        })
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs logging once per process. `directives` is a comma-separated
/// `target=level` list applied over the quiet defaults. Later calls report
/// the outcome of the first one.
pub fn setup_logging_safe(
    level: LogLevel,
    format: LogFormat,
    directives: Option<&str>,
) -> Result<(), InitializationError> {
    static OUTCOME: OnceLock<Result<(), String>> = OnceLock::new();

    let outcome = OUTCOME.get_or_init(|| -> Result<(), String> {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();
        if let Some(list) = directives {
            logging_system
                .add_directive_list(list)
                .map_err(|e| e.to_string())?;
        }
        logging_system
            .initialize_tracing(level, format)
            .map_err(|e| e.to_string())?;
        tracing::debug!(
            directives = logging_system.directive_count(),
            "Logging initialized"
        );
        Ok(())
    });

    outcome
        .clone()
        .map_err(|details| InitializationError::LoggingInitFailed {
            details,
            source: Box::new(std::io::Error::other("logging already failed to initialize")),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn defaults_quiet_http_and_html_crates() {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();
        assert_eq!(logging_system.directive_count(), QUIET_TARGETS.len());

        let filter = logging_system.build_filter_string(LogLevel::Debug);
        assert!(filter.starts_with("debug,"));
        assert!(filter.contains("reqwest=warn"));
        assert!(filter.contains("html5ever=warn"));
    }

    #[test]
    fn empty_filter_is_just_the_level() {
        assert_eq!(LoggingSystem::new().build_filter_string(LogLevel::Info), "info");
    }

    #[test]
    fn invalid_directives_are_skipped_or_defaulted() {
        let logging_system = LoggingSystem::new();

        let cases = [
            ("vini_data=debug", 1),
            ("no_level", 1),
            ("vini_data::scraper=loud", 2),
            ("=trace", 2),
            ("", 2),
        ];
        for (directive, expected) in cases {
            assert!(logging_system.add_directive(directive).is_ok(), "{directive}");
            assert_eq!(logging_system.directive_count(), expected, "{directive}");
        }
        assert!(
            logging_system
                .build_filter_string(LogLevel::Warn)
                .ends_with("vini_data::scraper=info")
        );
    }

    #[test]
    fn directive_list_overrides_defaults_per_target() {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();

        logging_system
            .add_directive_list(" reqwest=debug, vini_data::service=trace,,bogus ")
            .unwrap();

        assert_eq!(logging_system.directive_count(), QUIET_TARGETS.len() + 1);
        let filter = logging_system.build_filter_string(LogLevel::Info);
        assert!(filter.contains("reqwest=debug"));
        assert!(!filter.contains("reqwest=warn"));
        assert!(filter.ends_with("vini_data::service=trace"));
    }

    #[test]
    fn concurrent_directive_writes() {
        let logging_system = Arc::new(LoggingSystem::new());

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let logging_system = Arc::clone(&logging_system);
                thread::spawn(move || {
                    let _ = logging_system.add_directive(&format!("target{i}=info"));
                    logging_system.build_filter_string(LogLevel::Info)
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().is_ok());
        }
        assert_eq!(logging_system.directive_count(), 50);
    }

    #[test]
    fn setup_is_idempotent() {
        let first = setup_logging_safe(LogLevel::Info, LogFormat::Compact, None);
        let second = setup_logging_safe(LogLevel::Debug, LogFormat::Json, Some("reqwest=trace"));
        assert_eq!(first.is_ok(), second.is_ok());
    }
}
