use clap::ValueEnum;
use thiserror::Error;

use super::config::LogLevel;

const VALID_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Error, Debug)]
pub enum InitializationError {
    #[error("Invalid log level '{input}'. Valid levels: {valid_levels:?}")]
    InvalidLogLevel {
        input: String,
        valid_levels: Vec<String>,
    },

    #[error("Invalid directive format '{input}'. Expected 'target=level'")]
    InvalidDirectiveFormat { input: String },

    #[error("Empty target in directive '{input}'")]
    EmptyTarget { input: String },

    #[error("Logging system initialization failed: {details}")]
    LoggingInitFailed {
        details: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to build {component}")]
    ComponentInitFailed {
        component: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// What a caller should do with a directive that failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveRecovery {
    /// Keep the target, use the fallback level
    UseDefaultLevel,
    /// Drop the directive
    Skip,
    /// Not a directive problem
    Abort,
}

impl InitializationError {
    pub fn directive_recovery(&self) -> DirectiveRecovery {
        match self {
            InitializationError::InvalidLogLevel { .. } => DirectiveRecovery::UseDefaultLevel,
            InitializationError::InvalidDirectiveFormat { .. }
            | InitializationError::EmptyTarget { .. } => DirectiveRecovery::Skip,
            InitializationError::LoggingInitFailed { .. }
            | InitializationError::ComponentInitFailed { .. } => DirectiveRecovery::Abort,
        }
    }
}

/// Parses a level name, case-insensitively. `warning` is accepted for `warn`.
pub fn parse_level(input: &str) -> Result<LogLevel, InitializationError> {
    let trimmed = input.trim();
    let name = if trimmed.eq_ignore_ascii_case("warning") {
        "warn"
    } else {
        trimmed
    };
    <LogLevel as ValueEnum>::from_str(name, true).map_err(|_| InitializationError::InvalidLogLevel {
        input: input.to_string(),
        valid_levels: VALID_LEVELS.iter().map(|l| (*l).to_string()).collect(),
    })
}

/// One `target=level` entry of an `EnvFilter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirective {
    pub target: String,
    pub level: LogLevel,
}

impl LogDirective {
    pub fn new(target: impl Into<String>, level: LogLevel) -> Self {
        Self {
            target: target.into(),
            level,
        }
    }

    pub fn parse(directive: &str) -> Result<Self, InitializationError> {
        let Some((target, level)) = directive.split_once('=') else {
            return Err(InitializationError::InvalidDirectiveFormat {
                input: directive.to_string(),
            });
        };
        if level.contains('=') {
            return Err(InitializationError::InvalidDirectiveFormat {
                input: directive.to_string(),
            });
        }

        let target = target.trim();
        if target.is_empty() {
            return Err(InitializationError::EmptyTarget {
                input: directive.to_string(),
            });
        }

        Ok(LogDirective::new(target, parse_level(level)?))
    }

    pub fn to_filter_string(&self) -> String {
        format!("{}={}", self.target, self.level.as_str())
    }
}
