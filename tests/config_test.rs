use serial_test::serial;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use vini_data::app::{Config, ConfigError, LogFormat, LogLevel};

const ENV_VARS: [&str; 14] = [
    "VITIBRASIL_BASE_URL",
    "CACHE_TTL",
    "CACHE_MAX_SIZE",
    "FALLBACK_DIR",
    "REQUEST_TIMEOUT_SECS",
    "HTTP_MAX_ATTEMPTS",
    "HTTP_BACKOFF_MS",
    "YEAR_RETRIES",
    "REQUEST_PAUSE_MS",
    "CONFIG_FILE",
    "TAXONOMY_FILE",
    "LOG_LEVEL",
    "LOG_FORMAT",
    "LOG_DIRECTIVES",
];

fn clean_env() {
    unsafe {
        for var in ENV_VARS {
            env::remove_var(var);
        }
    }
}

#[test]
#[serial]
fn test_config_from_environment() {
    clean_env();
    unsafe {
        env::set_var("VITIBRASIL_BASE_URL", "http://mirror.local:8080/index.php");
        env::set_var("CACHE_TTL", "600");
        env::set_var("CACHE_MAX_SIZE", "32");
        env::set_var("FALLBACK_DIR", "/srv/snapshots");
        env::set_var("HTTP_BACKOFF_MS", "250");
        env::set_var("LOG_LEVEL", "WARN");
        env::set_var("LOG_FORMAT", "json");
        env::set_var("LOG_DIRECTIVES", "reqwest=debug,vini_data::scraper=trace");
    }

    let config = Config::from_env().unwrap();
    clean_env();

    assert_eq!(config.base_url, "http://mirror.local:8080/index.php");
    assert_eq!(config.cache_ttl, Duration::from_secs(600));
    assert_eq!(config.cache_max_size, 32);
    assert_eq!(config.fallback_dir, PathBuf::from("/srv/snapshots"));
    assert_eq!(config.backoff_base, Duration::from_millis(250));
    assert_eq!(config.log_level, LogLevel::Warn);
    assert_eq!(config.log_format, LogFormat::Json);
    assert_eq!(
        config.log_directives.as_deref(),
        Some("reqwest=debug,vini_data::scraper=trace")
    );

    let service = config.service_config();
    assert_eq!(service.cache.max_size, 32);
    assert_eq!(service.scraper.base_url, "http://mirror.local:8080/index.php");
}

#[test]
#[serial]
fn test_defaults_without_environment() {
    clean_env();

    let config = Config::from_env().unwrap();

    assert_eq!(config.base_url, "http://vitibrasil.cnpuv.embrapa.br/index.php");
    assert_eq!(config.cache_ttl, Duration::from_secs(86_400));
    assert_eq!(config.cache_max_size, 100);
    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert_eq!(config.log_format, LogFormat::Compact);
    assert_eq!(config.log_directives, None);
}

#[test]
#[serial]
fn test_malformed_environment_values_are_rejected() {
    clean_env();
    unsafe {
        env::set_var("CACHE_MAX_SIZE", "lots");
    }
    let result = Config::from_env();
    clean_env();
    assert!(matches!(result, Err(ConfigError::Env(_))));

    unsafe {
        env::set_var("LOG_FORMAT", "xml");
    }
    let result = Config::from_env();
    clean_env();
    assert!(matches!(result, Err(ConfigError::Env(msg)) if msg.contains("LOG_FORMAT")));

    unsafe {
        env::set_var("VITIBRASIL_BASE_URL", "not a url");
    }
    let result = Config::from_env();
    clean_env();
    assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));
}

#[test]
#[serial]
fn test_zero_cache_ttl_is_rejected() {
    clean_env();
    unsafe {
        env::set_var("CACHE_TTL", "0");
    }
    let result = Config::from_env();
    clean_env();
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}
