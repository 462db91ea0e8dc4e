//! Configuration loading from environment variables.
//!
//! Values come from `FLIGHT_CORE_*` environment variables with sensible
//! defaults. Invalid numbers fall back to defaults without crashing; only an
//! unreadable credentials file is an error.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `FLIGHT_CORE_USERNAME` | test | User accepted for Basic login |
//! | `FLIGHT_CORE_PASSWORD` | password | Password for that user |
//! | `FLIGHT_CORE_CREDENTIALS_FILE` | unset | TOML file with a `[users]` table of name = password |
//! | `FLIGHT_CORE_REGISTRATION_USERS` | unset | Comma list of users allowed to add actions/exchanges |
//! | `FLIGHT_CORE_EXCHANGE_BUFFER` | 16 | Messages buffered per exchange direction |
//! | `FLIGHT_CORE_HANDOFF_CAPACITY` | 8 | Output batches buffered for a reader |
//! | `FLIGHT_CORE_MAX_EXCHANGES` | 64 | Concurrent exchanges per server |
//! | `FLIGHT_CORE_SHUTDOWN_TIMEOUT` | 30 | Drain timeout (secs) |
//! | `FLIGHT_CORE_RETRY_INITIAL_MS` | 100 | First connect backoff (ms) |
//! | `FLIGHT_CORE_RETRY_MAX_MS` | 5000 | Backoff cap (ms) |
//! | `FLIGHT_CORE_CALL_TIMEOUT` | 10 | Per-attempt health-check timeout (secs) |
//! | `FLIGHT_CORE_LOG_FORMAT` | json | `json` or `pretty` |
//! | `FLIGHT_CORE_LOG_LEVEL` | info | `EnvFilter` directive |
//! | `FLIGHT_CORE_LOG_FILE` | unset | Write logs to this file instead of stderr |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Credential;
use crate::client::{ClientConfig, RetryConfig};
use crate::server::ServerConfig;
use crate::telemetry::{LogConfig, LogFormat};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read credentials file {path}: {message}")]
    CredentialsRead { path: PathBuf, message: String },

    #[error("Invalid credentials file {path}: {message}")]
    CredentialsParse { path: PathBuf, message: String },
}

/// Effective configuration summary. Never contains secrets.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub users: Vec<String>,
    pub registration_users: Option<Vec<String>>,
    pub exchange_buffer: usize,
    pub handoff_capacity: usize,
    pub max_exchanges: usize,
    pub shutdown_timeout_secs: u64,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub call_timeout_secs: u64,
    pub log_format: String,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

/// All configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub credentials: Vec<Credential>,
    pub registration_users: Option<Vec<String>>,
    pub exchange_buffer: usize,
    pub handoff_capacity: usize,
    pub max_exchanges: usize,
    pub shutdown_timeout: Duration,
    pub retry: RetryConfig,
    pub call_timeout: Duration,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    users: BTreeMap<String, String>,
}

fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!items.is_empty()).then_some(items)
}

/// Read `[users]` from a TOML credentials file.
pub fn load_credentials_file(path: &Path) -> Result<Vec<Credential>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::CredentialsRead {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let parsed: CredentialsFile = toml::from_str(&raw).map_err(|e| ConfigError::CredentialsParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(parsed
        .users
        .into_iter()
        .map(|(username, password)| Credential::new(username, password))
        .collect())
}

fn load_credentials() -> Result<Vec<Credential>, ConfigError> {
    let username = std::env::var("FLIGHT_CORE_USERNAME").unwrap_or_else(|_| "test".to_string());
    let password = std::env::var("FLIGHT_CORE_PASSWORD").unwrap_or_else(|_| "password".to_string());
    let mut credentials = vec![Credential::new(username, password)];

    if let Ok(path) = std::env::var("FLIGHT_CORE_CREDENTIALS_FILE") {
        for credential in load_credentials_file(Path::new(&path))? {
            // File entries win over the env pair for the same user.
            credentials.retain(|c| c.username != credential.username);
            credentials.push(credential);
        }
    }
    Ok(credentials)
}

fn load_retry_config() -> RetryConfig {
    let initial_ms = parse_u64("FLIGHT_CORE_RETRY_INITIAL_MS", 100).max(1);
    let max_ms = parse_u64("FLIGHT_CORE_RETRY_MAX_MS", 5000).max(initial_ms);
    RetryConfig {
        initial_backoff: Duration::from_millis(initial_ms),
        max_backoff: Duration::from_millis(max_ms),
        multiplier: 2,
    }
}

fn load_log_config() -> LogConfig {
    let format = std::env::var("FLIGHT_CORE_LOG_FORMAT")
        .ok()
        .and_then(|f| f.parse::<LogFormat>().ok())
        .unwrap_or_default();
    let level = std::env::var("FLIGHT_CORE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let output_path = std::env::var("FLIGHT_CORE_LOG_FILE")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);
    LogConfig {
        format,
        level,
        output_path,
    }
}

/// Load all configuration from environment variables.
pub fn load() -> Result<EnvConfig, ConfigError> {
    let shutdown_secs = parse_u64("FLIGHT_CORE_SHUTDOWN_TIMEOUT", 30).max(1);
    let call_timeout_secs = parse_u64("FLIGHT_CORE_CALL_TIMEOUT", 10).max(1);

    Ok(EnvConfig {
        credentials: load_credentials()?,
        registration_users: parse_list("FLIGHT_CORE_REGISTRATION_USERS"),
        exchange_buffer: parse_usize("FLIGHT_CORE_EXCHANGE_BUFFER", 16).max(1),
        handoff_capacity: parse_usize("FLIGHT_CORE_HANDOFF_CAPACITY", 8).max(1),
        max_exchanges: parse_usize("FLIGHT_CORE_MAX_EXCHANGES", 64).max(1),
        shutdown_timeout: Duration::from_secs(shutdown_secs),
        retry: load_retry_config(),
        call_timeout: Duration::from_secs(call_timeout_secs),
        log: load_log_config(),
    })
}

impl EnvConfig {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            credentials: self.credentials.clone(),
            registration_users: self.registration_users.clone(),
            max_exchanges: self.max_exchanges,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    /// Client settings that log in as `credential`.
    pub fn client_config(&self, credential: Credential) -> ClientConfig {
        ClientConfig {
            credential,
            retry: self.retry.clone(),
            call_timeout: self.call_timeout,
            handoff_capacity: self.handoff_capacity,
        }
    }

    /// First configured credential; the demo client logs in with it.
    pub fn primary_credential(&self) -> Option<&Credential> {
        self.credentials.first()
    }

    pub fn effective_config(&self) -> EffectiveConfig {
        let format = match self.log.format {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        EffectiveConfig {
            users: self.credentials.iter().map(|c| c.username.clone()).collect(),
            registration_users: self.registration_users.clone(),
            exchange_buffer: self.exchange_buffer,
            handoff_capacity: self.handoff_capacity,
            max_exchanges: self.max_exchanges,
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            retry_initial_ms: self.retry.initial_backoff.as_millis() as u64,
            retry_max_ms: self.retry.max_backoff.as_millis() as u64,
            call_timeout_secs: self.call_timeout.as_secs(),
            log_format: format.to_string(),
            log_level: self.log.level.clone(),
            log_file: self.log.output_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "FLIGHT_CORE_USERNAME",
        "FLIGHT_CORE_PASSWORD",
        "FLIGHT_CORE_CREDENTIALS_FILE",
        "FLIGHT_CORE_REGISTRATION_USERS",
        "FLIGHT_CORE_EXCHANGE_BUFFER",
        "FLIGHT_CORE_HANDOFF_CAPACITY",
        "FLIGHT_CORE_MAX_EXCHANGES",
        "FLIGHT_CORE_SHUTDOWN_TIMEOUT",
        "FLIGHT_CORE_RETRY_INITIAL_MS",
        "FLIGHT_CORE_RETRY_MAX_MS",
        "FLIGHT_CORE_CALL_TIMEOUT",
        "FLIGHT_CORE_LOG_FORMAT",
        "FLIGHT_CORE_LOG_LEVEL",
        "FLIGHT_CORE_LOG_FILE",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load().unwrap();
        assert_eq!(cfg.credentials, vec![Credential::new("test", "password")]);
        assert_eq!(cfg.registration_users, None);
        assert_eq!(cfg.exchange_buffer, 16);
        assert_eq!(cfg.handoff_capacity, 8);
        assert_eq!(cfg.max_exchanges, 64);
        assert_eq!(cfg.shutdown_timeout.as_secs(), 30);
        assert_eq!(cfg.retry.initial_backoff, Duration::from_millis(100));
        assert_eq!(cfg.retry.max_backoff, Duration::from_millis(5000));
        assert_eq!(cfg.call_timeout.as_secs(), 10);
        assert_eq!(cfg.log.format, LogFormat::Json);
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.log.output_path, None);
    }

    #[test]
    fn test_log_file_is_read() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("FLIGHT_CORE_LOG_FILE", "/var/log/flight-core.log");
        std::env::set_var("FLIGHT_CORE_LOG_FORMAT", "pretty");
        let cfg = load().unwrap();
        clear_env_vars();

        assert_eq!(cfg.log.output_path, Some(PathBuf::from("/var/log/flight-core.log")));
        assert_eq!(cfg.log.format, LogFormat::Pretty);
        assert_eq!(
            cfg.effective_config().log_file,
            Some(PathBuf::from("/var/log/flight-core.log"))
        );
    }

    #[test]
    fn test_blank_log_file_means_stderr() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("FLIGHT_CORE_LOG_FILE", "  ");
        let cfg = load().unwrap();
        clear_env_vars();
        assert_eq!(cfg.log.output_path, None);
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("FLIGHT_CORE_MAX_EXCHANGES", "lots");
        std::env::set_var("FLIGHT_CORE_LOG_FORMAT", "xml");
        let cfg = load().unwrap();
        assert_eq!(cfg.max_exchanges, 64);
        assert_eq!(cfg.log.format, LogFormat::Json);
        clear_env_vars();
    }

    #[test]
    fn test_floors_are_applied() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("FLIGHT_CORE_HANDOFF_CAPACITY", "0");
        std::env::set_var("FLIGHT_CORE_SHUTDOWN_TIMEOUT", "0");
        std::env::set_var("FLIGHT_CORE_RETRY_INITIAL_MS", "900");
        std::env::set_var("FLIGHT_CORE_RETRY_MAX_MS", "10");
        let cfg = load().unwrap();
        assert_eq!(cfg.handoff_capacity, 1);
        assert_eq!(cfg.shutdown_timeout.as_secs(), 1);
        assert!(cfg.retry.max_backoff >= cfg.retry.initial_backoff);
        clear_env_vars();
    }

    #[test]
    fn test_registration_users_list() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("FLIGHT_CORE_REGISTRATION_USERS", " admin, ops ,,");
        let cfg = load().unwrap();
        assert_eq!(
            cfg.registration_users,
            Some(vec!["admin".to_string(), "ops".to_string()])
        );
        clear_env_vars();
    }

    #[test]
    fn test_credentials_file_merges_users() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[users]\nalice = \"wonderland\"\ntest = \"override\"").unwrap();
        std::env::set_var("FLIGHT_CORE_CREDENTIALS_FILE", file.path());

        let cfg = load().unwrap();
        assert_eq!(cfg.credentials.len(), 2);
        assert!(cfg.credentials.contains(&Credential::new("alice", "wonderland")));
        assert!(cfg.credentials.contains(&Credential::new("test", "override")));
        clear_env_vars();
    }

    #[test]
    fn test_missing_credentials_file_is_error() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("FLIGHT_CORE_CREDENTIALS_FILE", "/nonexistent/users.toml");
        assert!(matches!(load(), Err(ConfigError::CredentialsRead { .. })));
        clear_env_vars();
    }

    #[test]
    fn test_effective_config_hides_passwords() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("FLIGHT_CORE_PASSWORD", "hunter2");
        let eff = load().unwrap().effective_config();
        let rendered = serde_json::to_string(&eff).unwrap();
        assert!(!rendered.contains("hunter2"));
        assert_eq!(eff.users, vec!["test".to_string()]);
        clear_env_vars();
    }
}
