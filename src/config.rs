//! Configuration management for Smartmark
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::backend::EventFilter;
use crate::error::{Result, SmartmarkError};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for Smartmark
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Problems noticed while loading, reported once logging is up
    #[serde(skip)]
    pub warnings: Vec<String>,

    /// Hosted backend connection settings
    #[serde(default)]
    pub backend: BackendConfig,
    /// Federated sign-in settings
    #[serde(default)]
    pub auth: AuthConfig,
    /// Realtime change feed settings
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Logging output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the hosted project, e.g. `https://abc.supabase.co`
    #[serde(default)]
    pub url: String,

    /// Public (anonymous) API key sent as `apikey` on every request
    #[serde(default)]
    pub anon_key: String,

    /// Table holding bookmark rows
    #[serde(default = "default_table")]
    pub table: String,

    /// Per-request timeout (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_table() -> String {
    "bookmarks".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            table: default_table(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Federated sign-in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Identity provider passed to the authorize endpoint
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Loopback port for the redirect callback; `0` picks a free port
    #[serde(default)]
    pub redirect_port: u16,

    /// How long to wait for the browser redirect (seconds)
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_seconds: u64,
}

fn default_provider() -> String {
    "google".to_string()
}

fn default_callback_timeout() -> u64 {
    300
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            redirect_port: 0,
            callback_timeout_seconds: default_callback_timeout(),
        }
    }
}

/// How the change feed reaches the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeTransport {
    /// Phoenix channel over the project's realtime websocket
    #[default]
    Websocket,
    /// Server-Sent Events relay; needs an explicit `realtime.url`
    Sse,
}

/// Realtime change feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Subscribe to table changes while the shell is open
    #[serde(default = "default_realtime_enabled")]
    pub enabled: bool,

    /// Change feed transport
    #[serde(default)]
    pub transport: RealtimeTransport,

    /// Feed endpoint. The websocket transport defaults to
    /// `wss://{backend host}/realtime/v1/websocket`; the SSE transport has
    /// no default.
    #[serde(default)]
    pub url: Option<String>,

    /// Which change kinds trigger a refresh: `*`, `INSERT`, `UPDATE`, `DELETE`
    #[serde(default = "default_event_filter")]
    pub event_filter: String,

    /// Delay before reconnecting a dropped stream (milliseconds)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

fn default_realtime_enabled() -> bool {
    true
}

fn default_event_filter() -> String {
    "*".to_string()
}

fn default_reconnect_delay() -> u64 {
    2_000
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: default_realtime_enabled(),
            transport: RealtimeTransport::default(),
            url: None,
            event_filter: default_event_filter(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,

    /// Optional file receiving a copy of every log line
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "smartmark=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error: defaults are used and the backend
    /// settings are expected to arrive through `SMARTMARK_*` variables.
    ///
    /// Loading happens before logging is configured, so recoverable
    /// problems are collected in [`Config::warnings`] instead of logged.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            let mut config = Self::default();
            config.warn(format!("Config file not found at {}, using defaults", path));
            config
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SmartmarkError::Config(format!("Failed to read config file: {}", e)))?;
        let config = serde_yaml::from_str(&contents)
            .map_err(SmartmarkError::from)
            .with_context(|| format!("Failed to parse config {}", path))?;
        Ok(config)
    }

    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    /// Logs and clears the collected load warnings.
    pub fn report_warnings(&mut self) {
        for warning in self.warnings.drain(..) {
            tracing::warn!("{}", warning);
        }
    }

    fn apply_env_vars(&mut self) {
        if let Ok(url) = std::env::var("SMARTMARK_URL") {
            self.backend.url = url;
        }

        if let Ok(key) = std::env::var("SMARTMARK_ANON_KEY") {
            self.backend.anon_key = key;
        }

        if let Ok(table) = std::env::var("SMARTMARK_TABLE") {
            self.backend.table = table;
        }

        if let Ok(provider) = std::env::var("SMARTMARK_PROVIDER") {
            self.auth.provider = provider;
        }

        if let Ok(port) = std::env::var("SMARTMARK_REDIRECT_PORT") {
            match port.parse::<u16>() {
                Ok(v) => self.auth.redirect_port = v,
                Err(_) => self.warn(format!("Invalid SMARTMARK_REDIRECT_PORT: {}", port)),
            }
        }

        if let Ok(enabled) = std::env::var("SMARTMARK_REALTIME_ENABLED") {
            match enabled.parse::<bool>() {
                Ok(v) => self.realtime.enabled = v,
                Err(_) => self.warn(format!(
                    "Invalid value for SMARTMARK_REALTIME_ENABLED: {}",
                    enabled
                )),
            }
        }

        if let Ok(level) = std::env::var("SMARTMARK_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(json_logs) = std::env::var("SMARTMARK_JSON_LOGS") {
            match json_logs.parse::<bool>() {
                Ok(v) => self.logging.json_format = v,
                Err(_) => self.warn(format!(
                    "Invalid value for SMARTMARK_JSON_LOGS: {}",
                    json_logs
                )),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            self.logging.level = "smartmark=debug".to_string();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`SmartmarkError::Config`] naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.backend.url.trim().is_empty() {
            return Err(SmartmarkError::Config(
                "backend.url is required (or set SMARTMARK_URL)".to_string(),
            )
            .into());
        }

        let parsed = url::Url::parse(&self.backend.url)
            .map_err(|e| SmartmarkError::Config(format!("backend.url is not a URL: {}", e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(SmartmarkError::Config(format!(
                "backend.url must use http or https, got {}",
                parsed.scheme()
            ))
            .into());
        }

        if self.backend.anon_key.trim().is_empty() {
            return Err(SmartmarkError::Config(
                "backend.anon_key is required (or set SMARTMARK_ANON_KEY)".to_string(),
            )
            .into());
        }

        if self.backend.table.trim().is_empty() {
            return Err(SmartmarkError::Config("backend.table cannot be empty".to_string()).into());
        }

        if self.backend.timeout_seconds == 0 || self.backend.timeout_seconds > 600 {
            return Err(SmartmarkError::Config(
                "backend.timeout_seconds must be between 1 and 600".to_string(),
            )
            .into());
        }

        if self.auth.provider.trim().is_empty() {
            return Err(SmartmarkError::Config("auth.provider cannot be empty".to_string()).into());
        }

        if self.auth.callback_timeout_seconds == 0 {
            return Err(SmartmarkError::Config(
                "auth.callback_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        self.event_filter()?;

        if self.realtime.reconnect_delay_ms == 0 {
            return Err(SmartmarkError::Config(
                "realtime.reconnect_delay_ms must be greater than 0".to_string(),
            )
            .into());
        }

        match (self.realtime.transport, self.realtime.url.as_deref()) {
            (RealtimeTransport::Sse, None) => {
                return Err(SmartmarkError::Config(
                    "realtime.url is required for the sse transport".to_string(),
                )
                .into());
            }
            (transport, Some(rt_url)) => {
                let parsed = url::Url::parse(rt_url).map_err(|e| {
                    SmartmarkError::Config(format!("realtime.url is not a URL: {}", e))
                })?;
                let allowed: &[&str] = match transport {
                    RealtimeTransport::Websocket => &["ws", "wss"],
                    RealtimeTransport::Sse => &["http", "https"],
                };
                if !allowed.contains(&parsed.scheme()) {
                    return Err(SmartmarkError::Config(format!(
                        "realtime.url must use {} for the {:?} transport, got {}",
                        allowed.join(" or "),
                        transport,
                        parsed.scheme()
                    ))
                    .into());
                }
            }
            (RealtimeTransport::Websocket, None) => {}
        }

        Ok(())
    }

    /// Parsed realtime event filter.
    pub fn event_filter(&self) -> Result<EventFilter> {
        self.realtime.event_filter.parse::<EventFilter>()
    }

    /// Endpoint of the realtime change feed.
    ///
    /// Without `realtime.url` the websocket transport derives
    /// `ws(s)://{host}/realtime/v1/websocket` from `backend.url`.
    ///
    /// # Errors
    ///
    /// Returns [`SmartmarkError::Config`] for the SSE transport without an
    /// explicit url, or a backend url that is neither http nor https.
    pub fn realtime_endpoint(&self) -> Result<String> {
        if let Some(ref url) = self.realtime.url {
            return Ok(url.clone());
        }
        match self.realtime.transport {
            RealtimeTransport::Websocket => {
                let base = self.backend.url.trim_end_matches('/');
                let socket_base = if let Some(rest) = base.strip_prefix("https://") {
                    format!("wss://{rest}")
                } else if let Some(rest) = base.strip_prefix("http://") {
                    format!("ws://{rest}")
                } else {
                    return Err(SmartmarkError::Config(format!(
                        "cannot derive a realtime endpoint from backend.url {}",
                        self.backend.url
                    ))
                    .into());
                };
                Ok(format!("{socket_base}/realtime/v1/websocket"))
            }
            RealtimeTransport::Sse => Err(SmartmarkError::Config(
                "realtime.url is required for the sse transport".to_string(),
            )
            .into()),
        }
    }

    /// Short project identifier used to namespace stored sessions.
    ///
    /// This is the first label of the backend host (`abc` for
    /// `https://abc.supabase.co`), or the full host when it has no dots.
    pub fn project_ref(&self) -> String {
        url::Url::parse(&self.backend.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .map(|host| host.split('.').next().unwrap_or(&host).to_string())
            .unwrap_or_else(|| "default".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.backend.url = "https://abc.supabase.co".to_string();
        config.backend.anon_key = "anon".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend.table, "bookmarks");
        assert_eq!(config.auth.provider, "google");
        assert!(config.realtime.enabled);
        assert_eq!(config.realtime.event_filter, "*");
    }

    #[test]
    fn test_config_validation_success() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_missing_url() {
        let mut config = valid_config();
        config.backend.url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_non_http_url() {
        let mut config = valid_config();
        config.backend.url = "ftp://abc.example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_missing_anon_key() {
        let mut config = valid_config();
        config.backend.anon_key = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut config = valid_config();
        config.backend.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_event_filter() {
        let mut config = valid_config();
        config.realtime.event_filter = "TRUNCATE".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
backend:
  url: https://xyz.supabase.co
  anon_key: key123
  table: links
auth:
  provider: github
  redirect_port: 54321
realtime:
  enabled: false
  event_filter: delete
logging:
  json_format: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backend.table, "links");
        assert_eq!(config.backend.timeout_seconds, 30);
        assert_eq!(config.auth.provider, "github");
        assert_eq!(config.auth.redirect_port, 54321);
        assert!(!config.realtime.enabled);
        assert!(config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_realtime_endpoint_defaults_to_project_websocket() {
        let mut config = valid_config();
        config.backend.url = "https://abc.supabase.co/".to_string();
        assert_eq!(
            config.realtime_endpoint().unwrap(),
            "wss://abc.supabase.co/realtime/v1/websocket"
        );
        config.backend.url = "http://localhost:54321".to_string();
        assert_eq!(
            config.realtime_endpoint().unwrap(),
            "ws://localhost:54321/realtime/v1/websocket"
        );
        config.realtime.url = Some("ws://localhost:4000/socket".to_string());
        assert_eq!(config.realtime_endpoint().unwrap(), "ws://localhost:4000/socket");
    }

    #[test]
    fn test_sse_transport_requires_explicit_url() {
        let mut config = valid_config();
        config.realtime.transport = RealtimeTransport::Sse;
        assert!(config.realtime_endpoint().is_err());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("realtime.url is required"));

        config.realtime.url = Some("https://relay.example.com/events".to_string());
        assert!(config.validate().is_ok());
        assert_eq!(
            config.realtime_endpoint().unwrap(),
            "https://relay.example.com/events"
        );
    }

    #[test]
    fn test_realtime_url_scheme_must_match_transport() {
        let mut config = valid_config();
        config.realtime.url = Some("https://abc.supabase.co/realtime/v1/sse".to_string());
        assert!(config.validate().is_err());
        config.realtime.url = Some("wss://abc.supabase.co/realtime/v1/websocket".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transport_from_yaml() {
        let yaml = "realtime:\n  transport: sse\n  url: http://localhost:8080/events\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.realtime.transport, RealtimeTransport::Sse);
        assert_eq!(
            Config::default().realtime.transport,
            RealtimeTransport::Websocket
        );
    }

    #[test]
    fn test_yaml_errors_keep_their_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "backend: [not, a, map\n").unwrap();
        let err = Config::from_file(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
        assert!(matches!(
            err.downcast_ref::<SmartmarkError>(),
            Some(SmartmarkError::Yaml(_))
        ));
    }

    #[test]
    fn test_project_ref_from_host() {
        assert_eq!(valid_config().project_ref(), "abc");
        let mut config = valid_config();
        config.backend.url = "http://localhost:54321".to_string();
        assert_eq!(config.project_ref(), "localhost");
    }

    #[test]
    fn test_load_nonexistent_file_uses_defaults() {
        let cli = crate::cli::Cli::default();
        let mut config = Config::load("/nonexistent/smartmark.yaml", &cli).unwrap();
        assert_eq!(config.backend.table, "bookmarks");
        assert!(config.warnings[0].contains("Config file not found"));
        config.report_warnings();
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn test_verbose_cli_raises_log_level() {
        let mut cli = crate::cli::Cli::default();
        cli.verbose = true;
        let config = Config::load("/nonexistent/smartmark.yaml", &cli).unwrap();
        assert_eq!(config.logging.level, "smartmark=debug");
    }

    #[test]
    #[serial]
    fn test_apply_env_vars_overrides_backend() {
        std::env::set_var("SMARTMARK_URL", "https://env.supabase.co");
        std::env::set_var("SMARTMARK_ANON_KEY", "env-key");
        std::env::set_var("SMARTMARK_REDIRECT_PORT", "not-a-port");
        std::env::set_var("SMARTMARK_REALTIME_ENABLED", "false");

        let mut config = Config::default();
        config.apply_env_vars();

        std::env::remove_var("SMARTMARK_URL");
        std::env::remove_var("SMARTMARK_ANON_KEY");
        std::env::remove_var("SMARTMARK_REDIRECT_PORT");
        std::env::remove_var("SMARTMARK_REALTIME_ENABLED");

        assert_eq!(config.backend.url, "https://env.supabase.co");
        assert_eq!(config.backend.anon_key, "env-key");
        assert_eq!(config.auth.redirect_port, 0);
        assert!(!config.realtime.enabled);
        assert_eq!(
            config.warnings,
            vec!["Invalid SMARTMARK_REDIRECT_PORT: not-a-port".to_string()]
        );
    }
}
