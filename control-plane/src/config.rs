//! Configuration for the control plane.

use std::path::Path;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure for the control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listener for the control RPC surface used by node agents.
    #[serde(default = "default_rpc")]
    pub rpc: ListenConfig,
    /// Listener for the OpenAI-compatible gateway.
    #[serde(default)]
    pub http: ListenConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: default_rpc(),
            http: ListenConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            processor: ProcessorConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl ListenConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Nodes silent for longer than this are removed.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_heartbeat_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// How long one dequeue waits before rechecking for shutdown.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Jobs dispatched at once (0 = unbounded).
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

/// Gateway authentication. With no key set, every request is let through.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_rpc_port() -> u16 {
    50051
}
fn default_rpc() -> ListenConfig {
    ListenConfig {
        host: default_host(),
        port: default_rpc_port(),
    }
}
fn default_heartbeat_timeout() -> u64 {
    30
}
fn default_sweep_interval() -> u64 {
    10
}
fn default_poll_interval() -> u64 {
    100
}
fn default_max_concurrent_jobs() -> usize {
    64
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `control-plane.toml` and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (FLEET__SECTION__KEY format)
    /// 2. control-plane.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("control-plane")
    }

    /// Like [`Config::load`], reading the file at `path` (extension optional).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let name = path.as_ref().to_string_lossy().into_owned();
        let config = ConfigLoader::builder()
            .set_default("rpc.host", default_host())?
            .set_default("rpc.port", default_rpc_port() as i64)?
            .set_default("http.host", default_host())?
            .set_default("http.port", default_http_port() as i64)?
            .add_source(File::with_name(&name).required(false))
            .add_source(
                Environment::with_prefix("FLEET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject intervals that would stall or spin the background tasks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero_checks = [
            ("heartbeat.timeout_secs", self.heartbeat.timeout_secs),
            ("heartbeat.sweep_interval_secs", self.heartbeat.sweep_interval_secs),
            ("processor.poll_interval_ms", self.processor.poll_interval_ms),
        ];
        for (key, value) in zero_checks {
            if value == 0 {
                return Err(ConfigError::Message(format!("{} must be greater than 0", key)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rpc.addr(), "0.0.0.0:50051");
        assert_eq!(config.http.addr(), "0.0.0.0:8080");
        assert_eq!(config.heartbeat.timeout_secs, 30);
        assert_eq!(config.heartbeat.sweep_interval_secs, 10);
        assert_eq!(config.processor.poll_interval_ms, 100);
        assert_eq!(config.processor.max_concurrent_jobs, 64);
        assert!(config.auth.api_key.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(dir.path().join("absent")).unwrap();

        assert_eq!(config.rpc.port, 50051);
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.processor.max_concurrent_jobs, 64);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[http]
port = 9090

[heartbeat]
timeout_secs = 5

[auth]
api_key = "secret"
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();

        assert_eq!(config.http.port, 9090);
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.rpc.port, 50051);
        assert_eq!(config.heartbeat.timeout_secs, 5);
        assert_eq!(config.heartbeat.sweep_interval_secs, 10);
        assert_eq!(config.auth.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let cases = [
            ("[heartbeat]\nsweep_interval_secs = 0", "heartbeat.sweep_interval_secs"),
            ("[heartbeat]\ntimeout_secs = 0", "heartbeat.timeout_secs"),
            ("[processor]\npoll_interval_ms = 0", "processor.poll_interval_ms"),
        ];

        for (contents, key) in cases {
            let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
            writeln!(file, "{}", contents).unwrap();

            let err = Config::load_from(file.path()).unwrap_err();
            assert_eq!(err.to_string(), format!("{} must be greater than 0", key));
        }
    }

    #[test]
    fn test_defaults_pass_validation() {
        assert!(Config::default().validate().is_ok());
    }
}
