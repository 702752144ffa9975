use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load and parse the configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.as_ref().display()))?;
        let config: Config = toml::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations missing the transport-specific keys.
    pub fn validate(&self) -> Result<()> {
        match self.upstream.mode {
            UpstreamMode::ChildProcess => {
                if self.upstream.command.is_none() {
                    bail!("upstream.mode = \"child-process\" requires upstream.command");
                }
            }
            UpstreamMode::EventStream | UpstreamMode::Http => {
                if self.upstream.url.is_none() {
                    bail!(
                        "upstream.mode = \"{}\" requires upstream.url",
                        self.upstream.mode.as_str()
                    );
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UpstreamMode {
    ChildProcess,
    EventStream,
    Http,
}

impl UpstreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChildProcess => "child-process",
            Self::EventStream => "event-stream",
            Self::Http => "http",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    pub mode: UpstreamMode,
    /// Base URL for the event-stream and http transports.
    pub url: Option<String>,
    /// Executable for the child-process transport.
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub max_dynamic_bytes: u64,
    /// Document-type kinds fetched by the preload sweep after reconnect.
    pub preload: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_dynamic_bytes: 100 * 1024 * 1024,
            preload: vec!["workflow".to_owned(), "rule".to_owned()],
        }
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bifrost")
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConnectionConfig {
    pub health_check_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 30_000,
            probe_timeout_ms: 5_000,
            max_reconnect_attempts: 10,
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            multiplier: 2.0,
            max_ms: 60_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "127.0.0.1:9464".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_http_config_gets_defaults() {
        let config: Config = toml::from_str(
            r#"
            [upstream]
            mode = "http"
            url = "http://localhost:8080"
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.cache.max_dynamic_bytes, 100 * 1024 * 1024);
        assert_eq!(config.cache.preload, ["workflow", "rule"]);
        assert_eq!(config.connection.health_check_interval_ms, 30_000);
        assert_eq!(config.connection.probe_timeout_ms, 5_000);
        assert_eq!(config.connection.max_reconnect_attempts, 10);
        assert_eq!(config.connection.backoff.initial_ms, 1_000);
        assert_eq!(config.connection.backoff.max_ms, 60_000);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn child_process_mode_requires_a_command() {
        let config: Config = toml::from_str(
            r#"
            [upstream]
            mode = "child-process"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str(
            r#"
            [upstream]
            mode = "child-process"
            command = "knowledge-server"
            args = ["--stdio"]
            "#,
        )
        .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn event_stream_mode_requires_a_url() {
        let config: Config = toml::from_str(
            r#"
            [upstream]
            mode = "event-stream"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_are_honored() {
        let config: Config = toml::from_str(
            r#"
            [upstream]
            mode = "http"
            url = "http://upstream:9000"
            api_key = "secret"

            [cache]
            max_dynamic_bytes = 4096
            preload = ["workflow"]

            [connection]
            max_reconnect_attempts = 3

            [connection.backoff]
            initial_ms = 250

            [metrics]
            enabled = true
            addr = "0.0.0.0:9900"
            "#,
        )
        .unwrap();

        assert_eq!(config.upstream.api_key.as_deref(), Some("secret"));
        assert_eq!(config.cache.max_dynamic_bytes, 4096);
        assert_eq!(config.connection.max_reconnect_attempts, 3);
        assert_eq!(config.connection.backoff.initial_ms, 250);
        // Unset backoff keys fall back to their defaults.
        assert_eq!(config.connection.backoff.multiplier, 2.0);
        assert_eq!(config.metrics.addr, "0.0.0.0:9900");
    }
}
