//! Configuration loading from TOML files
//!
//! Config file is selected via the `--config <path>` command line argument
//! (default: config/dev.toml). Every section is optional; missing keys take
//! the defaults below.

use crate::domain::credentials::{MAX_OTP_DIGITS, MIN_OTP_DIGITS};
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Site label attached to metrics (e.g., "tower-a")
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "visitor-gate".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), port: default_http_port() }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    /// JSONL journal path; unset or empty keeps visitors in memory only
    #[serde(default)]
    pub journal_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Length of issued OTPs (clamped to 4..=9)
    #[serde(default = "default_otp_digits")]
    pub otp_digits: u32,
    /// Attempts at issuing an unused credential before giving up
    #[serde(default = "default_max_issue_attempts")]
    pub max_issue_attempts: u32,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self { otp_digits: default_otp_digits(), max_issue_attempts: default_max_issue_attempts() }
    }
}

fn default_otp_digits() -> u32 {
    4
}

fn default_max_issue_attempts() -> u32 {
    32
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Periodic metrics log interval (0 to disable)
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    http_bind_address: String,
    http_port: u16,
    journal_file: Option<String>,
    otp_digits: u32,
    max_issue_attempts: u32,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        let journal_file = toml_config.store.journal_file.filter(|path| !path.trim().is_empty());

        Self {
            site_id: toml_config.site.id,
            http_bind_address: toml_config.http.bind_address,
            http_port: toml_config.http.port,
            journal_file,
            otp_digits: toml_config.credentials.otp_digits.clamp(MIN_OTP_DIGITS, MAX_OTP_DIGITS),
            max_issue_attempts: toml_config.credentials.max_issue_attempts.max(1),
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Socket address the API server binds to
    pub fn http_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .http_bind_address
            .parse()
            .with_context(|| format!("Invalid http bind address {}", self.http_bind_address))?;
        Ok(SocketAddr::new(ip, self.http_port))
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn journal_file(&self) -> Option<&str> {
        self.journal_file.as_deref()
    }

    pub fn otp_digits(&self) -> u32 {
        self.otp_digits
    }

    pub fn max_issue_attempts(&self) -> u32 {
        self.max_issue_attempts
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the journal path
    pub fn with_journal_file(mut self, path: &str) -> Self {
        self.journal_file = Some(path.to_string());
        self
    }

    /// Builder method for tests to bind an ephemeral port
    pub fn with_http(mut self, bind_address: &str, port: u16) -> Self {
        self.http_bind_address = bind_address.to_string();
        self.http_port = port;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "visitor-gate");
        assert_eq!(config.http_bind_address(), "0.0.0.0");
        assert_eq!(config.http_port(), 8080);
        assert_eq!(config.journal_file(), None);
        assert_eq!(config.otp_digits(), 4);
        assert_eq!(config.max_issue_attempts(), 32);
        assert_eq!(config.metrics_interval_secs(), 60);
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let toml_config: TomlConfig = toml::from_str("").unwrap();
        let config = Config::from_toml(toml_config, "empty.toml");
        assert_eq!(config.http_port(), 8080);
        assert_eq!(config.config_file(), "empty.toml");
    }

    #[test]
    fn test_blank_journal_means_memory_only() {
        let toml_config: TomlConfig = toml::from_str("[store]\njournal_file = \"  \"\n").unwrap();
        let config = Config::from_toml(toml_config, "t.toml");
        assert_eq!(config.journal_file(), None);
    }

    #[test]
    fn test_credentials_clamped() {
        let toml_config: TomlConfig =
            toml::from_str("[credentials]\notp_digits = 20\nmax_issue_attempts = 0\n").unwrap();
        let config = Config::from_toml(toml_config, "t.toml");
        assert_eq!(config.otp_digits(), 9);
        assert_eq!(config.max_issue_attempts(), 1);
    }

    #[test]
    fn test_http_addr() {
        let config = Config::default().with_http("127.0.0.1", 0);
        assert_eq!(config.http_addr().unwrap().to_string(), "127.0.0.1:0");

        let any_v6 = Config::default().with_http("::", 8080);
        assert_eq!(any_v6.http_addr().unwrap().to_string(), "[::]:8080");

        let loopback_v6 = Config::default().with_http("::1", 9180);
        assert_eq!(loopback_v6.http_addr().unwrap().to_string(), "[::1]:9180");

        let bad = Config::default().with_http("not an address", 80);
        assert!(bad.http_addr().is_err());
    }
}
