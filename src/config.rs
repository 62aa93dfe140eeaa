//! Configuration management for trapmetrics
//!
//! Parses TOML configuration files and provides typed access to settings.
//! Every section is optional; an empty file yields a client that still needs
//! either `api.token` or `check.submission_url` to pass validation.

use crate::error::{ClientError, ClientResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default vendor API endpoint
pub const DEFAULT_API_URL: &str = "https://api.circonus.com/v2";

/// Default check type used for search and provisioning
pub const DEFAULT_CHECK_TYPE: &str = "httptrap";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Resource API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// API token; when absent, check management is disabled
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_app")]
    pub app: String,
    #[serde(default = "default_api_url")]
    pub url: String,
    /// PEM file added to the trap certificate pool
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            token: None,
            app: default_app(),
            url: default_api_url(),
            ca_file: None,
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn default_app() -> String {
    "trapmetrics".to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout() -> u64 {
    10
}

/// Check identification and provisioning settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckConfig {
    #[serde(default)]
    pub submission_url: Option<String>,
    /// Numeric check identifier (the `1234` in `/check/1234`)
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub target_host: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub search_tag: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Re-enable metrics the bundle declares but has marked inactive
    #[serde(default)]
    pub force_metric_activation: bool,
    #[serde(default = "default_check_type")]
    pub check_type: String,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            submission_url: None,
            id: None,
            instance_id: None,
            target_host: None,
            display_name: None,
            search_tag: None,
            secret: None,
            tags: Vec::new(),
            force_metric_activation: false,
            check_type: default_check_type(),
        }
    }
}

fn default_check_type() -> String {
    DEFAULT_CHECK_TYPE.to_string()
}

/// Broker selection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Pinned broker identifier (the `1` in `/broker/1`)
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub select_tag: Option<String>,
    #[serde(default = "default_max_response_time")]
    pub max_response_time_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            id: None,
            select_tag: None,
            max_response_time_ms: default_max_response_time(),
        }
    }
}

impl BrokerConfig {
    pub fn max_response_time(&self) -> Duration {
        Duration::from_millis(self.max_response_time_ms)
    }
}

fn default_max_response_time() -> u64 {
    500
}

/// Periodic flush settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlushConfig {
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_true")]
    pub reset_counters: bool,
    #[serde(default = "default_true")]
    pub reset_gauges: bool,
    #[serde(default = "default_true")]
    pub reset_histograms: bool,
    #[serde(default = "default_true")]
    pub reset_text: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            reset_counters: true,
            reset_gauges: true,
            reset_histograms: true,
            reset_text: true,
        }
    }
}

impl FlushConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

fn default_interval() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ClientResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            ClientError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        let config: Self =
            toml::from_str(&content).map_err(|source| ClientError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config
            .validate()
            .map_err(|e| ClientError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Minimal configuration that submits straight to `url` with check management disabled
    pub fn for_submission_url(url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.check.submission_url = Some(url.into());
        config
    }

    /// Whether the resource API is available for check lookup and provisioning
    pub fn check_management_enabled(&self) -> bool {
        self.api.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Instance identifier owning the check, `<host>:<app>` unless configured
    pub fn instance_id(&self) -> String {
        match &self.check.instance_id {
            Some(id) => id.clone(),
            None => format!("{}:{}", local_hostname(), self.api.app),
        }
    }

    /// Host recorded as the check target and used in bundle search
    pub fn target_host(&self) -> String {
        self.check
            .target_host
            .clone()
            .unwrap_or_else(|| self.instance_id())
    }

    pub fn display_name(&self) -> String {
        self.check
            .display_name
            .clone()
            .unwrap_or_else(|| format!("{} /metrics", self.instance_id()))
    }

    /// Tag identifying bundles owned by this client, `service:<app>` unless configured
    pub fn search_tag(&self) -> String {
        self.check
            .search_tag
            .clone()
            .unwrap_or_else(|| format!("service:{}", self.api.app))
    }

    /// Validate configuration after parsing
    ///
    /// Called automatically by `from_file()` and by `MetricsClient::new()`.
    pub fn validate(&self) -> ClientResult<()> {
        if let Some(url) = &self.check.submission_url {
            if !is_http_url(url) {
                return Err(ClientError::Config(format!(
                    "check.submission_url '{}' must start with 'http://' or 'https://'",
                    url
                )));
            }
        }

        if !self.check_management_enabled() && self.check.submission_url.is_none() {
            return Err(ClientError::Config(
                "either api.token or check.submission_url must be set; without an API token \
                the check cannot be looked up or created"
                    .to_string(),
            ));
        }

        if !is_http_url(&self.api.url) {
            return Err(ClientError::Config(format!(
                "api.url '{}' must start with 'http://' or 'https://'",
                self.api.url
            )));
        }

        if self.api.request_timeout_seconds == 0 || self.api.request_timeout_seconds > 300 {
            return Err(ClientError::Config(format!(
                "api.request_timeout_seconds must be in 1..=300, got {}",
                self.api.request_timeout_seconds
            )));
        }

        if self.broker.max_response_time_ms == 0 || self.broker.max_response_time_ms > 60_000 {
            return Err(ClientError::Config(format!(
                "broker.max_response_time_ms must be in 1..=60000, got {}",
                self.broker.max_response_time_ms
            )));
        }

        if self.flush.interval_seconds == 0 || self.flush.interval_seconds > 3600 {
            return Err(ClientError::Config(format!(
                "flush.interval_seconds must be in 1..=3600, got {}",
                self.flush.interval_seconds
            )));
        }

        if self.check.check_type.trim().is_empty() {
            return Err(ClientError::Config(
                "check.check_type cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

impl FromStr for Config {
    type Err = ClientError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| ClientError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
