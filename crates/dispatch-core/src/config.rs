use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default operator-response timeout (seconds) before falling back to AI.
pub const DEFAULT_OPERATOR_RESPONSE_TIMEOUT_SECS: u64 = 120;
/// Default operator session idle cap (minutes).
pub const DEFAULT_IDLE_DURATION_MINS: u64 = 5;
/// Default upper bound on sid-wait / operator send timeout (minutes).
pub const DEFAULT_IDLE_OPERATOR_MINS: u64 = 5;
/// Default batcher flush-size threshold.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Default batcher periodic-flush period (seconds).
pub const DEFAULT_FLUSH_PERIOD_SECS: u64 = 60;
/// Default retry attempts for `AskPipeline::ask_with_retry`.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
/// Default exponential-backoff base delay (seconds).
pub const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 1;
/// Default assistant call timeout (minutes).
pub const DEFAULT_ASSIST_ANSWER_TIMEOUT_MINS: u64 = 3;
/// Default session-cache sweep interval (minutes).
pub const DEFAULT_SWEEP_INTERVAL_MINS: u64 = 15;

/// Top-level configuration (`dispatch.toml` + `DISPATCH_*` env overrides).
///
/// Mirrors the layered-config approach used across this stack: a TOML file
/// provides defaults, environment variables override individual leaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub operator: OperatorConfig,
    #[serde(default)]
    pub batcher: BatcherConfig,
    #[serde(default)]
    pub ask: AskConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            sessions: SessionsConfig::default(),
            operator: OperatorConfig::default(),
            batcher: BatcherConfig::default(),
            ask: AskConfig::default(),
            assistant: AssistantConfig::default(),
            gateway: GatewayConfig::default(),
            notify: NotifyConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Session TTL in minutes; refreshed on every `getOrCreate`.
    #[serde(default = "default_user_model_ttl_mins")]
    pub user_model_ttl_mins: u64,
    /// How often the background sweeper scans for expired sessions.
    #[serde(default = "default_sweep_interval_mins")]
    pub sweep_interval_mins: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            user_model_ttl_mins: default_user_model_ttl_mins(),
            sweep_interval_mins: default_sweep_interval_mins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Seconds to wait for the first operator reply before falling back to AI.
    #[serde(default = "default_operator_response_timeout_secs")]
    pub operator_response_timeout_secs: u64,
    /// Operator session idle cap, minutes.
    #[serde(default = "default_idle_duration_mins")]
    pub idle_duration_mins: u64,
    /// Upper bound on sid-wait and operator send timeout, minutes.
    #[serde(default = "default_idle_operator_mins")]
    pub idle_operator_mins: u64,
    /// Base URL of the operator event-stream/HTTP backend, e.g. `http://localhost:9100`.
    #[serde(default = "default_operator_base_url")]
    pub base_url: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_response_timeout_secs: default_operator_response_timeout_secs(),
            idle_duration_mins: default_idle_duration_mins(),
            idle_operator_mins: default_idle_operator_mins(),
            base_url: default_operator_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_period_secs")]
    pub flush_period_secs: u64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_period_secs: default_flush_period_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_secs: default_retry_base_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_assist_answer_timeout_mins")]
    pub error_timeout_mins: u64,
    /// When true, `AskPipeline::ask` returns a synthetic string instead of
    /// calling out to `AssistantClient` — used by integration tests.
    #[serde(default)]
    pub test_answer: bool,
    #[serde(default)]
    pub audio_msg: bool,
    #[serde(default)]
    pub production_mode: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            error_timeout_mins: default_assist_answer_timeout_mins(),
            test_answer: false,
            audio_msg: false,
            production_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Notification webhook host/port, e.g. for Telegram delivery.
    pub telegram_host: Option<String>,
    pub telegram_port: Option<u16>,
    pub mail_host: Option<String>,
    pub mail_port: Option<u16>,
    /// Development-only: disable TLS certificate verification for webhook delivery.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            telegram_host: None,
            telegram_port: None,
            mail_host: None,
            mail_port: None,
            insecure_skip_verify: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_user_model_ttl_mins() -> u64 {
    30
}
fn default_sweep_interval_mins() -> u64 {
    DEFAULT_SWEEP_INTERVAL_MINS
}
fn default_operator_response_timeout_secs() -> u64 {
    DEFAULT_OPERATOR_RESPONSE_TIMEOUT_SECS
}
fn default_idle_duration_mins() -> u64 {
    DEFAULT_IDLE_DURATION_MINS
}
fn default_idle_operator_mins() -> u64 {
    DEFAULT_IDLE_OPERATOR_MINS
}
fn default_operator_base_url() -> String {
    "http://localhost:9100".to_string()
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_flush_period_secs() -> u64 {
    DEFAULT_FLUSH_PERIOD_SECS
}
fn default_retry_max_attempts() -> u32 {
    DEFAULT_RETRY_MAX_ATTEMPTS
}
fn default_retry_base_delay_secs() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_SECS
}
fn default_assist_answer_timeout_mins() -> u64 {
    DEFAULT_ASSIST_ANSWER_TIMEOUT_MINS
}
fn default_port() -> u16 {
    8089
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.dispatch/dispatch.db", home)
}

impl DispatchConfig {
    /// Load config from a TOML file with `DISPATCH_*` env var overrides.
    ///
    /// Checks, in order: explicit `config_path` argument, then
    /// `~/.dispatch/dispatch.toml`. Missing file is not an error — the
    /// figment defaults (above) populate every field.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: DispatchConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("DISPATCH_").split("_"))
            .extract()
            .map_err(|e| crate::error::DispatchError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.dispatch/dispatch.toml", home)
}
