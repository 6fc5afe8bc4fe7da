use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration (spec §6). Loaded from TOML with `OPTEX_`-prefixed
/// environment variable overrides (double underscore separates nesting,
/// e.g. `OPTEX_RECORDER__FLUSH_INTERVAL_MS`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub trading: TradingConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub order: OrderConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// "live" or "simulated".
    pub mode: String,
    /// Required in live mode; ignored in simulated mode.
    #[serde(default)]
    pub broker_base_url: Option<String>,
    #[serde(default)]
    pub broker_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorConfig {
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    #[serde(default = "default_available_capital")]
    pub available_capital: rust_decimal::Decimal,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self { slippage_bps: default_slippage_bps(), available_capital: default_available_capital() }
    }
}

fn default_slippage_bps() -> u32 {
    5
}

fn default_available_capital() -> rust_decimal::Decimal {
    rust_decimal::Decimal::from(1_000_000)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfig {
    #[serde(default = "default_max_instruments")]
    pub max_instruments: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { max_instruments: default_max_instruments() }
    }
}

fn default_max_instruments() -> usize {
    crate::subscription::DEFAULT_MAX_INSTRUMENTS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyConfig {
    #[serde(default = "default_idempotency_window_secs")]
    pub window_secs: u64,
}

impl IdempotencyConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self { window_secs: default_idempotency_window_secs() }
    }
}

fn default_idempotency_window_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfig {
    #[serde(default)]
    pub timeout: OrderTimeoutConfig,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self { timeout: OrderTimeoutConfig::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTimeoutConfig {
    #[serde(default = "default_market_timeout_secs")]
    pub market_secs: u64,
    #[serde(default = "default_limit_timeout_secs")]
    pub limit_secs: u64,
}

impl Default for OrderTimeoutConfig {
    fn default() -> Self {
        Self { market_secs: default_market_timeout_secs(), limit_secs: default_limit_timeout_secs() }
    }
}

fn default_market_timeout_secs() -> u64 {
    10
}

fn default_limit_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Local time of day (broker timezone) at which the session expires,
    /// formatted "HH:MM:SS". Defaults to 06:00:00.
    #[serde(default = "default_six_am_boundary")]
    pub six_am_boundary: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { six_am_boundary: default_six_am_boundary() }
    }
}

fn default_six_am_boundary() -> String {
    "06:00:00".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderConfig {
    #[serde(default = "default_recorder_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default = "default_true")]
    pub compress_after_close: bool,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            directory: default_recorder_directory(),
            auto_start: false,
            compress_after_close: default_true(),
            flush_interval_ms: default_flush_interval_ms(),
            flush_threshold: default_flush_threshold(),
        }
    }
}

fn default_recorder_directory() -> PathBuf {
    PathBuf::from("./recordings")
}

fn default_true() -> bool {
    true
}

fn default_flush_interval_ms() -> u64 {
    300_000
}

fn default_flush_threshold() -> usize {
    1_000
}
