//! Configuration System
//!
//! Runtime configuration is loaded from a single TOML file and may be
//! overridden with environment variables prefixed `OPTEX_`. Double
//! underscore (`__`) separates nested fields, e.g.
//! `OPTEX_RECORDER__FLUSH_INTERVAL_MS=60000`.
//!
//! ## Precedence (later overrides earlier)
//!
//! 1. Struct defaults (`#[serde(default = "...")]` on every optional field)
//! 2. The TOML file passed to [`Config::load`]
//! 3. `OPTEX_*` environment variables
//!
//! ```rust,no_run
//! use optex_core::config::Config;
//!
//! let config = Config::load("config/default.toml")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

const ENV_PREFIX: &str = "OPTEX_";

impl Config {
    /// Loads configuration from `path`, then applies `OPTEX_`-prefixed
    /// environment variable overrides, then validates the result.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        apply_env_overrides(&mut value, ENV_PREFIX)?;

        let config: Config = value
            .try_into()
            .context("deserializing configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from the conventional default location.
    pub fn load_default() -> Result<Self> {
        Self::load("config/default.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.trading.mode != "live" && self.trading.mode != "simulated" {
            anyhow::bail!("Invalid trading mode '{}', must be 'live' or 'simulated'", self.trading.mode);
        }
        if self.trading.mode == "live" && self.trading.broker_base_url.is_none() {
            anyhow::bail!("trading.brokerBaseUrl is required when trading.mode is 'live'");
        }
        if self.subscription.max_instruments == 0 {
            anyhow::bail!("subscription.maxInstruments must be positive");
        }
        if self.idempotency.window_secs == 0 {
            anyhow::bail!("idempotency.windowSecs must be positive");
        }
        if self.order.timeout.market_secs == 0 || self.order.timeout.limit_secs == 0 {
            anyhow::bail!("order.timeout.market and order.timeout.limit must be positive");
        }
        if chrono::NaiveTime::parse_from_str(&self.session.six_am_boundary, "%H:%M:%S").is_err() {
            anyhow::bail!(
                "session.sixAmBoundary '{}' must be formatted HH:MM:SS",
                self.session.six_am_boundary
            );
        }
        Ok(())
    }
}

/// Walks `OPTEX_FOO__BAR=value` style environment variables into the parsed
/// TOML tree, creating intermediate tables as needed. Values are parsed as
/// TOML scalars first (so `5`, `true`, `"x"` behave as numbers/bools/strings)
/// and fall back to a plain string.
fn apply_env_overrides(root: &mut toml::Value, prefix: &str) -> Result<()> {
    for (key, raw_value) in std::env::vars() {
        let Some(path) = key.strip_prefix(prefix) else { continue };
        let segments: Vec<String> = path.split("__").map(|s| to_camel_case(&s.to_lowercase())).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            continue;
        }
        set_path(root, &segments, parse_scalar(&raw_value));
    }
    Ok(())
}

fn parse_scalar(raw: &str) -> toml::Value {
    toml::from_str::<toml::Value>(raw).unwrap_or_else(|_| toml::Value::String(raw.to_string()))
}

/// Converts a lowercased `snake_case` segment (e.g. from an env var) into
/// the `camelCase` form the TOML config files and `#[serde(rename_all)]`
/// structs use, so `OPTEX_SIMULATOR__SLIPPAGE_BPS` lands on `slippageBps`.
fn to_camel_case(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut upper_next = false;
    for ch in segment.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn set_path(root: &mut toml::Value, segments: &[String], value: toml::Value) {
    if !root.is_table() {
        *root = toml::Value::Table(Default::default());
    }
    let table = root.as_table_mut().expect("just ensured table");

    let Some((head, rest)) = segments.split_first() else { return };
    if rest.is_empty() {
        table.insert(head.clone(), value);
        return;
    }
    let entry = table
        .entry(head.clone())
        .or_insert_with(|| toml::Value::Table(Default::default()));
    set_path(entry, rest, value);
}
