// =============================================================================
// Configuration — immutable engine settings, loaded once at startup
// =============================================================================
//
// Every tunable knob of the decision core lives here. The struct is built
// once in main() and passed by reference into each component; nothing mutates
// it afterwards.
//
// All fields carry `#[serde(default)]` so that an older JSON file missing new
// fields still loads. A handful of operational fields can additionally be
// overridden from the environment (HELIOS_* variables).
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_investment_pct() -> f64 {
    3.0
}

fn default_max_loss_pct() -> f64 {
    3.0
}

fn default_leverage() -> u32 {
    10
}

fn default_risk_reward() -> String {
    "1:2".to_string()
}

fn default_true() -> bool {
    true
}

fn default_macd_delta_ratio() -> f64 {
    0.66
}

fn default_macd_fast_span() -> usize {
    18
}

fn default_macd_slow_span() -> usize {
    39
}

fn default_macd_signal_span() -> usize {
    15
}

fn default_kline_limit() -> u32 {
    500
}

fn default_score_threshold() -> u32 {
    60
}

fn default_max_investment_fraction() -> f64 {
    0.25
}

fn default_fee_rate() -> f64 {
    0.0005
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// Config
// =============================================================================

/// Immutable configuration for the Helios signal relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // --- Sizing & risk -------------------------------------------------------

    /// Percentage of the account balance committed per trade (e.g. 3.0 = 3 %).
    #[serde(default = "default_investment_pct")]
    pub investment_pct: f64,

    /// Maximum tolerated loss per trade as a percentage of balance.
    #[serde(default = "default_max_loss_pct")]
    pub max_loss_pct: f64,

    /// Futures leverage applied to every new position.
    #[serde(default = "default_leverage")]
    pub leverage: u32,

    /// Risk:reward ratio as a "risk:reward" string, e.g. "1:2".
    #[serde(default = "default_risk_reward")]
    pub risk_reward: String,

    /// Hard cap on the invested amount as a fraction of balance
    /// (0.25 = never commit more than a quarter of the account).
    #[serde(default = "default_max_investment_fraction")]
    pub max_investment_fraction: f64,

    /// Taker fee rate applied per leg when estimating realized PnL.
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,

    // --- Momentum filter -----------------------------------------------------

    /// Whether the MACD momentum gate must confirm new positions.
    #[serde(default = "default_true")]
    pub enable_macd_filter: bool,

    /// Ratio threshold for the histogram-strengthening condition (< 1.0).
    #[serde(default = "default_macd_delta_ratio")]
    pub macd_delta_ratio: f64,

    /// Fast EMA span for the MACD line.
    #[serde(default = "default_macd_fast_span")]
    pub macd_fast_span: usize,

    /// Slow EMA span for the MACD line.
    #[serde(default = "default_macd_slow_span")]
    pub macd_slow_span: usize,

    /// Span of the signal line smoothing.
    #[serde(default = "default_macd_signal_span")]
    pub macd_signal_span: usize,

    /// Number of candles fetched for the momentum computation.
    #[serde(default = "default_kline_limit")]
    pub kline_limit: u32,

    // --- Scoring -------------------------------------------------------------

    /// Minimum confluence score (0-100) required to open a new position.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: u32,

    // --- Server --------------------------------------------------------------

    /// Address the webhook server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            investment_pct: default_investment_pct(),
            max_loss_pct: default_max_loss_pct(),
            leverage: default_leverage(),
            risk_reward: default_risk_reward(),
            max_investment_fraction: default_max_investment_fraction(),
            fee_rate: default_fee_rate(),
            enable_macd_filter: true,
            macd_delta_ratio: default_macd_delta_ratio(),
            macd_fast_span: default_macd_fast_span(),
            macd_slow_span: default_macd_slow_span(),
            macd_signal_span: default_macd_signal_span(),
            kline_limit: default_kline_limit(),
            score_threshold: default_score_threshold(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Returns an error if the file is missing or malformed so the caller can
    /// fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            leverage = config.leverage,
            score_threshold = config.score_threshold,
            macd_filter = config.enable_macd_filter,
            "config loaded"
        );

        Ok(config)
    }

    /// Apply HELIOS_* environment overrides on top of the loaded values.
    ///
    /// Only operational knobs are overridable this way; anything unparseable
    /// is silently left at the file/default value.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HELIOS_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = env_parse("HELIOS_LEVERAGE") {
            self.leverage = v;
        }
        if let Some(v) = env_parse("HELIOS_INVESTMENT_PCT") {
            self.investment_pct = v;
        }
        if let Some(v) = env_parse("HELIOS_MAX_LOSS_PCT") {
            self.max_loss_pct = v;
        }
        if let Some(v) = env_parse("HELIOS_SCORE_THRESHOLD") {
            self.score_threshold = v;
        }
        if let Some(v) = env_parse("HELIOS_MACD_DELTA_RATIO") {
            self.macd_delta_ratio = v;
        }
        if let Some(v) = env_parse::<bool>("HELIOS_ENABLE_MACD_FILTER") {
            self.enable_macd_filter = v;
        }
    }

    /// Split the `risk_reward` string into its (risk, reward) parts.
    pub fn risk_reward_parts(&self) -> Option<(f64, f64)> {
        let (risk, reward) = self.risk_reward.split_once(':')?;
        let risk: f64 = risk.trim().parse().ok()?;
        let reward: f64 = reward.trim().parse().ok()?;
        if risk <= 0.0 || reward <= 0.0 {
            return None;
        }
        Some((risk, reward))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}
