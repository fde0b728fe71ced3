//! Configuration management with validation and defaults
//!
//! Centralized configuration for stake limits, fee schedules, lifecycle
//! timing, oracle request parameters and the service layer.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Comprehensive engine configuration with validation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CasinoConfig {
    pub limits: LimitsConfig,
    pub fees: FeeScheduleConfig,
    pub timing: TimingConfig,
    pub oracle: OracleRequestConfig,
    pub payouts: PayoutRetryConfig,
    pub service: ServiceConfig,
}

impl Default for CasinoConfig {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            fees: FeeScheduleConfig::default(),
            timing: TimingConfig::default(),
            oracle: OracleRequestConfig::default(),
            payouts: PayoutRetryConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

/// Stake and payout bounds, all in base currency units
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub min_stake: u64,
    pub max_stake: u64,
    /// Largest profit a single wager may reserve above its stake.
    pub max_profit: u64,
    /// Payouts are rounded down to a multiple of this.
    pub payout_granularity: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_stake: 10_000_000,
            max_stake: 1_000_000_000_000,
            max_profit: 300_000_000_000,
            payout_granularity: 1_000_000,
        }
    }
}

/// House edge override for one game class.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HouseEdgeEntry {
    pub modulo: u64,
    pub percent: u64,
}

/// House edge table and wealth tax parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeeScheduleConfig {
    /// Per-modulo house edge overrides; table scan, first match wins.
    pub house_edges: Vec<HouseEdgeEntry>,
    /// Edge applied to any modulo without an override.
    pub default_house_edge_percent: u64,
    /// Each full multiple of this in the stake adds one tax step.
    pub wealth_tax_threshold: u64,
    /// Percent added per wealth tax step.
    pub wealth_tax_step_percent: u64,
}

impl Default for FeeScheduleConfig {
    fn default() -> Self {
        Self {
            house_edges: vec![
                HouseEdgeEntry { modulo: 2, percent: 2 },
                HouseEdgeEntry { modulo: 6, percent: 2 },
                HouseEdgeEntry { modulo: 36, percent: 2 },
                HouseEdgeEntry { modulo: 37, percent: 3 },
                HouseEdgeEntry { modulo: 100, percent: 1 },
            ],
            default_house_edge_percent: 2,
            wealth_tax_threshold: 100_000_000_000,
            wealth_tax_step_percent: 1,
        }
    }
}

/// Lifecycle timing, all in seconds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimingConfig {
    /// How long after placement an oracle fulfillment is accepted.
    pub fulfillment_window_secs: u64,
    /// How long after placement a refund becomes available.
    pub refund_cooldown_secs: u64,
    /// Fee conversion is refused this long after the upstream recovers.
    pub recovery_grace_period_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fulfillment_window_secs: 3_600,
            refund_cooldown_secs: 3_600,
            recovery_grace_period_secs: 3_600,
        }
    }
}

/// Parameters attached to every entropy request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OracleRequestConfig {
    pub compute_budget: u64,
    pub confirmations: u32,
}

impl Default for OracleRequestConfig {
    fn default() -> Self {
        Self {
            compute_budget: 200_000,
            confirmations: 3,
        }
    }
}

/// Retry tuning for the pending payout ledger
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayoutRetryConfig {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_attempts: u32,
}

impl Default for PayoutRetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 2_000,
            backoff_max_ms: 60_000,
            max_attempts: 5,
        }
    }
}

/// Service layer tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub event_channel_capacity: usize,
    pub sweep_interval_ms: u64,
    pub payout_drain_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: 10_000,
            sweep_interval_ms: 1_000,
            payout_drain_interval_ms: 500,
        }
    }
}

/// Configuration validation and factory methods
impl CasinoConfig {
    /// Standard production defaults.
    pub fn standard() -> Self {
        Self::default()
    }

    /// Create configuration tuned for high-volume deployments
    pub fn high_throughput() -> Self {
        Self {
            service: ServiceConfig {
                event_channel_capacity: 50_000,
                sweep_interval_ms: 250,
                payout_drain_interval_ms: 100,
            },
            ..Default::default()
        }
    }

    /// Create configuration with small stakes and short windows for tests
    pub fn integration_test() -> Self {
        Self {
            limits: LimitsConfig {
                min_stake: 1_000,
                max_stake: 1_000_000_000,
                max_profit: 1_000_000_000,
                payout_granularity: 1,
            },
            timing: TimingConfig {
                fulfillment_window_secs: 60,
                refund_cooldown_secs: 2,
                recovery_grace_period_secs: 0,
            },
            payouts: PayoutRetryConfig {
                backoff_base_ms: 10,
                backoff_max_ms: 100,
                max_attempts: 3,
            },
            service: ServiceConfig {
                event_channel_capacity: 1_024,
                sweep_interval_ms: 50,
                payout_drain_interval_ms: 20,
            },
            ..Default::default()
        }
    }

    /// House edge percent for a game class, falling back to the default.
    pub fn house_edge_percent(&self, modulo: u64) -> u64 {
        self.fees
            .house_edges
            .iter()
            .find(|entry| entry.modulo == modulo)
            .map(|entry| entry.percent)
            .unwrap_or(self.fees.default_house_edge_percent)
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.min_stake == 0 {
            return Err(ConfigError::InvalidValue(
                "limits.min_stake must be > 0".to_string(),
            ));
        }

        if self.limits.max_stake < self.limits.min_stake {
            return Err(ConfigError::LogicalInconsistency(
                "limits.max_stake must be >= limits.min_stake".to_string(),
            ));
        }

        if self.limits.payout_granularity == 0 {
            return Err(ConfigError::InvalidValue(
                "limits.payout_granularity must be > 0".to_string(),
            ));
        }

        if self.fees.wealth_tax_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "fees.wealth_tax_threshold must be > 0".to_string(),
            ));
        }

        if self.fees.default_house_edge_percent >= 100 {
            return Err(ConfigError::InvalidValue(
                "fees.default_house_edge_percent must be < 100".to_string(),
            ));
        }

        for entry in &self.fees.house_edges {
            if entry.percent >= 100 {
                return Err(ConfigError::InvalidValue(format!(
                    "house edge for modulo {} must be < 100",
                    entry.modulo
                )));
            }
        }

        let mut seen = Vec::with_capacity(self.fees.house_edges.len());
        for entry in &self.fees.house_edges {
            if seen.contains(&entry.modulo) {
                return Err(ConfigError::LogicalInconsistency(format!(
                    "duplicate house edge entry for modulo {}",
                    entry.modulo
                )));
            }
            seen.push(entry.modulo);
        }

        if self.timing.fulfillment_window_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "timing.fulfillment_window_secs must be > 0".to_string(),
            ));
        }

        if self.timing.refund_cooldown_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "timing.refund_cooldown_secs must be > 0".to_string(),
            ));
        }

        if self.payouts.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "payouts.max_attempts must be > 0".to_string(),
            ));
        }

        if self.payouts.backoff_base_ms > self.payouts.backoff_max_ms {
            return Err(ConfigError::LogicalInconsistency(
                "payouts.backoff_base_ms must be <= payouts.backoff_max_ms".to_string(),
            ));
        }

        if self.service.event_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "service.event_channel_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Convert to duration types for internal use
    pub fn fulfillment_window(&self) -> Duration {
        Duration::from_secs(self.timing.fulfillment_window_secs)
    }

    pub fn refund_cooldown(&self) -> Duration {
        Duration::from_secs(self.timing.refund_cooldown_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.service.sweep_interval_ms)
    }

    pub fn payout_drain_interval(&self) -> Duration {
        Duration::from_millis(self.service.payout_drain_interval_ms)
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("configuration logical inconsistency: {0}")]
    LogicalInconsistency(String),

    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> Result<CasinoConfig, ConfigError> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            CasinoConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> Result<CasinoConfig, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(&self, config: &mut CasinoConfig) -> Result<(), ConfigError> {
        if let Ok(raw) = env::var("CROUPIER_MIN_STAKE") {
            config.limits.min_stake = raw.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("CROUPIER_MIN_STAKE={} is not a number", raw))
            })?;
        }
        if let Ok(raw) = env::var("CROUPIER_MAX_STAKE") {
            config.limits.max_stake = raw.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("CROUPIER_MAX_STAKE={} is not a number", raw))
            })?;
        }
        if let Ok(raw) = env::var("CROUPIER_FULFILLMENT_WINDOW_SECS") {
            config.timing.fulfillment_window_secs = raw.parse().map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "CROUPIER_FULFILLMENT_WINDOW_SECS={} is not a number",
                    raw
                ))
            })?;
        }
        if let Ok(raw) = env::var("CROUPIER_REFUND_COOLDOWN_SECS") {
            config.timing.refund_cooldown_secs = raw.parse().map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "CROUPIER_REFUND_COOLDOWN_SECS={} is not a number",
                    raw
                ))
            })?;
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &CasinoConfig, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SaveFailed(format!("failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigError::SaveFailed(format!("failed to write to {}: {}", path, e)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
