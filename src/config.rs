use serde::Deserialize;
use std::{env, fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Invalid value for {var}: {value}")]
    InvalidEnvValue { var: String, value: String },
}

/// Conflict and duration policy for administrative actions.
///
/// The reference duration table only genuinely time-boxes `freeze_24h`;
/// whether `throttle` should also hold the per-device slot is a deployment
/// decision, so it is a knob here rather than a hard-coded rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActionPolicy {
    pub freeze_duration_secs: i64,
    pub throttle_is_time_boxed: bool,
    pub throttle_duration_secs: i64,
}

impl Default for ActionPolicy {
    fn default() -> Self {
        Self {
            freeze_duration_secs: 24 * 3600,
            throttle_is_time_boxed: true,
            throttle_duration_secs: 2 * 3600,
        }
    }
}

impl ActionPolicy {
    /// Duration an accepted action holds the per-device slot.
    /// Zero means the action is instantaneous and never blocks.
    pub fn duration(&self, action: crate::models::ActionType) -> chrono::Duration {
        use crate::models::ActionType::*;
        match action {
            Freeze24h => chrono::Duration::seconds(self.freeze_duration_secs),
            Throttle if self.throttle_is_time_boxed => {
                chrono::Duration::seconds(self.throttle_duration_secs)
            }
            Throttle | BlockSim | NotifyUser | Activate => chrono::Duration::zero(),
        }
    }
}

/// Tuning knobs for the usage analytics rules. All thresholds are fixed,
/// deterministic comparisons; there is no learned model behind them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Number of trailing samples averaged into the baseline.
    pub baseline_window: usize,
    /// Number of most recent samples compared against the baseline.
    pub current_window: usize,
    /// Multiplier over baseline that flags a sudden spike.
    pub spike_multiplier: f64,
    /// Daily MB under which a sample counts as inactive.
    pub inactivity_floor_mb: f64,
    /// Consecutive samples required for sustained-drain / inactivity flags.
    pub sustained_min_samples: usize,
    /// Floor substituted for near-zero baselines in deviation math.
    pub baseline_floor_mb: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            baseline_window: 7,
            current_window: 3,
            spike_multiplier: 3.0,
            inactivity_floor_mb: 5.0,
            sustained_min_samples: 3,
            baseline_floor_mb: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Period of the background action expiry sweep.
    pub expiry_sweep_seconds: u64,
    /// How many days of usage history to request per device.
    pub usage_window_days: u32,
    pub action_policy: ActionPolicy,
    pub analytics: AnalyticsConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            expiry_sweep_seconds: 60,
            usage_window_days: 30,
            action_policy: ActionPolicy::default(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Loads the config from a TOML file. Missing keys fall back to defaults.
    pub fn load(config_path_str: &str) -> Result<Self, ConfigError> {
        let config_path = Path::new(config_path_str);
        let config_str = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path_str.to_string(),
            source: e,
        })?;
        toml::from_str(&config_str).map_err(|e| ConfigError::Parse {
            path: config_path_str.to_string(),
            source: e,
        })
    }

    /// Builds a config from environment variables, falling back to defaults
    /// for anything unset. Values outside the target type's range are
    /// rejected, never truncated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = FleetConfig::default();
        if let Some(v) = read_env::<u64>("SIMFLEET_EXPIRY_SWEEP_SECONDS")? {
            config.expiry_sweep_seconds = v;
        }
        if let Some(v) = read_env::<u32>("SIMFLEET_USAGE_WINDOW_DAYS")? {
            config.usage_window_days = v;
        }
        if let Some(v) = read_env::<u32>("SIMFLEET_FREEZE_DURATION_SECS")? {
            config.action_policy.freeze_duration_secs = i64::from(v);
        }
        if let Some(v) = read_env::<u32>("SIMFLEET_THROTTLE_DURATION_SECS")? {
            config.action_policy.throttle_duration_secs = i64::from(v);
        }
        if let Ok(v) = env::var("SIMFLEET_THROTTLE_TIME_BOXED") {
            config.action_policy.throttle_is_time_boxed = v == "1" || v.eq_ignore_ascii_case("true");
        }
        Ok(config)
    }
}

fn read_env<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvValue {
                var: var.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
