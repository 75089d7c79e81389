pub mod anomaly;
pub mod models;
pub mod recommend;
pub mod risk;
pub mod timeseries;

pub use anomaly::detect_anomalies;
pub use recommend::recommend_actions;
pub use risk::compute_risk_assessment;
pub use timeseries::{build_time_series, summarize};

use crate::config::AnalyticsConfig;
use crate::models::UsageSample;

/// Baseline/current split of a usage window.
///
/// The baseline is the mean of the `baseline_window` samples preceding the
/// most recent `current_window`; the current value is the mean of that
/// recent window. When history is too short, whatever older samples exist
/// form the baseline.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UsageWindows {
    pub baseline_mb: f64,
    pub current_mb: f64,
}

pub(crate) fn split_windows(samples: &[UsageSample], config: &AnalyticsConfig) -> UsageWindows {
    let current_len = config.current_window.min(samples.len());
    let (older, current) = samples.split_at(samples.len() - current_len);
    let baseline_start = older.len().saturating_sub(config.baseline_window);
    let baseline = &older[baseline_start..];

    UsageWindows {
        baseline_mb: mean_mb(baseline),
        current_mb: mean_mb(current),
    }
}

pub(crate) fn mean_mb(samples: &[UsageSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.mb_used).sum::<f64>() / samples.len() as f64
}

/// Deviation of `current` from `baseline` in percent. The baseline is
/// floored to keep the division defined for idle devices.
pub(crate) fn deviation_percent(baseline: f64, current: f64, floor: f64) -> f64 {
    let baseline = baseline.max(floor);
    (current - baseline) / baseline * 100.0
}
