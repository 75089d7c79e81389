use crate::analytics::models::{AnomalyType, TimeSeriesData, TimeSeriesPoint, TimeSeriesSummary};
use crate::analytics::split_windows;
use crate::config::AnalyticsConfig;
use crate::models::UsageSample;

/// Pure reduction over a usage window. Safe on an empty sample set:
/// totals and averages come back zeroed.
pub fn summarize(samples: &[UsageSample], config: &AnalyticsConfig) -> TimeSeriesSummary {
    if samples.is_empty() {
        return TimeSeriesSummary::default();
    }

    let baseline = split_windows(samples, config)
        .baseline_mb
        .max(config.baseline_floor_mb);
    let spike_threshold = config.spike_multiplier * baseline;

    let total_mb: f64 = samples.iter().map(|s| s.mb_used).sum();
    let peak_day_mb = samples.iter().map(|s| s.mb_used).fold(0.0, f64::max);

    TimeSeriesSummary {
        total_mb,
        average_daily_mb: total_mb / samples.len() as f64,
        peak_day_mb,
        anomaly_days: samples.iter().filter(|s| s.mb_used > spike_threshold).count(),
        roaming_days: samples.iter().filter(|s| s.roaming_mb > 0.0).count(),
        inactive_days: samples
            .iter()
            .filter(|s| s.mb_used < config.inactivity_floor_mb)
            .count(),
    }
}

/// Builds the chartable time series for a device: every sample annotated
/// with the anomaly rules it trips, plus the window summary.
pub fn build_time_series(
    sim_id: i64,
    samples: &[UsageSample],
    roaming_expected: bool,
    config: &AnalyticsConfig,
) -> TimeSeriesData {
    let summary = summarize(samples, config);
    let baseline = if samples.is_empty() {
        config.baseline_floor_mb
    } else {
        split_windows(samples, config)
            .baseline_mb
            .max(config.baseline_floor_mb)
    };
    let spike_threshold = config.spike_multiplier * baseline;

    let data_points = samples
        .iter()
        .map(|s| {
            let mut anomaly_types = Vec::new();
            if s.mb_used > spike_threshold {
                anomaly_types.push(AnomalyType::SuddenSpike);
            }
            if s.mb_used < config.inactivity_floor_mb {
                anomaly_types.push(AnomalyType::Inactivity);
            }
            if s.roaming_mb > 0.0 && !roaming_expected {
                anomaly_types.push(AnomalyType::UnexpectedRoaming);
            }
            TimeSeriesPoint {
                timestamp: s.timestamp,
                mb_used: s.mb_used,
                roaming_mb: s.roaming_mb,
                sms_count: s.sms_count,
                is_anomaly: !anomaly_types.is_empty(),
                anomaly_types,
            }
        })
        .collect();

    TimeSeriesData {
        sim_id,
        data_points,
        summary,
    }
}
