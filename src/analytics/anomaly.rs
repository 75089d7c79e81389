use chrono::{DateTime, Utc};

use crate::analytics::models::{
    AnomalyEvidence, AnomalyReport, AnomalySeverity, AnomalyType, DetailedAnomaly,
    EvidenceDataPoint,
};
use crate::analytics::{deviation_percent, split_windows};
use crate::config::AnalyticsConfig;
use crate::models::{DeviceProfile, UsageSample};

/// Runs the fixed anomaly rules over a device's usage history.
///
/// Every flagged anomaly carries its evidence window (baseline, current
/// value, deviation and the contributing samples) verbatim so the result
/// can be audited without re-running the detection.
pub fn detect_anomalies(
    sim_id: i64,
    samples: &[UsageSample],
    profile: &DeviceProfile,
    now: DateTime<Utc>,
    config: &AnalyticsConfig,
) -> AnomalyReport {
    let mut anomalies: Vec<DetailedAnomaly> = Vec::new();

    if !samples.is_empty() {
        let windows = split_windows(samples, config);
        let baseline = windows.baseline_mb.max(config.baseline_floor_mb);

        if let Some(a) = detect_sudden_spike(samples, baseline, config) {
            anomalies.push(a);
        }
        if let Some(a) = detect_sustained_run(
            samples,
            config,
            AnomalyType::SustainedDrain,
            |s| s.mb_used > baseline,
            baseline,
        ) {
            anomalies.push(a);
        }
        if let Some(a) = detect_sustained_run(
            samples,
            config,
            AnomalyType::Inactivity,
            |s| s.mb_used < config.inactivity_floor_mb,
            baseline,
        ) {
            anomalies.push(a);
        }
        if let Some(a) = detect_unexpected_roaming(samples, profile) {
            anomalies.push(a);
        }
    }

    let total_anomalies = anomalies.len();
    let critical_count = anomalies
        .iter()
        .filter(|a| a.severity == AnomalySeverity::Critical)
        .count();

    AnomalyReport {
        sim_id,
        anomalies,
        total_anomalies,
        critical_count,
        analysis_timestamp: now,
    }
}

fn evidence_points<F>(samples: &[UsageSample], is_anomalous: F) -> Vec<EvidenceDataPoint>
where
    F: Fn(&UsageSample) -> bool,
{
    samples
        .iter()
        .map(|s| EvidenceDataPoint {
            timestamp: s.timestamp,
            value: s.mb_used,
            is_anomalous: is_anomalous(s),
        })
        .collect()
}

fn detect_sudden_spike(
    samples: &[UsageSample],
    baseline: f64,
    config: &AnalyticsConfig,
) -> Option<DetailedAnomaly> {
    let current_len = config.current_window.min(samples.len());
    let recent = &samples[samples.len() - current_len..];
    let current = crate::analytics::mean_mb(recent);
    if current <= config.spike_multiplier * baseline {
        return None;
    }

    let deviation = deviation_percent(baseline, current, config.baseline_floor_mb);
    let threshold = config.spike_multiplier * baseline;
    Some(DetailedAnomaly {
        anomaly_type: AnomalyType::SuddenSpike,
        severity: AnomalySeverity::from_deviation(deviation),
        timestamp: recent.first().map(|s| s.timestamp)?,
        end_timestamp: recent.last().map(|s| s.timestamp),
        description: format!(
            "Usage jumped to {current:.0} MB against a {baseline:.0} MB baseline ({deviation:.0}%)"
        ),
        evidence: AnomalyEvidence {
            baseline_value: baseline,
            current_value: current,
            deviation_percentage: deviation,
            comparison_period: format!("trailing {}-sample average", config.baseline_window),
            data_points: evidence_points(recent, |s| s.mb_used > threshold),
        },
        recommendation: "Freeze the SIM temporarily and contact the customer".to_string(),
        affected_metrics: vec!["mb_used".to_string()],
    })
}

/// Flags the longest run of consecutive samples matching `predicate`, if it
/// reaches the configured minimum length. Shared by the sustained-drain and
/// inactivity rules, which differ only in their predicate and wording.
fn detect_sustained_run<F>(
    samples: &[UsageSample],
    config: &AnalyticsConfig,
    anomaly_type: AnomalyType,
    predicate: F,
    baseline: f64,
) -> Option<DetailedAnomaly>
where
    F: Fn(&UsageSample) -> bool,
{
    let mut best: Option<(usize, usize)> = None;
    let mut run_start: Option<usize> = None;
    for (i, sample) in samples.iter().enumerate() {
        if predicate(sample) {
            run_start.get_or_insert(i);
        } else if let Some(start) = run_start.take() {
            if best.map_or(true, |(bs, be)| i - start > be - bs) {
                best = Some((start, i));
            }
        }
    }
    if let Some(start) = run_start {
        if best.map_or(true, |(bs, be)| samples.len() - start > be - bs) {
            best = Some((start, samples.len()));
        }
    }

    let (start, end) = best?;
    if end - start < config.sustained_min_samples {
        return None;
    }

    let run = &samples[start..end];
    let run_mean = crate::analytics::mean_mb(run);
    let deviation = deviation_percent(baseline, run_mean, config.baseline_floor_mb);
    let (description, recommendation, metric) = match anomaly_type {
        AnomalyType::SustainedDrain => (
            format!(
                "Usage stayed above the {baseline:.0} MB baseline for {} consecutive samples",
                run.len()
            ),
            "Throttle the SIM and review the device firmware".to_string(),
            "mb_used",
        ),
        AnomalyType::Inactivity => (
            format!(
                "Usage below the {:.0} MB activity floor for {} consecutive samples",
                config.inactivity_floor_mb,
                run.len()
            ),
            "Check whether the device is powered and reachable".to_string(),
            "mb_used",
        ),
        _ => unreachable!("detect_sustained_run only handles drain and inactivity"),
    };

    Some(DetailedAnomaly {
        anomaly_type,
        severity: AnomalySeverity::from_deviation(deviation),
        timestamp: run.first().map(|s| s.timestamp)?,
        end_timestamp: run.last().map(|s| s.timestamp),
        description,
        evidence: AnomalyEvidence {
            baseline_value: baseline,
            current_value: run_mean,
            deviation_percentage: deviation,
            comparison_period: format!("{}-sample run", run.len()),
            data_points: evidence_points(run, |s| predicate(s)),
        },
        recommendation,
        affected_metrics: vec![metric.to_string()],
    })
}

fn detect_unexpected_roaming(
    samples: &[UsageSample],
    profile: &DeviceProfile,
) -> Option<DetailedAnomaly> {
    if profile.roaming_expected {
        return None;
    }
    let roaming: Vec<&UsageSample> = samples.iter().filter(|s| s.roaming_mb > 0.0).collect();
    let total_roaming: f64 = roaming.iter().map(|s| s.roaming_mb).sum();
    if total_roaming <= 0.0 {
        return None;
    }

    Some(DetailedAnomaly {
        anomaly_type: AnomalyType::UnexpectedRoaming,
        // The profile expects zero roaming, so any roaming is a full breach
        // of expectation rather than a volume deviation.
        severity: AnomalySeverity::High,
        timestamp: roaming.first().map(|s| s.timestamp)?,
        end_timestamp: roaming.last().map(|s| s.timestamp),
        description: format!(
            "{total_roaming:.1} MB roaming on a profile that expects none ({} samples)",
            roaming.len()
        ),
        evidence: AnomalyEvidence {
            baseline_value: 0.0,
            current_value: total_roaming,
            deviation_percentage: 100.0,
            comparison_period: "device profile expectation".to_string(),
            data_points: roaming
                .iter()
                .map(|s| EvidenceDataPoint {
                    timestamp: s.timestamp,
                    value: s.roaming_mb,
                    is_anomalous: true,
                })
                .collect(),
        },
        recommendation: "Verify the device's roaming settings".to_string(),
        affected_metrics: vec!["roaming_mb".to_string()],
    })
}
