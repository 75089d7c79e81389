use chrono::{DateTime, Utc};
use tracing::debug;

use crate::analytics::models::{RiskAssessment, RiskFactor, RiskLevel};
use crate::analytics::{deviation_percent, split_windows};
use crate::config::AnalyticsConfig;
use crate::models::{DeviceProfile, UsageSample};

/// Computes the advisory risk snapshot for a device from its usage history.
///
/// Pure and synchronous; `samples` is expected oldest-first. The score is
/// the clamped sum of the impact weights of every triggered factor.
pub fn compute_risk_assessment(
    sim_id: i64,
    samples: &[UsageSample],
    profile: &DeviceProfile,
    now: DateTime<Utc>,
    config: &AnalyticsConfig,
) -> RiskAssessment {
    let mut factors: Vec<RiskFactor> = Vec::new();

    if !samples.is_empty() {
        let windows = split_windows(samples, config);
        let deviation = deviation_percent(
            windows.baseline_mb,
            windows.current_mb,
            config.baseline_floor_mb,
        );

        if deviation > 200.0 {
            factors.push(RiskFactor {
                factor_type: "usage_spike".to_string(),
                impact: 0.8,
                description: format!(
                    "Usage up {deviation:.0}% against the {:.1} MB baseline",
                    windows.baseline_mb
                ),
            });
        } else if deviation > 100.0 {
            factors.push(RiskFactor {
                factor_type: "usage_spike".to_string(),
                impact: 0.5,
                description: format!(
                    "Usage up {deviation:.0}% against the {:.1} MB baseline",
                    windows.baseline_mb
                ),
            });
        }

        let current_len = config.current_window.min(samples.len());
        let recent = &samples[samples.len() - current_len..];
        let roaming_mb: f64 = recent.iter().map(|s| s.roaming_mb).sum();
        if roaming_mb > 0.0 && !profile.roaming_expected {
            factors.push(RiskFactor {
                factor_type: "unexpected_roaming".to_string(),
                impact: 0.6,
                description: format!(
                    "{roaming_mb:.1} MB roaming on a device profile that expects none"
                ),
            });
        }

        if windows.current_mb < config.inactivity_floor_mb {
            factors.push(RiskFactor {
                factor_type: "inactivity".to_string(),
                impact: 0.3,
                description: format!(
                    "Recent usage {:.1} MB below the {:.1} MB activity floor",
                    windows.current_mb, config.inactivity_floor_mb
                ),
            });
        }
    }

    let risk_score = factors
        .iter()
        .map(|f| f.impact)
        .sum::<f64>()
        .clamp(0.0, 1.0);
    let risk_level = RiskLevel::from_score(risk_score);

    let anomaly_count =
        crate::analytics::detect_anomalies(sim_id, samples, profile, now, config).total_anomalies
            as u32;

    debug!(
        sim_id = sim_id,
        risk_score = risk_score,
        anomaly_count = anomaly_count,
        "Computed risk assessment."
    );

    RiskAssessment {
        sim_id,
        risk_level,
        risk_score,
        anomaly_count,
        last_calculated: now,
        factors,
    }
}
