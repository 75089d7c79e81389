use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ActionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Fixed thresholds: low < 0.3 <= medium < 0.7 <= high.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            RiskLevel::High
        } else if score >= 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// One weighted contributor to a device's risk score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    #[serde(rename = "type")]
    pub factor_type: String,
    /// Impact weight in [0, 1].
    pub impact: f64,
    pub description: String,
}

/// Advisory risk snapshot for a device. Recomputed on demand from usage
/// history; a cached copy may be stale and is overwritten by the next
/// computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub sim_id: i64,
    pub risk_level: RiskLevel,
    /// Aggregate score in [0, 1].
    pub risk_score: f64,
    pub anomaly_count: u32,
    pub last_calculated: DateTime<Utc>,
    pub factors: Vec<RiskFactor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    SuddenSpike,
    SustainedDrain,
    Inactivity,
    UnexpectedRoaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnomalySeverity {
    /// Buckets deviation magnitude: low < 50% <= medium < 150% <= high
    /// < 300% <= critical.
    pub fn from_deviation(deviation_percent: f64) -> Self {
        let magnitude = deviation_percent.abs();
        if magnitude >= 300.0 {
            AnomalySeverity::Critical
        } else if magnitude >= 150.0 {
            AnomalySeverity::High
        } else if magnitude >= 50.0 {
            AnomalySeverity::Medium
        } else {
            AnomalySeverity::Low
        }
    }
}

/// A usage sample that contributed to an anomaly, kept verbatim so the
/// detection is independently auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceDataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub is_anomalous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvidence {
    pub baseline_value: f64,
    pub current_value: f64,
    pub deviation_percentage: f64,
    pub comparison_period: String,
    pub data_points: Vec<EvidenceDataPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedAnomaly {
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub severity: AnomalySeverity,
    pub timestamp: DateTime<Utc>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub description: String,
    pub evidence: AnomalyEvidence,
    pub recommendation: String,
    pub affected_metrics: Vec<String>,
}

/// Full anomaly detection result for one device. Derived, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub sim_id: i64,
    pub anomalies: Vec<DetailedAnomaly>,
    pub total_anomalies: usize,
    pub critical_count: usize,
    pub analysis_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub mb_used: f64,
    pub roaming_mb: f64,
    pub sms_count: Option<u32>,
    pub is_anomaly: bool,
    pub anomaly_types: Vec<AnomalyType>,
}

/// Pure reduction over a usage window. All averages default to zero for an
/// empty sample set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesSummary {
    pub total_mb: f64,
    pub average_daily_mb: f64,
    pub peak_day_mb: f64,
    pub anomaly_days: usize,
    pub roaming_days: usize,
    pub inactive_days: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesData {
    pub sim_id: i64,
    pub data_points: Vec<TimeSeriesPoint>,
    pub summary: TimeSeriesSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPriority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub action: ActionType,
    /// Confidence in [0, 1] from the fixed rule table.
    pub confidence: f64,
    pub expected_impact: String,
}

/// Deterministic action guidance derived from a risk assessment and an
/// anomaly report. Same inputs always produce the same recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecommendation {
    pub sim_id: i64,
    pub recommended_actions: Vec<RecommendedAction>,
    pub priority: ActionPriority,
    pub reasoning: String,
}
