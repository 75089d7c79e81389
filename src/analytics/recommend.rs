use crate::analytics::models::{
    ActionPriority, ActionRecommendation, AnomalyReport, AnomalyType, RecommendedAction,
    RiskAssessment, RiskLevel,
};
use crate::models::ActionType;

/// Derives ranked action guidance from a risk assessment and an anomaly
/// report. A fixed rule table, not a model: identical inputs always yield
/// the identical recommendation.
pub fn recommend_actions(
    assessment: &RiskAssessment,
    report: &AnomalyReport,
) -> ActionRecommendation {
    let mut actions: Vec<RecommendedAction> = Vec::new();

    let has = |t: AnomalyType| report.anomalies.iter().any(|a| a.anomaly_type == t);

    if assessment.risk_level == RiskLevel::High && has(AnomalyType::SuddenSpike) {
        actions.push(RecommendedAction {
            action: ActionType::Freeze24h,
            confidence: 0.9,
            expected_impact: "Stops the anomalous usage entirely for 24 hours".to_string(),
        });
        actions.push(RecommendedAction {
            action: ActionType::Throttle,
            confidence: 0.7,
            expected_impact: "Caps usage while keeping the device reachable".to_string(),
        });
    } else if has(AnomalyType::SustainedDrain) {
        actions.push(RecommendedAction {
            action: ActionType::Throttle,
            confidence: 0.7,
            expected_impact: "Brings sustained usage back toward the baseline".to_string(),
        });
    }

    if has(AnomalyType::UnexpectedRoaming) {
        actions.push(RecommendedAction {
            action: ActionType::NotifyUser,
            confidence: 0.6,
            expected_impact: "Customer reviews the device's roaming settings".to_string(),
        });
    }
    if has(AnomalyType::Inactivity) {
        actions.push(RecommendedAction {
            action: ActionType::NotifyUser,
            confidence: 0.5,
            expected_impact: "Customer checks whether the device is still powered".to_string(),
        });
    }

    // Keep one entry per action, highest confidence wins; rank by confidence.
    actions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    actions.dedup_by_key(|a| a.action);

    let priority = if report.critical_count > 0 {
        ActionPriority::Urgent
    } else {
        match assessment.risk_level {
            RiskLevel::High => ActionPriority::High,
            RiskLevel::Medium => ActionPriority::Medium,
            RiskLevel::Low => ActionPriority::Low,
        }
    };

    let reasoning = if actions.is_empty() {
        "Usage is within the expected profile; no intervention suggested".to_string()
    } else {
        format!(
            "{} anomalies detected, risk score {:.2}",
            report.total_anomalies, assessment.risk_score
        )
    };

    ActionRecommendation {
        sim_id: assessment.sim_id,
        recommended_actions: actions,
        priority,
        reasoning,
    }
}
