use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a SIM device.
/// Mutated only through the action pipeline, never by a fetch refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimStatus {
    Active,
    Blocked,
    Frozen,
}

/// A managed IoT SIM device as returned by the fleet collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimCard {
    pub sim_id: i64,
    pub customer_id: i64,
    pub device_type: String,
    pub apn: String,
    pub plan_id: i64,
    pub status: SimStatus,
    pub city: String,
    /// Plan snapshot joined in by the collaborator. Read-only reference data.
    pub plan: Option<IotPlan>,
    pub device_profile: Option<DeviceProfile>,
}

/// Tariff plan reference data. Immutable to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IotPlan {
    pub plan_id: i64,
    pub plan_name: String,
    pub monthly_quota_mb: i64,
    pub monthly_price: f64,
    pub overage_per_mb: f64,
    pub apn: String,
}

/// Expected usage envelope for a device type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device_type: String,
    pub expected_daily_mb_min: i64,
    pub expected_daily_mb_max: i64,
    pub roaming_expected: bool,
}

/// One dated usage sample for a device. The usage history is append-only
/// from the collaborator's perspective; the core only derives from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSample {
    pub timestamp: DateTime<Utc>,
    pub mb_used: f64,
    pub roaming_mb: f64,
    pub sms_count: Option<u32>,
}

/// A purchasable data add-on pack, considered in cost what-if scenarios.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOnPack {
    pub addon_id: i64,
    pub name: String,
    pub extra_mb: i64,
    pub price: f64,
    pub apn: String,
}

/// Administrative actions that can be applied to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "freeze_24h")]
    Freeze24h,
    #[serde(rename = "throttle")]
    Throttle,
    #[serde(rename = "block_sim")]
    BlockSim,
    #[serde(rename = "notify_user")]
    NotifyUser,
    #[serde(rename = "activate")]
    Activate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Freeze24h => "freeze_24h",
            ActionType::Throttle => "throttle",
            ActionType::BlockSim => "block_sim",
            ActionType::NotifyUser => "notify_user",
            ActionType::Activate => "activate",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded for an apply attempt in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Done,
    Failed,
}

/// An action currently tracked for a device. `end_time == start_time` for
/// instantaneous actions, which are therefore never "active".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAction {
    pub action: ActionType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: String,
    pub actor: String,
}

impl ActiveAction {
    /// True while the action still blocks other time-boxed actions.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.end_time
    }
}

/// Immutable audit record of a single apply attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub action_id: Uuid,
    pub sim_id: i64,
    pub action: ActionType,
    pub reason: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    pub status: ActionOutcome,
}

/// Fleet-wide aggregate counts derived from the cached device set and the
/// advisory risk cache.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetStats {
    pub total: usize,
    pub active_count: usize,
    pub high_risk_count: usize,
    pub anomaly_count: u32,
}
