use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{ActionLogEntry, ActionType, SimCard, UsageSample};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Not authorized: {0}")]
    Unauthorized(String),
    #[error("Backend rejected the request (code {code}): {message}")]
    Rejected { code: i32, message: String },
}

/// Source of current time. Injectable so expiry behavior can be tested
/// deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used in production.
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fetches the device fleet from the backing service.
#[async_trait]
pub trait FleetProvider: Send + Sync {
    async fn get_fleet(&self) -> Result<Vec<SimCard>, ProviderError>;
}

/// Fetches dated usage samples for a single device.
#[async_trait]
pub trait UsageProvider: Send + Sync {
    /// Returns up to `days` daily samples, oldest first.
    async fn get_usage(&self, sim_id: i64, days: u32) -> Result<Vec<UsageSample>, ProviderError>;
}

/// Durably records an administrative action on the backing service.
///
/// The call must be idempotent-safe to retry; the core itself never
/// auto-retries, that is a policy decision left to the caller.
#[async_trait]
pub trait ActionApplier: Send + Sync {
    async fn apply_action(
        &self,
        sim_id: i64,
        action: ActionType,
        reason: &str,
        actor: &str,
    ) -> Result<ActionLogEntry, ProviderError>;
}
