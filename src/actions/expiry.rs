use std::sync::Arc;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{debug, info};

use crate::actions::registry::ActionRegistry;
use crate::events::{FleetEvent, FleetEventBroadcaster};
use crate::services::Clock;

/// Periodic expiry sweep over the action registry.
///
/// One scheduler tick covers the whole fleet; there is no per-device timer.
/// Query-time lazy expiry in the registry covers the gap between ticks, so
/// the sweep's job is only to notify listeners that eligible-action sets
/// changed.
pub struct ExpirySweeper {
    registry: Arc<ActionRegistry>,
    clock: Arc<dyn Clock>,
    broadcaster: FleetEventBroadcaster,
}

impl ExpirySweeper {
    pub fn new(
        registry: Arc<ActionRegistry>,
        clock: Arc<dyn Clock>,
        broadcaster: FleetEventBroadcaster,
    ) -> Self {
        Self {
            registry,
            clock,
            broadcaster,
        }
    }

    pub async fn start_periodic_sweep(self: Arc<Self>, period_seconds: u64) {
        info!(
            interval_seconds = period_seconds,
            "Action expiry sweeper started."
        );
        let mut interval = interval(TokioDuration::from_secs(period_seconds));
        loop {
            interval.tick().await;
            debug!("Running action expiry sweep...");
            self.run_sweep();
        }
    }

    /// One sweep cycle. Split out so tests and callers holding a manual
    /// clock can drive it directly.
    pub fn run_sweep(&self) -> Vec<i64> {
        let now = self.clock.now();
        let expired = self.registry.expire_due(now);
        for sim_id in &expired {
            info!(sim_id = sim_id, "Active action expired.");
            self.broadcaster.send(FleetEvent::ActionExpired { sim_id: *sim_id });
        }
        expired
    }
}
