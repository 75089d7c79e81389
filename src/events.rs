use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::analytics::models::RiskLevel;
use crate::models::{ActionType, SimStatus};

/// State-change notifications emitted by the core, decoupled from any
/// rendering concern. Subscribers (a websocket layer, a TUI, tests) decide
/// what to do with them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum FleetEvent {
    FleetReloaded {
        device_count: usize,
    },
    DeviceStatusChanged {
        sim_id: i64,
        new_status: SimStatus,
    },
    ActionCommitted {
        sim_id: i64,
        action: ActionType,
    },
    ActionExpired {
        sim_id: i64,
    },
    RiskUpdated {
        sim_id: i64,
        risk_level: RiskLevel,
    },
    SelectionCleared {
        sim_id: i64,
    },
}

#[derive(Debug, Clone)]
pub struct FleetEventBroadcaster {
    events_tx: broadcast::Sender<FleetEvent>,
}

impl FleetEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(capacity);
        Self { events_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.events_tx.subscribe()
    }

    pub fn send(&self, event: FleetEvent) {
        let receiver_count = self.events_tx.receiver_count();
        if receiver_count == 0 {
            debug!(event = ?event, "No active receivers, skipping broadcast.");
            return;
        }
        // A send error here only means every receiver dropped between the
        // count check and the send; nothing to recover.
        if self.events_tx.send(event).is_err() {
            debug!("All event receivers dropped before send.");
        }
    }
}

impl Default for FleetEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
