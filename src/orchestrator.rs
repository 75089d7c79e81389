use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::actions::{ActionRegistry, ExpirySweeper, TryApplyError};
use crate::analytics::models::{RiskAssessment, RiskLevel, TimeSeriesData};
use crate::analytics::{build_time_series, compute_risk_assessment};
use crate::config::FleetConfig;
use crate::events::{FleetEvent, FleetEventBroadcaster};
use crate::models::{ActionLogEntry, ActionType, FleetStats, SimCard, SimStatus};
use crate::services::{ActionApplier, Clock, FleetProvider, ProviderError, UsageProvider};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Fleet fetch failed: {0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Device {0} is not in the current fleet")]
    DeviceNotFound(i64),
    #[error("Another action blocks this request: {0}")]
    Conflict(TryApplyError),
    #[error("Backend apply failed: {0}")]
    ApplyFailed(String),
    #[error("{action} is not eligible for device {sim_id} in its current state")]
    InvalidTransition { sim_id: i64, action: ActionType },
}

/// Confirmation that an action was durably recorded by the backend and
/// committed locally.
#[derive(Debug, Clone)]
pub struct ActionAck {
    pub sim_id: i64,
    pub action: ActionType,
    pub log_entry: ActionLogEntry,
}

/// Facets applied by [`FleetOrchestrator::filter`]. Search text matches
/// case-insensitively against id, device type, city and plan name.
#[derive(Debug, Clone, Default)]
pub struct FleetFilter {
    pub search_text: String,
    pub status: Option<SimStatus>,
    pub city: Option<String>,
    pub risk_level: Option<RiskLevel>,
}

#[derive(Debug, Default)]
struct FleetState {
    devices: Vec<SimCard>,
    /// Bumped on every successful reload; in-flight analytics refreshes
    /// from an older generation discard their result if their device left
    /// the fleet.
    generation: u64,
}

/// Composes the action registry and the analytics engine with the external
/// device/usage/apply collaborators. Owns the cached device set; device
/// status changes flow only through [`perform_action`].
///
/// [`perform_action`]: FleetOrchestrator::perform_action
pub struct FleetOrchestrator {
    fleet_provider: Arc<dyn FleetProvider>,
    usage_provider: Arc<dyn UsageProvider>,
    action_applier: Arc<dyn ActionApplier>,
    clock: Arc<dyn Clock>,
    config: FleetConfig,
    registry: Arc<ActionRegistry>,
    broadcaster: FleetEventBroadcaster,
    fleet: RwLock<FleetState>,
    risk_cache: DashMap<i64, RiskAssessment>,
    selected_sim_id: StdMutex<Option<i64>>,
}

impl FleetOrchestrator {
    pub fn new(
        fleet_provider: Arc<dyn FleetProvider>,
        usage_provider: Arc<dyn UsageProvider>,
        action_applier: Arc<dyn ActionApplier>,
        clock: Arc<dyn Clock>,
        config: FleetConfig,
    ) -> Arc<Self> {
        let registry = Arc::new(ActionRegistry::new(config.action_policy.clone()));
        Arc::new(Self {
            fleet_provider,
            usage_provider,
            action_applier,
            clock,
            config,
            registry,
            broadcaster: FleetEventBroadcaster::default(),
            fleet: RwLock::new(FleetState::default()),
            risk_cache: DashMap::new(),
            selected_sim_id: StdMutex::new(None),
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FleetEvent> {
        self.broadcaster.subscribe()
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Builds the background sweeper over this orchestrator's registry and
    /// event channel. Callers spawn it with
    /// `tokio::spawn(sweeper.start_periodic_sweep(period))`.
    pub fn expiry_sweeper(&self) -> Arc<ExpirySweeper> {
        Arc::new(ExpirySweeper::new(
            self.registry.clone(),
            self.clock.clone(),
            self.broadcaster.clone(),
        ))
    }

    /// Fetches the fleet and replaces the cached device set, then kicks off
    /// a fire-and-forget analytics refresh per device.
    ///
    /// A fetch failure leaves the previous cache fully intact. A successful
    /// refresh never clobbers the status of a device whose apply is still
    /// awaiting backend confirmation.
    pub async fn load_fleet(self: &Arc<Self>) -> Result<Vec<SimCard>, FetchError> {
        let fetched = match self.fleet_provider.get_fleet().await {
            Ok(devices) => devices,
            Err(e) => {
                error!(error = %e, "Fleet fetch failed; keeping cached state.");
                return Err(FetchError::Provider(e));
            }
        };

        let generation;
        {
            let mut state = self.fleet.write().await;
            let mut incoming = fetched;
            for device in incoming.iter_mut() {
                if self.registry.has_pending_apply(device.sim_id) {
                    if let Some(local) = state.devices.iter().find(|d| d.sim_id == device.sim_id) {
                        debug!(
                            sim_id = device.sim_id,
                            "Apply outstanding; keeping optimistic local status over fetched one."
                        );
                        device.status = local.status;
                    }
                }
            }
            state.devices = incoming;
            state.generation += 1;
            generation = state.generation;

            let current_ids: Vec<i64> = state.devices.iter().map(|d| d.sim_id).collect();
            self.risk_cache.retain(|sim_id, _| current_ids.contains(sim_id));

            info!(
                device_count = state.devices.len(),
                generation = generation,
                "Fleet reloaded."
            );
            self.broadcaster.send(FleetEvent::FleetReloaded {
                device_count: state.devices.len(),
            });
        }

        let devices = self.devices().await;
        for device in &devices {
            let orchestrator = self.clone();
            let sim_id = device.sim_id;
            tokio::spawn(async move {
                orchestrator.refresh_device_analytics(sim_id, generation).await;
            });
        }
        Ok(devices)
    }

    /// Pulls usage for one device and refreshes its cached risk assessment.
    /// Failures are logged, not surfaced; the prior cached assessment stays.
    async fn refresh_device_analytics(self: Arc<Self>, sim_id: i64, generation: u64) {
        let samples = match self
            .usage_provider
            .get_usage(sim_id, self.config.usage_window_days)
            .await
        {
            Ok(samples) => samples,
            Err(e) => {
                warn!(sim_id = sim_id, error = %e, "Usage fetch failed; keeping prior risk assessment.");
                return;
            }
        };

        let profile = {
            let state = self.fleet.read().await;
            let Some(device) = state.devices.iter().find(|d| d.sim_id == sim_id) else {
                debug!(
                    sim_id = sim_id,
                    generation = generation,
                    "Device left the fleet; discarding stale analytics result."
                );
                return;
            };
            match &device.device_profile {
                Some(profile) => profile.clone(),
                None => {
                    debug!(sim_id = sim_id, "No device profile; skipping risk computation.");
                    return;
                }
            }
        };

        let assessment = compute_risk_assessment(
            sim_id,
            &samples,
            &profile,
            self.clock.now(),
            &self.config.analytics,
        );

        // Re-check generation and membership: a reload while the usage
        // fetch was in flight has already spawned a fresher refresh, and
        // this result must not overwrite it.
        let (still_present, current_generation) = {
            let state = self.fleet.read().await;
            (
                state.devices.iter().any(|d| d.sim_id == sim_id),
                state.generation,
            )
        };
        if !still_present || current_generation != generation {
            debug!(
                sim_id = sim_id,
                generation = generation,
                "Fleet moved on; discarding stale analytics result."
            );
            return;
        }

        let risk_level = assessment.risk_level;
        self.risk_cache.insert(sim_id, assessment);
        self.broadcaster
            .send(FleetEvent::RiskUpdated { sim_id, risk_level });
    }

    /// Applies an administrative action to a device.
    ///
    /// Flow: eligibility check (no mutation on failure) -> optimistic local
    /// status update + registry conflict check -> external apply. On any
    /// failure after the optimistic update, both the status and the registry
    /// are rolled back before the error is surfaced, so the device is never
    /// left inconsistent with the last backend-confirmed state.
    pub async fn perform_action(
        &self,
        sim_id: i64,
        action: ActionType,
        reason: &str,
        actor: &str,
    ) -> Result<ActionAck, ActionError> {
        let now = self.clock.now();

        let eligible = self.eligible_actions(sim_id, now).await?;
        if !eligible.contains(&action) {
            warn!(sim_id = sim_id, action = %action, "Requested action is not eligible.");
            return Err(ActionError::InvalidTransition { sim_id, action });
        }

        // The optimistic update and the conflict check share one critical
        // section: a rejected request reverts its own write before any other
        // request can observe or build on it.
        {
            let mut state = self.fleet.write().await;
            let device = state
                .devices
                .iter_mut()
                .find(|d| d.sim_id == sim_id)
                .ok_or(ActionError::DeviceNotFound(sim_id))?;

            let previous = device.status;
            let new_status = optimistic_status(action);
            if let Some(status) = new_status {
                device.status = status;
            }
            if let Err(e) = self.registry.try_apply(sim_id, action, reason, actor, now) {
                device.status = previous;
                return Err(ActionError::Conflict(e));
            }
            if let Some(status) = new_status {
                debug!(sim_id = sim_id, status = ?status, "Optimistic status update.");
                self.broadcaster.send(FleetEvent::DeviceStatusChanged {
                    sim_id,
                    new_status: status,
                });
            }
        }

        match self
            .action_applier
            .apply_action(sim_id, action, reason, actor)
            .await
        {
            Ok(log_entry) => {
                self.registry.commit(sim_id, self.clock.now());
                info!(sim_id = sim_id, action = %action, actor = actor, "Action applied.");
                self.broadcaster
                    .send(FleetEvent::ActionCommitted { sim_id, action });
                Ok(ActionAck {
                    sim_id,
                    action,
                    log_entry,
                })
            }
            Err(e) => {
                error!(sim_id = sim_id, action = %action, error = %e, "Backend apply failed; rolling back.");
                self.revert_optimistic_status(sim_id, action).await;
                self.registry.rollback(sim_id, self.clock.now());
                Err(ActionError::ApplyFailed(e.to_string()))
            }
        }
    }

    /// Inverse of the optimistic table, applied after a backend failure:
    /// block reverts to active, activate reverts to blocked, others no-op.
    async fn revert_optimistic_status(&self, sim_id: i64, action: ActionType) {
        let revert = match action {
            ActionType::BlockSim => Some(SimStatus::Active),
            ActionType::Activate => Some(SimStatus::Blocked),
            ActionType::Freeze24h | ActionType::Throttle | ActionType::NotifyUser => None,
        };
        if let Some(status) = revert {
            self.restore_status(sim_id, status).await;
        }
    }

    async fn restore_status(&self, sim_id: i64, status: SimStatus) {
        let mut state = self.fleet.write().await;
        if let Some(device) = state.devices.iter_mut().find(|d| d.sim_id == sim_id) {
            if device.status != status {
                device.status = status;
                self.broadcaster.send(FleetEvent::DeviceStatusChanged {
                    sim_id,
                    new_status: status,
                });
            }
        }
    }

    /// Actions currently allowed for a device: a blocking action reduces
    /// the set to notify only; a blocked device can be activated or
    /// notified; anything else gets the full set.
    pub async fn eligible_actions(
        &self,
        sim_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActionType>, ActionError> {
        let status = {
            let state = self.fleet.read().await;
            state
                .devices
                .iter()
                .find(|d| d.sim_id == sim_id)
                .map(|d| d.status)
                .ok_or(ActionError::DeviceNotFound(sim_id))?
        };

        if self.registry.is_blocking(sim_id, now) {
            return Ok(vec![ActionType::NotifyUser]);
        }
        Ok(match status {
            SimStatus::Blocked => vec![ActionType::Activate, ActionType::NotifyUser],
            SimStatus::Active | SimStatus::Frozen => vec![
                ActionType::Freeze24h,
                ActionType::Throttle,
                ActionType::BlockSim,
                ActionType::NotifyUser,
            ],
        })
    }

    /// Pure filter over the cached device set and the advisory risk cache.
    /// Never mutates device state; its only side effect is clearing the
    /// selection when the selected device falls out of the result.
    pub async fn filter(&self, filter: &FleetFilter) -> Vec<SimCard> {
        let state = self.fleet.read().await;
        let needle = filter.search_text.trim().to_lowercase();

        let matched: Vec<SimCard> = state
            .devices
            .iter()
            .filter(|d| {
                if !needle.is_empty() {
                    let plan_name = d
                        .plan
                        .as_ref()
                        .map(|p| p.plan_name.to_lowercase())
                        .unwrap_or_default();
                    let hit = d.sim_id.to_string().contains(&needle)
                        || d.device_type.to_lowercase().contains(&needle)
                        || d.city.to_lowercase().contains(&needle)
                        || plan_name.contains(&needle);
                    if !hit {
                        return false;
                    }
                }
                if filter.status.is_some_and(|s| d.status != s) {
                    return false;
                }
                if filter
                    .city
                    .as_ref()
                    .is_some_and(|c| !d.city.eq_ignore_ascii_case(c))
                {
                    return false;
                }
                if let Some(level) = filter.risk_level {
                    return self
                        .risk_cache
                        .get(&d.sim_id)
                        .is_some_and(|r| r.risk_level == level);
                }
                true
            })
            .cloned()
            .collect();

        let mut selected = self
            .selected_sim_id
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(sim_id) = *selected {
            if !matched.iter().any(|d| d.sim_id == sim_id) {
                *selected = None;
                self.broadcaster.send(FleetEvent::SelectionCleared { sim_id });
            }
        }

        matched
    }

    /// Selects the device, or clears the selection when it is already
    /// selected.
    pub fn toggle_selection(&self, sim_id: i64) {
        let mut selected = self
            .selected_sim_id
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *selected = if *selected == Some(sim_id) {
            None
        } else {
            Some(sim_id)
        };
    }

    pub fn selected_sim_id(&self) -> Option<i64> {
        *self
            .selected_sim_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the cached device set.
    pub async fn devices(&self) -> Vec<SimCard> {
        self.fleet.read().await.devices.clone()
    }

    pub async fn device(&self, sim_id: i64) -> Option<SimCard> {
        self.fleet
            .read()
            .await
            .devices
            .iter()
            .find(|d| d.sim_id == sim_id)
            .cloned()
    }

    /// Last computed risk assessment for a device, if any. Advisory only.
    pub fn risk_assessment(&self, sim_id: i64) -> Option<RiskAssessment> {
        self.risk_cache.get(&sim_id).map(|r| r.clone())
    }

    /// Audit trail of apply attempts for one device.
    pub fn action_history(&self, sim_id: i64) -> Vec<ActionLogEntry> {
        self.registry.history(sim_id)
    }

    /// Fetches fresh usage for a device and builds its chartable series.
    pub async fn time_series(&self, sim_id: i64) -> Result<TimeSeriesData, FetchError> {
        let roaming_expected = {
            let state = self.fleet.read().await;
            state
                .devices
                .iter()
                .find(|d| d.sim_id == sim_id)
                .and_then(|d| d.device_profile.as_ref())
                .map(|p| p.roaming_expected)
                .unwrap_or(true)
        };
        let samples = self
            .usage_provider
            .get_usage(sim_id, self.config.usage_window_days)
            .await?;
        Ok(build_time_series(
            sim_id,
            &samples,
            roaming_expected,
            &self.config.analytics,
        ))
    }

    /// Aggregate counts over the cached devices and risk assessments.
    pub async fn fleet_stats(&self) -> FleetStats {
        let state = self.fleet.read().await;
        let total = state.devices.len();
        let active_count = state
            .devices
            .iter()
            .filter(|d| d.status == SimStatus::Active)
            .count();
        let high_risk_count = self
            .risk_cache
            .iter()
            .filter(|r| r.risk_level == RiskLevel::High)
            .count();
        let anomaly_count = self.risk_cache.iter().map(|r| r.anomaly_count).sum();

        FleetStats {
            total,
            active_count,
            high_risk_count,
            anomaly_count,
        }
    }

    /// Distinct cities across the fleet, sorted.
    pub async fn available_cities(&self) -> Vec<String> {
        let state = self.fleet.read().await;
        let mut cities: Vec<String> = state.devices.iter().map(|d| d.city.clone()).collect();
        cities.sort();
        cities.dedup();
        cities
    }
}

/// Optimistic status table: block -> blocked, activate -> active,
/// freeze/throttle/notify leave the status untouched (freeze only arms the
/// blocking action).
fn optimistic_status(action: ActionType) -> Option<SimStatus> {
    match action {
        ActionType::BlockSim => Some(SimStatus::Blocked),
        ActionType::Activate => Some(SimStatus::Active),
        ActionType::Freeze24h | ActionType::Throttle | ActionType::NotifyUser => None,
    }
}
