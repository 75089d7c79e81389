use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ActionPolicy;
use crate::models::{ActionLogEntry, ActionOutcome, ActionType, ActiveAction};

#[derive(Debug, Error, PartialEq)]
pub enum TryApplyError {
    #[error("An active {blocked_by} holds the device until {until}")]
    Blocked {
        blocked_by: ActionType,
        until: DateTime<Utc>,
    },
    #[error("A {pending} apply is still awaiting backend confirmation")]
    ApplyPending { pending: ActionType },
}

/// A provisional apply: accepted by conflict checking but not yet confirmed
/// by the backing service. Carries the state to restore on rollback.
#[derive(Debug, Clone)]
struct PendingApply {
    requested: ActiveAction,
    prior: Option<ActiveAction>,
}

#[derive(Debug, Default)]
struct DeviceActionState {
    current: Option<ActiveAction>,
    pending: Option<PendingApply>,
}

/// Authoritative in-memory mapping of device -> current active action.
///
/// Per-device lifecycle: NoAction -> Provisional -> Active -> (Expired |
/// Superseded) -> NoAction, with Provisional -> RolledBack restoring the
/// prior state. Transitions happen only through `try_apply` / `commit` /
/// `rollback` / `expire_due`; the `DashMap` shard lock keeps each device's
/// mutations single-writer.
#[derive(Debug)]
pub struct ActionRegistry {
    policy: ActionPolicy,
    devices: DashMap<i64, DeviceActionState>,
    audit_log: RwLock<Vec<ActionLogEntry>>,
}

impl ActionRegistry {
    pub fn new(policy: ActionPolicy) -> Self {
        Self {
            policy,
            devices: DashMap::new(),
            audit_log: RwLock::new(Vec::new()),
        }
    }

    /// Conflict-checks `action` for a device and, if accepted, stores it as
    /// a provisional apply with `start = now` and `end = now + duration`.
    ///
    /// Rejected while a time-boxed action is active and unexpired, unless
    /// the request is `notify_user` (which never conflicts). Also rejected
    /// while a prior apply for the same device awaits confirmation; only
    /// one in-flight apply per device.
    pub fn try_apply(
        &self,
        sim_id: i64,
        action: ActionType,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<ActiveAction, TryApplyError> {
        let mut state = self.devices.entry(sim_id).or_default();
        expire_lazily(&mut state, now);

        if let Some(pending) = &state.pending {
            warn!(
                sim_id = sim_id,
                requested = %action,
                pending = %pending.requested.action,
                "Rejecting apply: previous apply still pending."
            );
            return Err(TryApplyError::ApplyPending {
                pending: pending.requested.action,
            });
        }

        if action != ActionType::NotifyUser {
            if let Some(current) = &state.current {
                if current.is_active(now) {
                    warn!(
                        sim_id = sim_id,
                        requested = %action,
                        blocked_by = %current.action,
                        until = %current.end_time,
                        "Rejecting apply: device has an active time-boxed action."
                    );
                    return Err(TryApplyError::Blocked {
                        blocked_by: current.action,
                        until: current.end_time,
                    });
                }
            }
        }

        let requested = ActiveAction {
            action,
            start_time: now,
            end_time: now + self.policy.duration(action),
            reason: reason.to_string(),
            actor: actor.to_string(),
        };
        state.pending = Some(PendingApply {
            requested: requested.clone(),
            prior: state.current.clone(),
        });
        debug!(sim_id = sim_id, action = %action, "Provisional action stored.");
        Ok(requested)
    }

    /// Finalizes the provisional apply after the backend confirmed it and
    /// appends a success entry to the audit trail. Only time-boxed actions
    /// become the device's active action; instantaneous ones (including
    /// `notify_user`) leave the prior active action in place.
    pub fn commit(&self, sim_id: i64, now: DateTime<Utc>) -> Option<ActiveAction> {
        let mut state = self.devices.get_mut(&sim_id)?;
        let Some(pending) = state.pending.take() else {
            warn!(sim_id = sim_id, "Commit called with no pending apply.");
            return None;
        };

        let committed = pending.requested;
        if committed.end_time > committed.start_time {
            state.current = Some(committed.clone());
        } else {
            state.current = pending.prior;
        }
        info!(
            sim_id = sim_id,
            action = %committed.action,
            actor = %committed.actor,
            "Action committed."
        );
        self.append_log(sim_id, &committed, ActionOutcome::Done, now);
        Some(committed)
    }

    /// Discards the provisional apply after a backend failure, restoring
    /// whatever active action preceded it, and records the failed attempt.
    pub fn rollback(&self, sim_id: i64, now: DateTime<Utc>) -> Option<()> {
        let mut state = self.devices.get_mut(&sim_id)?;
        let Some(pending) = state.pending.take() else {
            warn!(sim_id = sim_id, "Rollback called with no pending apply.");
            return None;
        };

        state.current = pending.prior;
        info!(
            sim_id = sim_id,
            action = %pending.requested.action,
            "Provisional action rolled back."
        );
        self.append_log(sim_id, &pending.requested, ActionOutcome::Failed, now);
        Some(())
    }

    /// Removes every active action whose end time has passed. Returns the
    /// devices that transitioned to "no active action" so callers can
    /// refresh their eligible-action sets.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Vec<i64> {
        let mut expired = Vec::new();
        for mut entry in self.devices.iter_mut() {
            let due = entry
                .value()
                .current
                .as_ref()
                .is_some_and(|a| a.end_time <= now);
            if due {
                entry.value_mut().current = None;
                expired.push(*entry.key());
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired due actions.");
        }
        expired
    }

    /// The device's active action, if any. Expires lazily at query time so
    /// callers between sweep ticks never observe a stale action.
    pub fn current_action(&self, sim_id: i64, now: DateTime<Utc>) -> Option<ActiveAction> {
        let mut state = self.devices.get_mut(&sim_id)?;
        expire_lazily(&mut state, now);
        state.current.clone()
    }

    /// True iff an active action exists and `now < end_time`.
    pub fn is_blocking(&self, sim_id: i64, now: DateTime<Utc>) -> bool {
        self.current_action(sim_id, now)
            .is_some_and(|a| a.is_active(now))
    }

    /// True while an apply for the device awaits backend confirmation.
    pub fn has_pending_apply(&self, sim_id: i64) -> bool {
        self.devices
            .get(&sim_id)
            .is_some_and(|s| s.pending.is_some())
    }

    /// Audit trail for one device, oldest first.
    pub fn history(&self, sim_id: i64) -> Vec<ActionLogEntry> {
        self.read_log()
            .iter()
            .filter(|e| e.sim_id == sim_id)
            .cloned()
            .collect()
    }

    /// The full append-only audit trail, oldest first.
    pub fn audit_log(&self) -> Vec<ActionLogEntry> {
        self.read_log().clone()
    }

    fn append_log(
        &self,
        sim_id: i64,
        action: &ActiveAction,
        status: ActionOutcome,
        now: DateTime<Utc>,
    ) {
        let entry = ActionLogEntry {
            action_id: Uuid::new_v4(),
            sim_id,
            action: action.action,
            reason: action.reason.clone(),
            actor: action.actor.clone(),
            created_at: now,
            status,
        };
        self.audit_log
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    fn read_log(&self) -> std::sync::RwLockReadGuard<'_, Vec<ActionLogEntry>> {
        self.audit_log.read().unwrap_or_else(|e| e.into_inner())
    }
}

fn expire_lazily(state: &mut DeviceActionState, now: DateTime<Utc>) {
    if state
        .current
        .as_ref()
        .is_some_and(|a| a.end_time <= now)
    {
        state.current = None;
    }
}
