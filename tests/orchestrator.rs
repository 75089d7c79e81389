use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use simfleet::analytics::models::RiskLevel;
use simfleet::config::FleetConfig;
use simfleet::events::FleetEvent;
use simfleet::models::{
    ActionLogEntry, ActionOutcome, ActionType, DeviceProfile, IotPlan, SimCard, SimStatus,
    UsageSample,
};
use simfleet::orchestrator::{ActionError, FleetFilter, FleetOrchestrator};
use simfleet::services::{
    ActionApplier, Clock, FleetProvider, ProviderError, UsageProvider,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 20, 12, 0, 0).unwrap()
}

struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

struct MockFleetProvider {
    devices: Mutex<Vec<SimCard>>,
    fail: AtomicBool,
}

impl MockFleetProvider {
    fn new(devices: Vec<SimCard>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
            fail: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl FleetProvider for MockFleetProvider {
    async fn get_fleet(&self) -> Result<Vec<SimCard>, ProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("connection refused".to_string()));
        }
        Ok(self.devices.lock().unwrap().clone())
    }
}

struct MockUsageProvider {
    samples: Mutex<Vec<UsageSample>>,
}

impl MockUsageProvider {
    fn new(samples: Vec<UsageSample>) -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(samples),
        })
    }
}

#[async_trait]
impl UsageProvider for MockUsageProvider {
    async fn get_usage(&self, _sim_id: i64, _days: u32) -> Result<Vec<UsageSample>, ProviderError> {
        Ok(self.samples.lock().unwrap().clone())
    }
}

struct MockActionApplier {
    fail: AtomicBool,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<tokio::sync::Notify>>>,
}

impl MockActionApplier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
        })
    }

    fn hold_until(&self) -> Arc<tokio::sync::Notify> {
        let notify = Arc::new(tokio::sync::Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }
}

#[async_trait]
impl ActionApplier for MockActionApplier {
    async fn apply_action(
        &self,
        sim_id: i64,
        action: ActionType,
        reason: &str,
        actor: &str,
    ) -> Result<ActionLogEntry, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                code: 500,
                message: "backend unavailable".to_string(),
            });
        }
        Ok(ActionLogEntry {
            action_id: Uuid::new_v4(),
            sim_id,
            action,
            reason: reason.to_string(),
            actor: actor.to_string(),
            created_at: Utc::now(),
            status: ActionOutcome::Done,
        })
    }
}

fn device(sim_id: i64, city: &str, status: SimStatus) -> SimCard {
    SimCard {
        sim_id,
        customer_id: 100 + sim_id,
        device_type: "asset-tracker".to_string(),
        apn: "iot.example".to_string(),
        plan_id: 1,
        status,
        city: city.to_string(),
        plan: Some(IotPlan {
            plan_id: 1,
            plan_name: "IoT Basic".to_string(),
            monthly_quota_mb: 1000,
            monthly_price: 25.0,
            overage_per_mb: 0.5,
            apn: "iot.example".to_string(),
        }),
        device_profile: Some(DeviceProfile {
            device_type: "asset-tracker".to_string(),
            expected_daily_mb_min: 10,
            expected_daily_mb_max: 50,
            roaming_expected: false,
        }),
    }
}

fn usage(values: &[f64]) -> Vec<UsageSample> {
    let start = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
    values
        .iter()
        .enumerate()
        .map(|(i, mb)| UsageSample {
            timestamp: start + Duration::days(i as i64),
            mb_used: *mb,
            roaming_mb: 0.0,
            sms_count: None,
        })
        .collect()
}

struct SequencedUsageProvider {
    responses: Vec<Vec<UsageSample>>,
    first_call_gate: tokio::sync::Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl UsageProvider for SequencedUsageProvider {
    async fn get_usage(&self, _sim_id: i64, _days: u32) -> Result<Vec<UsageSample>, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            self.first_call_gate.notified().await;
        }
        let idx = n.min(self.responses.len() - 1);
        Ok(self.responses[idx].clone())
    }
}

struct Harness {
    orchestrator: Arc<FleetOrchestrator>,
    fleet_provider: Arc<MockFleetProvider>,
    applier: Arc<MockActionApplier>,
    clock: Arc<ManualClock>,
}

fn harness(devices: Vec<SimCard>, samples: Vec<UsageSample>) -> Harness {
    init_tracing();
    let fleet_provider = MockFleetProvider::new(devices);
    let usage_provider = MockUsageProvider::new(samples);
    let applier = MockActionApplier::new();
    let clock = ManualClock::new(t0());
    let orchestrator = FleetOrchestrator::new(
        fleet_provider.clone(),
        usage_provider,
        applier.clone(),
        clock.clone(),
        FleetConfig::default(),
    );
    Harness {
        orchestrator,
        fleet_provider,
        applier,
        clock,
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn fetch_failure_keeps_cached_fleet() {
    let h = harness(
        vec![device(1, "Ankara", SimStatus::Active)],
        usage(&[30.0; 10]),
    );
    h.orchestrator.load_fleet().await.expect("first load");
    assert_eq!(h.orchestrator.devices().await.len(), 1);

    h.fleet_provider.fail.store(true, Ordering::SeqCst);
    let result = h.orchestrator.load_fleet().await;
    assert!(result.is_err());
    // Stale-but-available: the cache is untouched.
    assert_eq!(h.orchestrator.devices().await.len(), 1);
}

#[tokio::test]
async fn failed_block_reverts_status_and_registry() {
    let h = harness(
        vec![device(1, "Ankara", SimStatus::Active)],
        usage(&[30.0; 10]),
    );
    h.orchestrator.load_fleet().await.expect("load");

    h.applier.fail.store(true, Ordering::SeqCst);
    let result = h
        .orchestrator
        .perform_action(1, ActionType::BlockSim, "fraud suspicion", "ops")
        .await;
    assert!(matches!(result, Err(ActionError::ApplyFailed(_))));

    let after = h.orchestrator.device(1).await.expect("device");
    assert_eq!(after.status, SimStatus::Active);
    assert!(h
        .orchestrator
        .registry()
        .current_action(1, h.clock.now())
        .is_none());
    assert!(!h.orchestrator.registry().has_pending_apply(1));

    // The failed attempt is still on the audit trail.
    let history = h.orchestrator.action_history(1);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ActionOutcome::Failed);
}

#[tokio::test]
async fn successful_block_flips_status() {
    let h = harness(
        vec![device(1, "Ankara", SimStatus::Active)],
        usage(&[30.0; 10]),
    );
    h.orchestrator.load_fleet().await.expect("load");

    let ack = h
        .orchestrator
        .perform_action(1, ActionType::BlockSim, "fraud suspicion", "ops")
        .await
        .expect("applied");
    assert_eq!(ack.action, ActionType::BlockSim);

    let after = h.orchestrator.device(1).await.expect("device");
    assert_eq!(after.status, SimStatus::Blocked);

    // A blocked device can only be activated or notified.
    let eligible = h
        .orchestrator
        .eligible_actions(1, h.clock.now())
        .await
        .expect("eligible");
    assert_eq!(eligible, vec![ActionType::Activate, ActionType::NotifyUser]);
}

#[tokio::test]
async fn freeze_blocks_then_expires_via_sweep() {
    let h = harness(
        vec![device(1, "Ankara", SimStatus::Active)],
        usage(&[30.0; 10]),
    );
    h.orchestrator.load_fleet().await.expect("load");

    h.orchestrator
        .perform_action(1, ActionType::Freeze24h, "spike", "ops")
        .await
        .expect("frozen");
    // Freeze arms the blocking action without touching the visible status.
    assert_eq!(
        h.orchestrator.device(1).await.unwrap().status,
        SimStatus::Active
    );

    assert!(h
        .orchestrator
        .registry()
        .is_blocking(1, t0() + Duration::hours(23)));
    let eligible = h
        .orchestrator
        .eligible_actions(1, t0() + Duration::hours(23))
        .await
        .expect("eligible");
    assert_eq!(eligible, vec![ActionType::NotifyUser]);

    let sweeper = h.orchestrator.expiry_sweeper();
    h.clock.advance(Duration::hours(25));
    let expired = sweeper.run_sweep();
    assert_eq!(expired, vec![1]);
    assert!(!h.orchestrator.registry().is_blocking(1, h.clock.now()));

    let eligible = h
        .orchestrator
        .eligible_actions(1, h.clock.now())
        .await
        .expect("eligible");
    assert_eq!(eligible.len(), 4);
}

#[tokio::test]
async fn notify_is_allowed_while_frozen_and_keeps_the_freeze() {
    let h = harness(
        vec![device(1, "Ankara", SimStatus::Active)],
        usage(&[30.0; 10]),
    );
    h.orchestrator.load_fleet().await.expect("load");
    h.orchestrator
        .perform_action(1, ActionType::Freeze24h, "spike", "ops")
        .await
        .expect("frozen");

    h.orchestrator
        .perform_action(1, ActionType::NotifyUser, "heads up", "ops")
        .await
        .expect("notified");

    let current = h
        .orchestrator
        .registry()
        .current_action(1, h.clock.now())
        .expect("freeze kept");
    assert_eq!(current.action, ActionType::Freeze24h);
}

#[tokio::test]
async fn ineligible_action_is_rejected_before_any_network_call() {
    let h = harness(
        vec![device(1, "Ankara", SimStatus::Blocked)],
        usage(&[30.0; 10]),
    );
    h.orchestrator.load_fleet().await.expect("load");

    let result = h
        .orchestrator
        .perform_action(1, ActionType::Freeze24h, "spike", "ops")
        .await;
    assert!(matches!(
        result,
        Err(ActionError::InvalidTransition { sim_id: 1, .. })
    ));
    assert_eq!(h.applier.calls.load(Ordering::SeqCst), 0);
    // No mutation happened, so nothing was rolled back or logged.
    assert!(h.orchestrator.action_history(1).is_empty());
}

#[tokio::test]
async fn unknown_device_is_rejected() {
    let h = harness(vec![], usage(&[]));
    h.orchestrator.load_fleet().await.expect("load");
    let result = h
        .orchestrator
        .perform_action(42, ActionType::NotifyUser, "ping", "ops")
        .await;
    assert!(matches!(result, Err(ActionError::DeviceNotFound(42))));
}

#[tokio::test]
async fn filter_matches_city_case_insensitively_and_clears_stale_selection() {
    let h = harness(
        vec![
            device(1, "Ankara", SimStatus::Active),
            device(2, "Izmir", SimStatus::Active),
        ],
        usage(&[30.0; 10]),
    );
    h.orchestrator.load_fleet().await.expect("load");

    let matched = h
        .orchestrator
        .filter(&FleetFilter {
            search_text: "ankara".to_string(),
            ..FleetFilter::default()
        })
        .await;
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].sim_id, 1);

    // Selecting a device that a later filter excludes clears the selection.
    h.orchestrator.toggle_selection(2);
    assert_eq!(h.orchestrator.selected_sim_id(), Some(2));
    let _ = h
        .orchestrator
        .filter(&FleetFilter {
            search_text: "ankara".to_string(),
            ..FleetFilter::default()
        })
        .await;
    assert_eq!(h.orchestrator.selected_sim_id(), None);
}

#[tokio::test]
async fn filter_by_status_facet() {
    let h = harness(
        vec![
            device(1, "Ankara", SimStatus::Active),
            device(2, "Ankara", SimStatus::Blocked),
        ],
        usage(&[30.0; 10]),
    );
    h.orchestrator.load_fleet().await.expect("load");

    let matched = h
        .orchestrator
        .filter(&FleetFilter {
            status: Some(SimStatus::Blocked),
            ..FleetFilter::default()
        })
        .await;
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].sim_id, 2);
}

#[tokio::test]
async fn analytics_refresh_populates_the_risk_cache() {
    // 150 MB baseline then a 4x spike: high risk.
    let mut values = vec![150.0; 7];
    values.extend_from_slice(&[580.0, 620.0, 600.0]);
    let h = harness(vec![device(1, "Ankara", SimStatus::Active)], usage(&values));

    h.orchestrator.load_fleet().await.expect("load");
    let orchestrator = h.orchestrator.clone();
    wait_for(move || orchestrator.risk_assessment(1).is_some()).await;

    let assessment = h.orchestrator.risk_assessment(1).expect("cached");
    assert_eq!(assessment.risk_level, RiskLevel::High);
    assert!(assessment.anomaly_count >= 1);

    let stats = h.orchestrator.fleet_stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.high_risk_count, 1);
}

#[tokio::test]
async fn reload_does_not_clobber_status_while_apply_is_pending() {
    let h = harness(
        vec![device(1, "Ankara", SimStatus::Active)],
        usage(&[30.0; 10]),
    );
    h.orchestrator.load_fleet().await.expect("load");

    // Hold the backend apply open so the action stays provisional.
    let gate = h.applier.hold_until();
    let orchestrator = h.orchestrator.clone();
    let pending = tokio::spawn(async move {
        orchestrator
            .perform_action(1, ActionType::BlockSim, "fraud", "ops")
            .await
    });

    let registry = h.orchestrator.registry().clone();
    wait_for(move || registry.has_pending_apply(1)).await;
    assert_eq!(
        h.orchestrator.device(1).await.unwrap().status,
        SimStatus::Blocked
    );

    // A reload arrives with the stale backend status.
    h.orchestrator.load_fleet().await.expect("reload");
    assert_eq!(
        h.orchestrator.device(1).await.unwrap().status,
        SimStatus::Blocked,
        "optimistic status must survive the reload while the apply is outstanding"
    );

    gate.notify_one();
    pending.await.expect("join").expect("apply succeeded");
    assert_eq!(
        h.orchestrator.device(1).await.unwrap().status,
        SimStatus::Blocked
    );
}

#[tokio::test]
async fn rejected_request_reverts_before_anyone_can_observe_its_write() {
    let h = harness(
        vec![device(1, "Ankara", SimStatus::Active)],
        usage(&[30.0; 10]),
    );
    h.orchestrator.load_fleet().await.expect("load");
    let mut events = h.orchestrator.subscribe();

    // Hold a freeze apply open so a second request hits the pending guard.
    let gate = h.applier.hold_until();
    let orchestrator = h.orchestrator.clone();
    let winner = tokio::spawn(async move {
        orchestrator
            .perform_action(1, ActionType::Freeze24h, "spike", "ops")
            .await
    });
    let registry = h.orchestrator.registry().clone();
    wait_for(move || registry.has_pending_apply(1)).await;

    let result = h
        .orchestrator
        .perform_action(1, ActionType::BlockSim, "fraud", "ops")
        .await;
    assert!(matches!(result, Err(ActionError::Conflict(_))));
    assert_eq!(
        h.orchestrator.device(1).await.unwrap().status,
        SimStatus::Active
    );

    gate.notify_one();
    winner.await.expect("join").expect("freeze applied");

    // The rejected block's optimistic write was undone inside the same
    // critical section, so no status-change event ever escaped.
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, FleetEvent::DeviceStatusChanged { .. }),
            "rejected request leaked a status change: {event:?}"
        );
    }
}

#[tokio::test]
async fn concurrent_blocks_leave_one_winner_and_a_consistent_status() {
    let h = harness(
        vec![device(1, "Ankara", SimStatus::Active)],
        usage(&[30.0; 10]),
    );
    h.orchestrator.load_fleet().await.expect("load");

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .perform_action(1, ActionType::BlockSim, "fraud", "ops")
                .await
        })
    };
    let second = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .perform_action(1, ActionType::BlockSim, "fraud", "ops")
                .await
        })
    };

    let results = [
        first.await.expect("join"),
        second.await.expect("join"),
    ];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    // Whichever request lost, the surviving status matches the winner's
    // backend-confirmed block and exactly one apply reached the audit log.
    assert_eq!(
        h.orchestrator.device(1).await.unwrap().status,
        SimStatus::Blocked
    );
    let history = h.orchestrator.action_history(1);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ActionOutcome::Done);
}

#[tokio::test]
async fn stale_analytics_from_an_older_reload_are_discarded() {
    init_tracing();
    // First refresh (held open) would score high; the reload's refresh
    // scores low.
    let mut spike = vec![150.0; 7];
    spike.extend_from_slice(&[580.0, 620.0, 600.0]);
    let usage_provider = Arc::new(SequencedUsageProvider {
        responses: vec![usage(&spike), usage(&[30.0; 10])],
        first_call_gate: tokio::sync::Notify::new(),
        calls: AtomicUsize::new(0),
    });
    let fleet_provider = MockFleetProvider::new(vec![device(1, "Ankara", SimStatus::Active)]);
    let orchestrator = FleetOrchestrator::new(
        fleet_provider,
        usage_provider.clone(),
        MockActionApplier::new(),
        ManualClock::new(t0()),
        FleetConfig::default(),
    );

    orchestrator.load_fleet().await.expect("first load");
    let provider = usage_provider.clone();
    wait_for(move || provider.calls.load(Ordering::SeqCst) >= 1).await;

    orchestrator.load_fleet().await.expect("second load");
    let fresh = orchestrator.clone();
    wait_for(move || fresh.risk_assessment(1).is_some()).await;
    assert_eq!(
        orchestrator.risk_assessment(1).unwrap().risk_level,
        RiskLevel::Low
    );

    // Release the held refresh: its result belongs to the older reload
    // generation and must not overwrite the fresh assessment.
    usage_provider.first_call_gate.notify_one();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(
        orchestrator.risk_assessment(1).unwrap().risk_level,
        RiskLevel::Low
    );
}

#[tokio::test]
async fn available_cities_are_sorted_and_distinct() {
    let h = harness(
        vec![
            device(1, "Izmir", SimStatus::Active),
            device(2, "Ankara", SimStatus::Active),
            device(3, "Ankara", SimStatus::Active),
        ],
        usage(&[30.0; 10]),
    );
    h.orchestrator.load_fleet().await.expect("load");
    assert_eq!(
        h.orchestrator.available_cities().await,
        vec!["Ankara".to_string(), "Izmir".to_string()]
    );
}
