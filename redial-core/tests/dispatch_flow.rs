//! End-to-end dispatch flow over the in-memory store: gate, claim, place,
//! complete, reconcile.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use tokio::sync::{mpsc, Mutex};

use redial_core::dispatch::claims::ClaimStore;
use redial_core::store::{
    CallRepository, CallbackRepository, CampaignRepository,
    LeadRepository, ScriptRepository,
};
use redial_core::{
    CallPlacement, CallStatusChanged, CampaignDispatcher, ComplianceGate,
    DialerRuntime, DispatcherConfig, DndRegistry, InMemoryClaimStore,
    InProcDispatchBus, MemoryStore, OutcomeReconciler, ProviderError,
    RegistryError, ScriptValidator,
};
use redial_model::{
    Call, CallHandle, CallOutcome, CallScript, CallStatus, Campaign,
    CampaignLead, CampaignLeadStatus, CampaignStatus, LanguageCode, Lead,
    PhoneNumber,
};

struct ClearRegistry;

#[async_trait]
impl DndRegistry for ClearRegistry {
    async fn check(
        &self,
        _phone: &PhoneNumber,
    ) -> Result<bool, RegistryError> {
        Ok(false)
    }
}

/// Records placements and hands back deterministic handles; completion is
/// driven by the test, not the provider. With `refuse` set every placement
/// is rejected instead.
#[derive(Default)]
struct RecordingProvider {
    placed: Mutex<Vec<CallHandle>>,
    refuse: bool,
}

#[async_trait]
impl CallPlacement for RecordingProvider {
    async fn place_call(
        &self,
        phone: &PhoneNumber,
        _script: &CallScript,
    ) -> Result<CallHandle, ProviderError> {
        if self.refuse {
            return Err(ProviderError::ProviderUnavailable(
                "trunk down".into(),
            ));
        }
        let mut placed = self.placed.lock().await;
        let handle = CallHandle(format!("sim-{}-{}", phone, placed.len()));
        placed.push(handle.clone());
        Ok(handle)
    }
}

struct World {
    store: MemoryStore,
    claims: Arc<InMemoryClaimStore>,
    provider: Arc<RecordingProvider>,
    dispatcher: Arc<CampaignDispatcher>,
    reconciler: Arc<OutcomeReconciler>,
    campaign: Campaign,
    config: DispatcherConfig,
}

async fn world(call_limit_per_day: u32) -> World {
    world_with(call_limit_per_day, Arc::new(RecordingProvider::default()))
        .await
}

async fn world_with(
    call_limit_per_day: u32,
    provider: Arc<RecordingProvider>,
) -> World {
    let store = MemoryStore::new();
    let claims = Arc::new(InMemoryClaimStore::new());
    let bus = Arc::new(InProcDispatchBus::new(256));
    let config = DispatcherConfig::default();

    let mut campaign = Campaign::new(
        "flow test",
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
    )
    .unwrap();
    campaign.status = CampaignStatus::Active;
    campaign.call_limit_per_day = call_limit_per_day;
    campaign.retry_attempts = 3;
    campaign.retry_interval_minutes = 60;
    store.campaigns.insert(campaign.clone()).await.unwrap();
    store
        .scripts
        .insert(CallScript::new(
            campaign.id,
            LanguageCode::new("en"),
            "Hi, my name is Robin calling from Redial. \
             You can ask us to remove you from our list at any time.",
        ))
        .await
        .unwrap();

    let gate = Arc::new(ComplianceGate::new(
        store.leads.clone(),
        store.calls.clone(),
        store.scripts.clone(),
        Arc::new(ClearRegistry),
        store.audit.clone(),
        ScriptValidator::new(config.script.clone()),
        config.calling_hours.clone(),
        config.dnd,
    ));
    let reconciler = Arc::new(OutcomeReconciler::new(
        store.campaigns.clone(),
        store.calls.clone(),
        store.callbacks.clone(),
        store.audit.clone(),
        claims.clone(),
        bus.clone(),
        Duration::hours(config.default_callback_delay_hours),
    ));
    let dispatcher = Arc::new(CampaignDispatcher::new(
        store.campaigns.clone(),
        store.leads.clone(),
        store.calls.clone(),
        store.audit.clone(),
        claims.clone(),
        gate,
        provider.clone(),
        reconciler.clone(),
        bus,
        config.priority_order,
        config.lease,
    ));

    World {
        store,
        claims,
        provider,
        dispatcher,
        reconciler,
        campaign,
        config,
    }
}

async fn seed_unit(w: &World) -> CampaignLead {
    let lead = Lead::new(
        PhoneNumber::parse("+14155550100").unwrap(),
        LanguageCode::new("en"),
        0,
    );
    let unit = CampaignLead::new(w.campaign.id, lead.id);
    w.store.leads.insert(lead).await.unwrap();
    w.claims.insert(unit.clone()).await.unwrap();
    unit
}

fn tuesday_afternoon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap()
}

/// Placement runs on a spawned task; wait until the call carries a handle.
async fn placed_call(w: &World, unit: &CampaignLead) -> Call {
    for _ in 0..100 {
        if let Some(call) = w
            .store
            .calls
            .find_open_for_unit(unit.id)
            .await
            .unwrap()
            .filter(|c| c.provider_handle.is_some())
        {
            return call;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    panic!("placement never reached the provider");
}

#[tokio::test]
async fn dispatch_then_complete_closes_the_loop() {
    let w = world(100).await;
    let unit = seed_unit(&w).await;
    let now = tuesday_afternoon();

    let summary = w
        .dispatcher
        .run_pass(w.campaign.id, "worker-0", now)
        .await
        .unwrap();
    assert_eq!(summary.dispatched, 1);
    assert_eq!(
        w.claims.get(unit.id).await.unwrap().status,
        CampaignLeadStatus::InProgress
    );

    let call = placed_call(&w, &unit).await;
    assert_eq!(w.provider.placed.lock().await.len(), 1);

    w.reconciler
        .on_status_changed(
            CallStatusChanged {
                handle: call.provider_handle.clone().unwrap(),
                status: CallStatus::Completed,
                outcome: Some(CallOutcome::Interested),
                requested_callback: None,
                recording_url: Some("https://rec.example/1".into()),
            },
            now + Duration::minutes(2),
        )
        .await
        .unwrap();

    let updated = w.claims.get(unit.id).await.unwrap();
    assert_eq!(updated.status, CampaignLeadStatus::Completed);
    assert_eq!(updated.attempts, 0);

    let stored = w.store.calls.get(call.id).await.unwrap();
    assert_eq!(stored.status, CallStatus::Completed);
    assert_eq!(
        stored.recording_url.as_deref(),
        Some("https://rec.example/1")
    );

    // Further passes find nothing to do.
    let summary = w
        .dispatcher
        .run_pass(w.campaign.id, "worker-0", now + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(summary, Default::default());
}

#[tokio::test]
async fn daily_quota_caps_a_pass() {
    let w = world(3).await;
    for _ in 0..5 {
        seed_unit(&w).await;
    }
    let now = tuesday_afternoon();

    let summary = w
        .dispatcher
        .run_pass(w.campaign.id, "worker-0", now)
        .await
        .unwrap();
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.denied, 1);
    // The pass stops at the quota; the fifth unit is never examined.
    assert_eq!(summary.examined, 4);
    assert_eq!(
        w.store
            .calls
            .created_today(w.campaign.id, now)
            .await
            .unwrap(),
        3
    );

    // Same day: still capped. Next day: quota resets.
    let later = now + Duration::hours(2);
    let summary = w
        .dispatcher
        .run_pass(w.campaign.id, "worker-0", later)
        .await
        .unwrap();
    assert_eq!(summary.dispatched, 0);

    let tomorrow = now + Duration::days(1);
    let summary = w
        .dispatcher
        .run_pass(w.campaign.id, "worker-0", tomorrow)
        .await
        .unwrap();
    assert_eq!(summary.dispatched, 2);
}

#[tokio::test]
async fn callback_round_trip_redials_at_the_requested_time() {
    let w = world(100).await;
    let unit = seed_unit(&w).await;
    let now = tuesday_afternoon();

    w.dispatcher
        .run_pass(w.campaign.id, "worker-0", now)
        .await
        .unwrap();
    let call = placed_call(&w, &unit).await;

    let at = now + Duration::hours(2);
    w.reconciler
        .on_status_changed(
            CallStatusChanged {
                handle: call.provider_handle.clone().unwrap(),
                status: CallStatus::Completed,
                outcome: Some(CallOutcome::Callback),
                requested_callback: Some(at),
                recording_url: None,
            },
            now + Duration::minutes(1),
        )
        .await
        .unwrap();

    let parked = w.claims.get(unit.id).await.unwrap();
    assert_eq!(parked.status, CampaignLeadStatus::Scheduled);
    assert_eq!(parked.scheduled_time, Some(at));

    // Before the requested time nothing dispatches; at it, the unit goes
    // out again.
    let summary = w
        .dispatcher
        .run_pass(w.campaign.id, "worker-0", now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(summary.dispatched, 0);

    let summary = w
        .dispatcher
        .run_pass(w.campaign.id, "worker-0", at)
        .await
        .unwrap();
    assert_eq!(summary.dispatched, 1);
    assert_eq!(
        w.claims.get(unit.id).await.unwrap().status,
        CampaignLeadStatus::InProgress
    );
    assert_eq!(
        w.store.callbacks.list_for(unit.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn failed_placement_is_stamped_with_the_failure_clock() {
    let provider = Arc::new(RecordingProvider {
        refuse: true,
        ..Default::default()
    });
    let w = world_with(100, provider).await;
    let unit = seed_unit(&w).await;

    // A pass timestamp well in the past: reconciliation of the refused
    // placement must not inherit it.
    let pass_now = tuesday_afternoon();
    let before = Utc::now();
    let summary = w
        .dispatcher
        .run_pass(w.campaign.id, "worker-0", pass_now)
        .await
        .unwrap();
    assert_eq!(summary.dispatched, 1);

    let mut requeued = None;
    for _ in 0..100 {
        let current = w.claims.get(unit.id).await.unwrap();
        if current.status == CampaignLeadStatus::Pending
            && current.attempts == 1
        {
            requeued = Some(current);
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    let requeued =
        requeued.expect("refused placement was never reconciled");

    let history = w.store.calls.history_for(unit.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, CallStatus::Failed);
    assert!(history[0].ended_at.unwrap() >= before);
    assert!(
        requeued.next_attempt.unwrap()
            >= before + Duration::minutes(60)
    );
}

#[tokio::test]
async fn runtime_recovers_an_expired_lease() {
    let mut w = world(100).await;
    let unit = seed_unit(&w).await;
    let now = tuesday_afternoon();

    // Claim with an already-elapsed lease and let the housekeeper find it.
    let outcome = w
        .claims
        .claim(unit.id, "worker-gone", Duration::seconds(0), now)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        redial_core::ClaimOutcome::Claimed(_)
    ));

    w.config.lease.housekeeper_interval_ms = 10;
    w.config.workers.workers = 1;
    w.config.workers.tick_interval_ms = 3_600_000;
    let (_tx, rx) = mpsc::channel(8);
    let runtime = DialerRuntime::start(
        &w.config,
        w.store.campaigns.clone(),
        w.claims.clone(),
        w.dispatcher.clone(),
        w.reconciler.clone(),
        rx,
    );

    let mut recovered = false;
    for _ in 0..100 {
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        let current = w.claims.get(unit.id).await.unwrap();
        if current.status == CampaignLeadStatus::Pending
            && current.attempts == 1
        {
            recovered = true;
            break;
        }
    }
    runtime.shutdown().await;
    assert!(recovered, "housekeeper never recovered the lease");

    let snapshot = w.claims.snapshot().await.unwrap();
    assert_eq!(snapshot.active_claims, 0);
}
