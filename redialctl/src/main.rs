//! Simulation harness for the Redial dispatcher.
//!
//! Seeds an in-memory deployment (campaigns, leads, scripts), wires the
//! dispatcher against a simulated telephony provider and DND registry, runs
//! the dialer runtime for a while and prints what happened. Useful for
//! eyeballing dispatch behaviour without any external infrastructure.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveTime, Utc};
use clap::Parser;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use redial_core::store::{
    AuditLogRepository, CampaignRepository, LeadRepository,
    ScriptRepository,
};
use redial_core::{
    CallPlacement, CallStatusChanged, CampaignDispatcher, ClaimStore,
    ComplianceGate, DialerRuntime, DispatcherConfig, DndRegistry,
    InMemoryClaimStore, InProcDispatchBus, MemoryStore,
    OutcomeReconciler, ProviderError, RegistryError, ScriptValidator,
};
use redial_model::{
    CallHandle, CallOutcome, CallScript, CallStatus, Campaign,
    CampaignLead, CampaignStatus, LanguageCode, Lead, PhoneNumber,
};

#[derive(Parser, Debug)]
#[command(
    name = "redialctl",
    about = "Run the Redial dispatcher against simulated telephony"
)]
struct Args {
    /// Number of campaigns to seed.
    #[arg(long, default_value_t = 2)]
    campaigns: usize,

    /// Number of leads to seed per campaign.
    #[arg(long, default_value_t = 20)]
    leads: usize,

    /// Daily call quota per campaign.
    #[arg(long, default_value_t = 100)]
    call_limit: u32,

    /// Dispatcher workers.
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Worker tick interval in milliseconds.
    #[arg(long, default_value_t = 250)]
    tick_ms: u64,

    /// How long to run the simulation, in seconds.
    #[arg(long, default_value_t = 10)]
    run_secs: u64,

    /// Seed every Nth lead as DND-registered in the simulated registry.
    /// 0 disables DND seeding.
    #[arg(long, default_value_t = 10)]
    dnd_every: usize,
}

/// Simulated telephony: placement always succeeds and a completion arrives
/// a moment later with a randomly drawn outcome.
struct SimulatedProvider {
    completions: mpsc::Sender<CallStatusChanged>,
}

#[async_trait]
impl CallPlacement for SimulatedProvider {
    async fn place_call(
        &self,
        phone: &PhoneNumber,
        _script: &CallScript,
    ) -> Result<CallHandle, ProviderError> {
        let handle = CallHandle(format!("sim-{phone}"));
        let (status, outcome, requested_callback, delay_ms) = {
            let mut rng = rand::rng();
            let delay_ms: u64 = rng.random_range(100..600);
            let roll: f64 = rng.random();
            if roll < 0.55 {
                let outcome = if rng.random_bool(0.5) {
                    CallOutcome::Interested
                } else {
                    CallOutcome::NotInterested
                };
                (CallStatus::Completed, Some(outcome), None, delay_ms)
            } else if roll < 0.75 {
                (CallStatus::NoAnswer, None, None, delay_ms)
            } else if roll < 0.9 {
                (CallStatus::Failed, None, None, delay_ms)
            } else {
                (
                    CallStatus::Completed,
                    Some(CallOutcome::Callback),
                    Some(Utc::now() + Duration::seconds(5)),
                    delay_ms,
                )
            }
        };

        let completions = self.completions.clone();
        let event = CallStatusChanged {
            handle: handle.clone(),
            status,
            outcome,
            requested_callback,
            recording_url: None,
        };
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(delay_ms)).await;
            let _ = completions.send(event).await;
        });
        Ok(handle)
    }
}

/// Simulated DND registry: membership is derived from the phone number so
/// repeated lookups stay consistent within a run.
struct SimulatedRegistry;

#[async_trait]
impl DndRegistry for SimulatedRegistry {
    async fn check(
        &self,
        phone: &PhoneNumber,
    ) -> Result<bool, RegistryError> {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        Ok(phone.as_str().ends_with('9'))
    }
}

async fn seed(
    store: &MemoryStore,
    claims: &InMemoryClaimStore,
    args: &Args,
) -> Result<Vec<Campaign>> {
    let mut campaigns = Vec::new();
    for c in 0..args.campaigns {
        // Wide-open window so the demo dials at any wall-clock hour.
        let mut campaign = Campaign::new(
            format!("simulated campaign {c}"),
            NaiveTime::from_hms_opt(0, 0, 0).expect("valid time"),
            NaiveTime::from_hms_opt(23, 59, 59).expect("valid time"),
        )?;
        campaign.status = CampaignStatus::Active;
        campaign.call_limit_per_day = args.call_limit;
        campaign.retry_attempts = 3;
        campaign.retry_interval_minutes = 1;
        store.campaigns.insert(campaign.clone()).await?;
        store
            .scripts
            .insert(CallScript::new(
                campaign.id,
                LanguageCode::new("en"),
                "Hello, my name is Sam calling from Redial on behalf of \
                 your provider. You can opt out of these calls at any \
                 time.",
            ))
            .await?;

        for l in 0..args.leads {
            // Leads whose number ends in 9 are DND-registered when
            // --dnd-every admits them.
            let last = if args.dnd_every > 0 && l % args.dnd_every == 0 {
                9
            } else {
                l % 9
            };
            let phone = PhoneNumber::parse(format!(
                "+1415555{c:02}{l:02}{last}"
            ))?;
            let lead = Lead::new(phone, LanguageCode::new("en"), 0);
            let priority = (l % 10) as i32;
            let unit = CampaignLead::new(campaign.id, lead.id)
                .with_priority(priority);
            store.leads.insert(lead).await?;
            claims.insert(unit).await?;
        }
        campaigns.push(campaign);
    }
    Ok(campaigns)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "info,dial::dispatch=info,dial::reconcile=info".into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = DispatcherConfig::default();
    config.workers.workers = args.workers;
    config.workers.tick_interval_ms = args.tick_ms;
    config.lease.housekeeper_interval_ms = 1_000;
    // Match the seeded campaigns' wide-open window.
    config.calling_hours.weekdays = [true; 7];
    config.calling_hours.window_start =
        NaiveTime::from_hms_opt(0, 0, 0).expect("valid time");
    config.calling_hours.window_end =
        NaiveTime::from_hms_opt(23, 59, 59).expect("valid time");

    let store = MemoryStore::new();
    let claims = Arc::new(InMemoryClaimStore::new());
    let bus = Arc::new(InProcDispatchBus::new(1024));
    let (completion_tx, completion_rx) =
        mpsc::channel(config.workers.completion_buffer);
    let provider = Arc::new(SimulatedProvider {
        completions: completion_tx,
    });

    let campaigns = seed(&store, &claims, &args).await?;
    info!(
        campaigns = campaigns.len(),
        leads_per_campaign = args.leads,
        "seeded simulated deployment"
    );

    let gate = Arc::new(ComplianceGate::new(
        store.leads.clone(),
        store.calls.clone(),
        store.scripts.clone(),
        Arc::new(SimulatedRegistry),
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
        provider,
        reconciler.clone(),
        bus.clone(),
        config.priority_order,
        config.lease,
    ));

    // Log bus traffic at debug so a -v run shows the full event flow.
    let mut events = bus.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!(target: "dial::events", ?event, "dispatch event");
        }
    });

    let runtime = DialerRuntime::start(
        &config,
        store.campaigns.clone(),
        claims.clone(),
        dispatcher,
        reconciler,
        completion_rx,
    );

    info!(run_secs = args.run_secs, "running simulation");
    tokio::time::sleep(StdDuration::from_secs(args.run_secs)).await;
    runtime.shutdown().await;
    event_logger.abort();

    let snapshot = claims.snapshot().await?;
    println!("\n== scheduling state ==");
    println!("total units : {}", snapshot.total_units);
    println!("pending     : {}", snapshot.pending);
    println!("in progress : {}", snapshot.in_progress);
    println!("scheduled   : {}", snapshot.scheduled);
    println!("completed   : {}", snapshot.completed);
    println!("failed      : {}", snapshot.failed);
    println!("held claims : {}", snapshot.active_claims);

    let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
    for entry in store.audit.entries().await? {
        *by_kind.entry(format!("{:?}", entry.kind)).or_default() += 1;
    }
    println!("\n== audit trail ==");
    for (kind, count) in by_kind {
        println!("{kind:<18} {count}");
    }
    Ok(())
}
