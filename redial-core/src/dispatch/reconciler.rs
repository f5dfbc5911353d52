//! Outcome reconciler: the single writer for post-attempt state.
//!
//! Provider completions, placement failures, expired leases and permanent
//! compliance denials all funnel through here, so every path that moves a
//! unit out of `in_progress` applies the same retry policy and leaves the
//! same audit trail. Duplicate or unknown events are logged and dropped;
//! reconciliation never resurrects terminal state.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use redial_model::{
    AuditEntry, AuditKind, Call, CallStatus, Callback, CampaignLead,
    CampaignLeadId, CampaignLeadStatus,
};

use crate::dispatch::claims::{ClaimStore, ClaimToken, ReleaseDisposition};
use crate::dispatch::compliance::DenyReason;
use crate::dispatch::events::{DispatchEvent, DispatchEventPublisher};
use crate::dispatch::policy::{self, RetryDecision};
use crate::error::Result;
use crate::providers::CallStatusChanged;
use crate::store::{
    AuditLogRepository, CallRepository, CallbackRepository,
    CampaignRepository,
};

pub struct OutcomeReconciler {
    campaigns: Arc<dyn CampaignRepository>,
    calls: Arc<dyn CallRepository>,
    callbacks: Arc<dyn CallbackRepository>,
    audit: Arc<dyn AuditLogRepository>,
    claims: Arc<dyn ClaimStore>,
    events: Arc<dyn DispatchEventPublisher>,
    fallback_callback_delay: Duration,
}

impl fmt::Debug for OutcomeReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutcomeReconciler")
            .field(
                "fallback_callback_delay",
                &self.fallback_callback_delay,
            )
            .finish_non_exhaustive()
    }
}

impl OutcomeReconciler {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        calls: Arc<dyn CallRepository>,
        callbacks: Arc<dyn CallbackRepository>,
        audit: Arc<dyn AuditLogRepository>,
        claims: Arc<dyn ClaimStore>,
        events: Arc<dyn DispatchEventPublisher>,
        fallback_callback_delay: Duration,
    ) -> Self {
        Self {
            campaigns,
            calls,
            callbacks,
            audit,
            claims,
            events,
            fallback_callback_delay,
        }
    }

    /// Entry point for provider status notifications.
    pub async fn on_status_changed(
        &self,
        event: CallStatusChanged,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(call) =
            self.calls.find_open_by_handle(&event.handle).await?
        else {
            // Unknown handle or an attempt that already closed. A repeated
            // completion notice is expected provider behaviour; anything
            // else is worth flagging.
            self.alert(
                None,
                format!(
                    "status event for unknown or closed handle {}",
                    event.handle
                ),
            )
            .await?;
            return Ok(());
        };

        if !event.status.is_closed() {
            self.calls.set_status(call.id, event.status).await?;
            return Ok(());
        }

        let closed = self
            .calls
            .close(
                call.id,
                event.status,
                event.outcome,
                event.recording_url.clone(),
                now,
            )
            .await?;
        self.resolve(closed, event.requested_callback, now).await
    }

    /// The provider refused or failed the placement itself. The attempt is
    /// closed as failed and resolved under the normal retry policy.
    pub async fn on_placement_failed(
        &self,
        call_id: redial_model::CallId,
        token: &ClaimToken,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let closed = self
            .calls
            .close(call_id, CallStatus::Failed, None, None, now)
            .await?;
        debug!(
            target: "dial::reconcile",
            call_id = %call_id,
            campaign_lead_id = %token.campaign_lead_id,
            detail,
            "closing failed placement"
        );
        self.resolve(closed, None, now).await
    }

    /// Recover a unit whose claim lease expired without a completion. The
    /// open attempt (if any) is closed as failed and counts against the
    /// retry budget like an ordinary failure.
    pub async fn on_lease_expired(
        &self,
        token: &ClaimToken,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // The completion may have landed between the scan and this call.
        match self.claims.active_token(token.campaign_lead_id).await? {
            Some(active) if active.claim_id == token.claim_id => {}
            _ => return Ok(()),
        }

        info!(
            target: "dial::reconcile",
            campaign_lead_id = %token.campaign_lead_id,
            claim_id = %token.claim_id,
            owner = %token.owner,
            "recovering expired claim lease"
        );
        self.audit
            .append(
                AuditEntry::new(
                    AuditKind::LeaseRecovered,
                    format!(
                        "claim {} held by {} expired at {}",
                        token.claim_id, token.owner, token.expires_at
                    ),
                )
                .campaign(token.campaign_id)
                .lead(token.lead_id)
                .unit(token.campaign_lead_id),
            )
            .await?;
        self.events
            .publish(DispatchEvent::LeaseExpired {
                campaign_lead_id: token.campaign_lead_id,
                claim_id: token.claim_id,
            })
            .await?;

        let open = self
            .calls
            .find_open_for_unit(token.campaign_lead_id)
            .await?;
        let closed = match open {
            Some(call) => {
                self.calls
                    .close(call.id, CallStatus::Failed, None, None, now)
                    .await?
            }
            // Claim without a call row: the pass died between claim and
            // insert. Synthesize the failed attempt so the retry budget
            // still moves.
            None => {
                let unit =
                    self.claims.get(token.campaign_lead_id).await?;
                let mut call = Call::initiated(&unit, now);
                call.status = CallStatus::Failed;
                call.ended_at = Some(now);
                self.calls.insert(call.clone()).await?;
                call
            }
        };
        self.resolve(closed, None, now).await
    }

    /// Terminal path for a unit denied on permanent compliance grounds
    /// before any claim was taken.
    pub async fn on_permanent_denial(
        &self,
        unit_id: CampaignLeadId,
        reason: &DenyReason,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let unit = self
            .claims
            .mark_terminal(unit_id, CampaignLeadStatus::Failed, now)
            .await?;
        info!(
            target: "dial::reconcile",
            campaign_lead_id = %unit_id,
            %reason,
            "unit removed from dispatch"
        );
        self.publish_reconciled(None, &unit).await
    }

    /// Apply the retry policy to a closed attempt and release the claim
    /// accordingly.
    async fn resolve(
        &self,
        call: Call,
        requested_callback: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let unit = self.claims.get(call.campaign_lead_id).await?;
        let Some(token) =
            self.claims.active_token(call.campaign_lead_id).await?
        else {
            self.alert(
                Some(call.campaign_lead_id),
                format!(
                    "closed call {} has no active claim to resolve",
                    call.id
                ),
            )
            .await?;
            return Ok(());
        };

        let campaign = self.campaigns.get(call.campaign_id).await?;
        let decision = policy::next_state(
            &unit,
            &campaign,
            &call,
            requested_callback,
            self.fallback_callback_delay,
            now,
        );

        let disposition = match decision {
            RetryDecision::Requeue { next_attempt } => {
                ReleaseDisposition::Requeue { next_attempt }
            }
            RetryDecision::Terminal {
                status: CampaignLeadStatus::Completed,
            } => ReleaseDisposition::Complete,
            RetryDecision::Terminal { .. } => ReleaseDisposition::Fail,
            RetryDecision::ScheduleCallback { at } => {
                let callback = Callback::scheduled(
                    unit.id,
                    unit.lead_id,
                    call.id,
                    at,
                );
                self.callbacks.insert(callback.clone()).await?;
                self.events
                    .publish(DispatchEvent::CallbackScheduled {
                        callback_id: callback.id,
                        campaign_lead_id: unit.id,
                        scheduled_time: at,
                    })
                    .await?;
                ReleaseDisposition::Schedule { at }
            }
        };

        let updated =
            self.claims.release(&token, disposition, now).await?;
        self.audit
            .append(
                AuditEntry::new(
                    AuditKind::OutcomeRecorded,
                    format!(
                        "call {:?} outcome {:?}, unit now {:?}",
                        call.status, call.outcome, updated.status
                    ),
                )
                .campaign(call.campaign_id)
                .lead(call.lead_id)
                .unit(call.campaign_lead_id)
                .call(call.id),
            )
            .await?;
        self.publish_reconciled(Some(call.id), &updated).await
    }

    async fn publish_reconciled(
        &self,
        call_id: Option<redial_model::CallId>,
        unit: &CampaignLead,
    ) -> Result<()> {
        self.events
            .publish(DispatchEvent::OutcomeReconciled {
                call_id,
                campaign_lead_id: unit.id,
                new_status: unit.status,
                attempts: unit.attempts,
            })
            .await
    }

    async fn alert(
        &self,
        unit_id: Option<CampaignLeadId>,
        detail: String,
    ) -> Result<()> {
        warn!(target: "dial::reconcile", %detail, "invariant alert");
        let mut entry =
            AuditEntry::new(AuditKind::InvariantAlert, detail.clone());
        if let Some(id) = unit_id {
            entry = entry.unit(id);
        }
        self.audit.append(entry).await?;
        self.events
            .publish(DispatchEvent::InvariantAlert {
                campaign_lead_id: unit_id,
                detail,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    use redial_model::{
        CallHandle, CallOutcome, Campaign, CampaignStatus, LeadId,
    };

    use crate::dispatch::claims::{ClaimOutcome, InMemoryClaimStore};
    use crate::dispatch::events::InProcDispatchBus;
    use crate::store::MemoryStore;

    struct Harness {
        store: MemoryStore,
        claims: Arc<InMemoryClaimStore>,
        bus: Arc<InProcDispatchBus>,
        reconciler: OutcomeReconciler,
        campaign: Campaign,
    }

    async fn harness() -> Harness {
        let store = MemoryStore::new();
        let claims = Arc::new(InMemoryClaimStore::new());
        let bus = Arc::new(InProcDispatchBus::new(64));

        let mut campaign = Campaign::new(
            "renewals",
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
        )
        .unwrap();
        campaign.status = CampaignStatus::Active;
        campaign.retry_attempts = 2;
        campaign.retry_interval_minutes = 15;
        store.campaigns.insert(campaign.clone()).await.unwrap();

        let reconciler = OutcomeReconciler::new(
            store.campaigns.clone(),
            store.calls.clone(),
            store.callbacks.clone(),
            store.audit.clone(),
            claims.clone(),
            bus.clone(),
            Duration::hours(24),
        );
        Harness {
            store,
            claims,
            bus,
            reconciler,
            campaign,
        }
    }

    /// Insert a unit, claim it, and record an in-flight call with a handle.
    async fn in_flight(
        h: &Harness,
        now: DateTime<Utc>,
    ) -> (CampaignLead, ClaimToken, Call) {
        let unit = CampaignLead::new(h.campaign.id, LeadId::new());
        h.claims.insert(unit.clone()).await.unwrap();
        let ClaimOutcome::Claimed(token) = h
            .claims
            .claim(unit.id, "worker-0", Duration::seconds(300), now)
            .await
            .unwrap()
        else {
            panic!("claim failed");
        };

        let call = Call::initiated(&unit, now);
        h.store.calls.insert(call.clone()).await.unwrap();
        h.store
            .calls
            .set_handle(call.id, CallHandle(format!("h-{}", call.id)))
            .await
            .unwrap();
        (unit, token, call)
    }

    fn completion(
        call: &Call,
        status: CallStatus,
        outcome: Option<CallOutcome>,
        requested_callback: Option<DateTime<Utc>>,
    ) -> CallStatusChanged {
        CallStatusChanged {
            handle: CallHandle(format!("h-{}", call.id)),
            status,
            outcome,
            requested_callback,
            recording_url: None,
        }
    }

    #[tokio::test]
    async fn completed_call_closes_the_unit() {
        let h = harness().await;
        let now = Utc::now();
        let (unit, _token, call) = in_flight(&h, now).await;

        h.reconciler
            .on_status_changed(
                completion(
                    &call,
                    CallStatus::Completed,
                    Some(CallOutcome::Interested),
                    None,
                ),
                now,
            )
            .await
            .unwrap();

        let updated = h.claims.get(unit.id).await.unwrap();
        assert_eq!(updated.status, CampaignLeadStatus::Completed);
        assert_eq!(updated.attempts, 0);
        assert!(h.claims.active_token(unit.id).await.unwrap().is_none());

        let stored = h.store.calls.get(call.id).await.unwrap();
        assert_eq!(stored.status, CallStatus::Completed);
        assert_eq!(stored.outcome, Some(CallOutcome::Interested));
        assert!(stored.ended_at.is_some());
    }

    #[tokio::test]
    async fn no_answer_requeues_with_backoff() {
        let h = harness().await;
        let now = Utc::now();
        let (unit, _token, call) = in_flight(&h, now).await;

        h.reconciler
            .on_status_changed(
                completion(&call, CallStatus::NoAnswer, None, None),
                now,
            )
            .await
            .unwrap();

        let updated = h.claims.get(unit.id).await.unwrap();
        assert_eq!(updated.status, CampaignLeadStatus::Pending);
        assert_eq!(updated.attempts, 1);
        assert_eq!(
            updated.next_attempt,
            Some(now + Duration::minutes(15))
        );
    }

    #[tokio::test]
    async fn retries_exhaust_into_failed() {
        let h = harness().await;
        let now = Utc::now();
        let (unit, _token, call) = in_flight(&h, now).await;
        h.reconciler
            .on_status_changed(
                completion(&call, CallStatus::Failed, None, None),
                now,
            )
            .await
            .unwrap();

        // Second and final attempt (retry_attempts = 2).
        let later = now + Duration::minutes(20);
        let ClaimOutcome::Claimed(_token) = h
            .claims
            .claim(unit.id, "worker-1", Duration::seconds(300), later)
            .await
            .unwrap()
        else {
            panic!("reclaim failed");
        };
        let refreshed = h.claims.get(unit.id).await.unwrap();
        let second = Call::initiated(&refreshed, later);
        h.store.calls.insert(second.clone()).await.unwrap();
        h.store
            .calls
            .set_handle(
                second.id,
                CallHandle(format!("h-{}", second.id)),
            )
            .await
            .unwrap();

        h.reconciler
            .on_status_changed(
                completion(&second, CallStatus::Failed, None, None),
                later,
            )
            .await
            .unwrap();

        let updated = h.claims.get(unit.id).await.unwrap();
        assert_eq!(updated.status, CampaignLeadStatus::Failed);
        assert_eq!(updated.attempts, 2);
        assert!(!updated.is_claimable(later + Duration::days(1)));
    }

    #[tokio::test]
    async fn callback_outcome_parks_the_unit_until_the_requested_time() {
        let h = harness().await;
        let mut rx = h.bus.subscribe();
        let now = Utc::now();
        let (unit, _token, call) = in_flight(&h, now).await;

        let at = now + Duration::hours(2);
        h.reconciler
            .on_status_changed(
                completion(
                    &call,
                    CallStatus::Completed,
                    Some(CallOutcome::Callback),
                    Some(at),
                ),
                now,
            )
            .await
            .unwrap();

        let updated = h.claims.get(unit.id).await.unwrap();
        assert_eq!(updated.status, CampaignLeadStatus::Scheduled);
        assert_eq!(updated.scheduled_time, Some(at));
        assert!(!updated.is_claimable(now));
        assert!(updated.is_claimable(at));

        let callbacks =
            h.store.callbacks.list_for(unit.id).await.unwrap();
        assert_eq!(callbacks.len(), 1);
        assert_eq!(callbacks[0].scheduled_time, at);
        assert_eq!(callbacks[0].originating_call_id, call.id);

        let mut saw_callback_event = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(
                event,
                DispatchEvent::CallbackScheduled { scheduled_time, .. }
                    if scheduled_time == at
            ) {
                saw_callback_event = true;
            }
        }
        assert!(saw_callback_event);
    }

    #[tokio::test]
    async fn callback_does_not_consume_the_retry_budget() {
        let h = harness().await;
        let now = Utc::now();
        let (unit, _token, call) = in_flight(&h, now).await;

        let at = now + Duration::hours(2);
        h.reconciler
            .on_status_changed(
                completion(
                    &call,
                    CallStatus::Completed,
                    Some(CallOutcome::Callback),
                    Some(at),
                ),
                now,
            )
            .await
            .unwrap();
        assert_eq!(h.claims.get(unit.id).await.unwrap().attempts, 0);

        // The callback attempt itself can still fail twice
        // (retry_attempts = 2) before the unit goes terminal.
        let ClaimOutcome::Claimed(_token) = h
            .claims
            .claim(unit.id, "worker-1", Duration::seconds(300), at)
            .await
            .unwrap()
        else {
            panic!("reclaim failed");
        };
        let refreshed = h.claims.get(unit.id).await.unwrap();
        let second = Call::initiated(&refreshed, at);
        h.store.calls.insert(second.clone()).await.unwrap();
        h.store
            .calls
            .set_handle(
                second.id,
                CallHandle(format!("h-{}", second.id)),
            )
            .await
            .unwrap();
        h.reconciler
            .on_status_changed(
                completion(&second, CallStatus::NoAnswer, None, None),
                at,
            )
            .await
            .unwrap();

        let updated = h.claims.get(unit.id).await.unwrap();
        assert_eq!(updated.status, CampaignLeadStatus::Pending);
        assert_eq!(updated.attempts, 1);
    }

    #[tokio::test]
    async fn lease_expiry_counts_as_a_failed_attempt() {
        let h = harness().await;
        let now = Utc::now();
        let (unit, token, call) = in_flight(&h, now).await;

        let later = now + Duration::seconds(600);
        h.reconciler.on_lease_expired(&token, later).await.unwrap();

        let updated = h.claims.get(unit.id).await.unwrap();
        assert_eq!(updated.status, CampaignLeadStatus::Pending);
        assert_eq!(updated.attempts, 1);

        let stored = h.store.calls.get(call.id).await.unwrap();
        assert_eq!(stored.status, CallStatus::Failed);

        let entries = h.store.audit.entries().await.unwrap();
        assert!(
            entries
                .iter()
                .any(|e| e.kind == AuditKind::LeaseRecovered)
        );
    }

    #[tokio::test]
    async fn stale_lease_expiry_is_a_no_op_after_completion() {
        let h = harness().await;
        let now = Utc::now();
        let (unit, token, call) = in_flight(&h, now).await;

        h.reconciler
            .on_status_changed(
                completion(
                    &call,
                    CallStatus::Completed,
                    Some(CallOutcome::Interested),
                    None,
                ),
                now,
            )
            .await
            .unwrap();
        h.reconciler
            .on_lease_expired(&token, now + Duration::seconds(600))
            .await
            .unwrap();

        let updated = h.claims.get(unit.id).await.unwrap();
        assert_eq!(updated.status, CampaignLeadStatus::Completed);
        assert_eq!(updated.attempts, 0);
    }

    #[tokio::test]
    async fn duplicate_completion_events_are_dropped() {
        let h = harness().await;
        let now = Utc::now();
        let (unit, _token, call) = in_flight(&h, now).await;

        let event = completion(
            &call,
            CallStatus::Completed,
            Some(CallOutcome::Interested),
            None,
        );
        h.reconciler
            .on_status_changed(event.clone(), now)
            .await
            .unwrap();
        h.reconciler.on_status_changed(event, now).await.unwrap();

        let updated = h.claims.get(unit.id).await.unwrap();
        assert_eq!(updated.attempts, 0);
        let entries = h.store.audit.entries().await.unwrap();
        assert!(
            entries
                .iter()
                .any(|e| e.kind == AuditKind::InvariantAlert)
        );
    }

    #[tokio::test]
    async fn non_closed_status_only_updates_the_call() {
        let h = harness().await;
        let now = Utc::now();
        let (unit, _token, call) = in_flight(&h, now).await;

        h.reconciler
            .on_status_changed(
                completion(&call, CallStatus::InProgress, None, None),
                now,
            )
            .await
            .unwrap();

        let stored = h.store.calls.get(call.id).await.unwrap();
        assert_eq!(stored.status, CallStatus::InProgress);
        assert_eq!(
            h.claims.get(unit.id).await.unwrap().status,
            CampaignLeadStatus::InProgress
        );
    }

    #[tokio::test]
    async fn permanent_denial_fails_the_unit_without_a_call_row() {
        let h = harness().await;
        let now = Utc::now();
        let unit = CampaignLead::new(h.campaign.id, LeadId::new());
        h.claims.insert(unit.clone()).await.unwrap();

        h.reconciler
            .on_permanent_denial(
                unit.id,
                &DenyReason::DndRegistered,
                now,
            )
            .await
            .unwrap();

        let updated = h.claims.get(unit.id).await.unwrap();
        assert_eq!(updated.status, CampaignLeadStatus::Failed);
        assert_eq!(updated.attempts, 0);
        assert!(
            h.store
                .calls
                .history_for(unit.id)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
