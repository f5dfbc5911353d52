//! Dispatcher pass: order the due work, gate it, claim it, dial it.
//!
//! A pass is one campaign's slice of one worker tick. Placement itself is
//! fire-and-forget: the pass records the attempt and spawns the provider
//! call; completion arrives later through the reconciler.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use redial_model::{
    AuditEntry, AuditKind, Call, Campaign, CampaignId, CampaignLead,
};

use crate::dispatch::claims::{ClaimOutcome, ClaimStore, ClaimToken};
use crate::dispatch::compliance::{ComplianceGate, DenyReason, Verdict};
use crate::dispatch::config::{LeaseConfig, PriorityOrder};
use crate::dispatch::events::{DispatchEvent, DispatchEventPublisher};
use crate::dispatch::reconciler::OutcomeReconciler;
use crate::error::Result;
use crate::providers::CallPlacement;
use crate::store::{
    AuditLogRepository, CallRepository, CampaignRepository, LeadRepository,
};

/// Counters for one dispatch pass, logged per tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub examined: usize,
    pub dispatched: usize,
    pub denied: usize,
    pub skipped: usize,
}

pub struct CampaignDispatcher {
    campaigns: Arc<dyn CampaignRepository>,
    leads: Arc<dyn LeadRepository>,
    calls: Arc<dyn CallRepository>,
    audit: Arc<dyn AuditLogRepository>,
    claims: Arc<dyn ClaimStore>,
    gate: Arc<ComplianceGate>,
    provider: Arc<dyn CallPlacement>,
    reconciler: Arc<OutcomeReconciler>,
    events: Arc<dyn DispatchEventPublisher>,
    priority_order: PriorityOrder,
    lease: LeaseConfig,
}

impl fmt::Debug for CampaignDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CampaignDispatcher")
            .field("priority_order", &self.priority_order)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl CampaignDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        leads: Arc<dyn LeadRepository>,
        calls: Arc<dyn CallRepository>,
        audit: Arc<dyn AuditLogRepository>,
        claims: Arc<dyn ClaimStore>,
        gate: Arc<ComplianceGate>,
        provider: Arc<dyn CallPlacement>,
        reconciler: Arc<OutcomeReconciler>,
        events: Arc<dyn DispatchEventPublisher>,
        priority_order: PriorityOrder,
        lease: LeaseConfig,
    ) -> Self {
        Self {
            campaigns,
            leads,
            calls,
            audit,
            claims,
            gate,
            provider,
            reconciler,
            events,
            priority_order,
            lease,
        }
    }

    /// Run one dispatch pass for `campaign_id` as `owner`.
    pub async fn run_pass(
        &self,
        campaign_id: CampaignId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<PassSummary> {
        let campaign = self.campaigns.get(campaign_id).await?;
        let mut summary = PassSummary::default();
        if !campaign.is_dispatchable() {
            return Ok(summary);
        }

        let mut candidates =
            self.claims.claimable(campaign_id, now).await?;
        self.order(&mut candidates);

        for candidate in candidates {
            summary.examined += 1;
            match self
                .try_dispatch(&campaign, &candidate, owner, now)
                .await
            {
                Ok(Dispatched::Placed) => summary.dispatched += 1,
                Ok(Dispatched::Denied { quota_exhausted }) => {
                    summary.denied += 1;
                    // Nothing behind this candidate can pass either.
                    if quota_exhausted {
                        break;
                    }
                }
                Ok(Dispatched::LostRace) => summary.skipped += 1,
                Err(err) => {
                    // One broken candidate must not stall the pass.
                    warn!(
                        target: "dial::dispatch",
                        campaign_lead_id = %candidate.id,
                        error = %err,
                        "candidate dispatch errored"
                    );
                    summary.skipped += 1;
                }
            }
        }

        if summary != PassSummary::default() {
            debug!(
                target: "dial::dispatch",
                campaign_id = %campaign_id,
                owner,
                examined = summary.examined,
                dispatched = summary.dispatched,
                denied = summary.denied,
                skipped = summary.skipped,
                "dispatch pass finished"
            );
        }
        Ok(summary)
    }

    fn order(&self, candidates: &mut [CampaignLead]) {
        order_candidates(self.priority_order, candidates);
    }

    async fn try_dispatch(
        &self,
        campaign: &Campaign,
        candidate: &CampaignLead,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Dispatched> {
        let script =
            match self.gate.evaluate(campaign, candidate, now).await? {
                Verdict::Allow { script } => script,
                Verdict::Deny { reason } => {
                    let quota_exhausted =
                        reason == DenyReason::QuotaExhausted;
                    if reason.is_permanent() {
                        self.reconciler
                            .on_permanent_denial(
                                candidate.id,
                                &reason,
                                now,
                            )
                            .await?;
                    }
                    self.events
                        .publish(DispatchEvent::ComplianceDenied {
                            campaign_lead_id: candidate.id,
                            campaign_id: campaign.id,
                            lead_id: candidate.lead_id,
                            reason: reason.to_string(),
                            permanent: reason.is_permanent(),
                        })
                        .await?;
                    return Ok(Dispatched::Denied { quota_exhausted });
                }
            };

        let ttl = Duration::seconds(self.lease.claim_ttl_secs);
        let token =
            match self.claims.claim(candidate.id, owner, ttl, now).await? {
                ClaimOutcome::Claimed(token) => token,
                // Another worker got the lead between the gate and the
                // claim, or the unit stopped being due. Both are normal.
                ClaimOutcome::AlreadyClaimed
                | ClaimOutcome::NotEligible => {
                    return Ok(Dispatched::LostRace);
                }
            };
        self.events
            .publish(DispatchEvent::LeadClaimed {
                campaign_lead_id: token.campaign_lead_id,
                campaign_id: token.campaign_id,
                lead_id: token.lead_id,
                claim_id: token.claim_id,
            })
            .await?;

        let call = Call::initiated(candidate, now);
        self.calls.insert(call.clone()).await?;
        self.audit
            .append(
                AuditEntry::new(
                    AuditKind::CallDispatched,
                    format!("attempt {}", candidate.attempts + 1),
                )
                .campaign(campaign.id)
                .lead(candidate.lead_id)
                .unit(candidate.id)
                .call(call.id),
            )
            .await?;

        self.spawn_placement(call, token, script);
        Ok(Dispatched::Placed)
    }

    /// Hand the call to the provider off-pass. Placement failure is closed
    /// out through the reconciler like any other failed attempt, stamped
    /// with the clock at failure time rather than the start of the pass.
    fn spawn_placement(
        &self,
        call: Call,
        token: ClaimToken,
        script: redial_model::CallScript,
    ) {
        let leads = Arc::clone(&self.leads);
        let calls = Arc::clone(&self.calls);
        let provider = Arc::clone(&self.provider);
        let reconciler = Arc::clone(&self.reconciler);
        let events = Arc::clone(&self.events);

        tokio::spawn(async move {
            let placed = async {
                let lead = leads.get(token.lead_id).await?;
                match provider.place_call(&lead.phone, &script).await {
                    Ok(handle) => {
                        calls.set_handle(call.id, handle.clone()).await?;
                        events
                            .publish(DispatchEvent::CallPlaced {
                                call_id: call.id,
                                campaign_lead_id: token.campaign_lead_id,
                                handle: handle.clone(),
                            })
                            .await?;
                        info!(
                            target: "dial::dispatch",
                            call_id = %call.id,
                            handle = %handle.0,
                            "call placed"
                        );
                        Ok::<_, crate::error::DialerError>(None)
                    }
                    Err(err) => Ok(Some(err.to_string())),
                }
            }
            .await;

            let failure = match placed {
                Ok(None) => return,
                Ok(Some(provider_error)) => provider_error,
                Err(err) => err.to_string(),
            };

            warn!(
                target: "dial::dispatch",
                call_id = %call.id,
                error = %failure,
                "call placement failed"
            );
            let _ = events
                .publish(DispatchEvent::PlacementFailed {
                    call_id: call.id,
                    campaign_lead_id: token.campaign_lead_id,
                    error: failure.clone(),
                })
                .await;
            if let Err(err) = reconciler
                .on_placement_failed(call.id, &token, &failure, Utc::now())
                .await
            {
                warn!(
                    target: "dial::dispatch",
                    call_id = %call.id,
                    error = %err,
                    "failed to reconcile placement failure"
                );
            }
        });
    }
}

enum Dispatched {
    Placed,
    Denied { quota_exhausted: bool },
    LostRace,
}

/// Priority direction first, then earliest due time, then id as the
/// deterministic tie-break.
fn order_candidates(
    order: PriorityOrder,
    candidates: &mut [CampaignLead],
) {
    candidates.sort_by(|a, b| {
        order
            .compare(a.priority, b.priority)
            .then_with(|| a.eligible_at().cmp(&b.eligible_at()))
            .then_with(|| a.id.cmp(&b.id))
    });
}
