//! Lead claim store: leased, mutually exclusive ownership of campaign-leads.
//!
//! A claim is the only path from `pending`/`scheduled` to `in_progress`, and
//! exclusivity is keyed by lead, not by campaign-lead, so two campaigns can
//! never dial the same person concurrently. Claims carry a TTL; an expired
//! claim stays active until the housekeeper resolves it through the normal
//! release path, so recovery can never race a live worker for the same unit.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use redial_model::{
    CampaignId, CampaignLead, CampaignLeadId, CampaignLeadStatus, LeadId,
};

use crate::error::{DialerError, Result};

/// Proof of ownership handed to whoever claimed a unit. Release and
/// expiry recovery both validate the `claim_id`, so a stale token from an
/// earlier lease can never disturb a newer claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimToken {
    pub claim_id: Uuid,
    pub campaign_lead_id: CampaignLeadId,
    pub campaign_id: CampaignId,
    pub lead_id: LeadId,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a claim attempt. Losing a race is not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(ClaimToken),
    /// The lead is already held, by this unit or by a sibling unit in
    /// another campaign.
    AlreadyClaimed,
    /// The unit is terminal, mid-flight, or not yet due.
    NotEligible,
}

/// How a held claim resolves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseDisposition {
    /// Attempt failed but retries remain; unit returns to `pending`.
    Requeue { next_attempt: DateTime<Utc> },
    /// Conversation reached a final outcome.
    Complete,
    /// Retries exhausted or the unit is otherwise done trying.
    Fail,
    /// Lead asked to be called back at `at`; unit parks as `scheduled`.
    Schedule { at: DateTime<Utc> },
}

/// Point-in-time counters for operator visibility.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ClaimStoreSnapshot {
    pub total_units: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub scheduled: usize,
    pub completed: usize,
    pub failed: usize,
    pub active_claims: usize,
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    async fn insert(&self, unit: CampaignLead) -> Result<()>;

    async fn get(&self, id: CampaignLeadId) -> Result<CampaignLead>;

    /// Units in `campaign_id` that are due at `now` and whose lead is not
    /// currently held.
    async fn claimable(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
    ) -> Result<Vec<CampaignLead>>;

    /// Atomically move an eligible unit to `in_progress` and lease it to
    /// `owner` for `ttl`.
    async fn claim(
        &self,
        id: CampaignLeadId,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome>;

    /// Resolve a held claim. Only the failure dispositions (`Requeue`,
    /// `Fail`) count against the attempt budget; completing or parking a
    /// unit does not. Fails with `Conflict` if the token no longer matches
    /// the active claim for its unit.
    async fn release(
        &self,
        token: &ClaimToken,
        disposition: ReleaseDisposition,
        now: DateTime<Utc>,
    ) -> Result<CampaignLead>;

    /// Terminal transition for a unit that is not claimed (the permanent
    /// compliance-denial path). Fails with `Conflict` from `in_progress`.
    async fn mark_terminal(
        &self,
        id: CampaignLeadId,
        status: CampaignLeadStatus,
        now: DateTime<Utc>,
    ) -> Result<CampaignLead>;

    /// Tokens whose lease expired at or before `now`. Read-only: the claims
    /// stay active until resolved through `release`.
    async fn scan_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClaimToken>>;

    /// The active token for a unit, if any.
    async fn active_token(
        &self,
        id: CampaignLeadId,
    ) -> Result<Option<ClaimToken>>;

    async fn snapshot(&self) -> Result<ClaimStoreSnapshot>;
}

#[derive(Default)]
struct ClaimState {
    units: HashMap<CampaignLeadId, CampaignLead>,
    /// Active claims keyed by lead, enforcing cross-campaign exclusivity.
    active: HashMap<LeadId, ClaimToken>,
}

/// Single-lock in-memory claim store. Every transition holds the one mutex,
/// which is what makes claim-and-flip atomic without a database.
#[derive(Default)]
pub struct InMemoryClaimStore {
    state: Mutex<ClaimState>,
}

impl fmt::Debug for InMemoryClaimStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryClaimStore").finish_non_exhaustive()
    }
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn insert(&self, unit: CampaignLead) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.units.contains_key(&unit.id) {
            return Err(DialerError::Conflict(format!(
                "campaign lead {} already exists",
                unit.id
            )));
        }
        state.units.insert(unit.id, unit);
        Ok(())
    }

    async fn get(&self, id: CampaignLeadId) -> Result<CampaignLead> {
        let state = self.state.lock().await;
        state.units.get(&id).cloned().ok_or_else(|| {
            DialerError::NotFound(format!("campaign lead {id}"))
        })
    }

    async fn claimable(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
    ) -> Result<Vec<CampaignLead>> {
        let state = self.state.lock().await;
        let mut due: Vec<CampaignLead> = state
            .units
            .values()
            .filter(|unit| {
                unit.campaign_id == campaign_id
                    && unit.is_claimable(now)
                    && !state.active.contains_key(&unit.lead_id)
            })
            .cloned()
            .collect();
        due.sort_by_key(|unit| unit.id.to_uuid());
        Ok(due)
    }

    async fn claim(
        &self,
        id: CampaignLeadId,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let mut state = self.state.lock().await;
        let Some(unit) = state.units.get(&id) else {
            return Err(DialerError::NotFound(format!(
                "campaign lead {id}"
            )));
        };
        if state.active.contains_key(&unit.lead_id) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        if !unit.is_claimable(now) {
            return Ok(ClaimOutcome::NotEligible);
        }

        let token = ClaimToken {
            claim_id: Uuid::now_v7(),
            campaign_lead_id: unit.id,
            campaign_id: unit.campaign_id,
            lead_id: unit.lead_id,
            owner: owner.to_owned(),
            expires_at: now + ttl,
        };
        let lead_id = unit.lead_id;
        if let Some(unit) = state.units.get_mut(&id) {
            unit.status = CampaignLeadStatus::InProgress;
        }
        state.active.insert(lead_id, token.clone());
        Ok(ClaimOutcome::Claimed(token))
    }

    async fn release(
        &self,
        token: &ClaimToken,
        disposition: ReleaseDisposition,
        now: DateTime<Utc>,
    ) -> Result<CampaignLead> {
        let mut state = self.state.lock().await;
        match state.active.get(&token.lead_id) {
            Some(active) if active.claim_id == token.claim_id => {}
            _ => {
                return Err(DialerError::Conflict(format!(
                    "claim {} is no longer active for lead {}",
                    token.claim_id, token.lead_id
                )));
            }
        }
        state.active.remove(&token.lead_id);

        let unit = state
            .units
            .get_mut(&token.campaign_lead_id)
            .ok_or_else(|| {
                DialerError::NotFound(format!(
                    "campaign lead {}",
                    token.campaign_lead_id
                ))
            })?;

        unit.last_attempt = Some(now);
        match disposition {
            ReleaseDisposition::Requeue { next_attempt } => {
                unit.attempts = unit.attempts.saturating_add(1);
                unit.status = CampaignLeadStatus::Pending;
                unit.next_attempt = Some(next_attempt);
                unit.scheduled_time = None;
            }
            ReleaseDisposition::Complete => {
                unit.status = CampaignLeadStatus::Completed;
                unit.next_attempt = None;
                unit.scheduled_time = None;
            }
            ReleaseDisposition::Fail => {
                unit.attempts = unit.attempts.saturating_add(1);
                unit.status = CampaignLeadStatus::Failed;
                unit.next_attempt = None;
                unit.scheduled_time = None;
            }
            ReleaseDisposition::Schedule { at } => {
                unit.status = CampaignLeadStatus::Scheduled;
                unit.next_attempt = None;
                unit.scheduled_time = Some(at);
            }
        }
        Ok(unit.clone())
    }

    async fn mark_terminal(
        &self,
        id: CampaignLeadId,
        status: CampaignLeadStatus,
        now: DateTime<Utc>,
    ) -> Result<CampaignLead> {
        if !status.is_terminal() {
            return Err(DialerError::InvariantViolation(format!(
                "mark_terminal called with non-terminal status {status:?}"
            )));
        }
        let mut state = self.state.lock().await;
        let unit = state.units.get_mut(&id).ok_or_else(|| {
            DialerError::NotFound(format!("campaign lead {id}"))
        })?;
        match unit.status {
            CampaignLeadStatus::Pending
            | CampaignLeadStatus::Scheduled => {
                unit.status = status;
                unit.last_attempt = Some(now);
                unit.next_attempt = None;
                unit.scheduled_time = None;
                Ok(unit.clone())
            }
            other => Err(DialerError::Conflict(format!(
                "campaign lead {id} cannot go terminal from {other:?}"
            ))),
        }
    }

    async fn scan_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClaimToken>> {
        let state = self.state.lock().await;
        let mut expired: Vec<ClaimToken> = state
            .active
            .values()
            .filter(|token| token.expires_at <= now)
            .cloned()
            .collect();
        expired.sort_by_key(|token| token.expires_at);
        Ok(expired)
    }

    async fn active_token(
        &self,
        id: CampaignLeadId,
    ) -> Result<Option<ClaimToken>> {
        let state = self.state.lock().await;
        Ok(state
            .active
            .values()
            .find(|token| token.campaign_lead_id == id)
            .cloned())
    }

    async fn snapshot(&self) -> Result<ClaimStoreSnapshot> {
        let state = self.state.lock().await;
        let mut snapshot = ClaimStoreSnapshot {
            total_units: state.units.len(),
            active_claims: state.active.len(),
            ..Default::default()
        };
        for unit in state.units.values() {
            match unit.status {
                CampaignLeadStatus::Pending => snapshot.pending += 1,
                CampaignLeadStatus::InProgress => {
                    snapshot.in_progress += 1;
                }
                CampaignLeadStatus::Scheduled => snapshot.scheduled += 1,
                CampaignLeadStatus::Completed => snapshot.completed += 1,
                CampaignLeadStatus::Failed => snapshot.failed += 1,
            }
        }
        Ok(snapshot)
    }
}
