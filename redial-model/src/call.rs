use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign_lead::CampaignLead;
use crate::ids::{CallId, CampaignId, CampaignLeadId, LeadId};

/// Opaque handle returned by the external call-placement provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallHandle(pub String);

impl CallHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Initiated,
    InProgress,
    Completed,
    Failed,
    NoAnswer,
}

impl CallStatus {
    /// Statuses that end the attempt and trigger reconciliation.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::NoAnswer)
    }
}

/// Conversation outcome, set only when a call completes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum CallOutcome {
    Interested,
    NotInterested,
    Callback,
    Disconnected,
    Other,
}

/// One row per dispatch attempt, owned by a campaign-lead. Append-only:
/// a unit accumulates one row per retry and rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub campaign_lead_id: CampaignLeadId,
    pub campaign_id: CampaignId,
    pub lead_id: LeadId,
    pub provider_handle: Option<CallHandle>,
    pub status: CallStatus,
    pub outcome: Option<CallOutcome>,
    pub recording_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Call {
    /// Row created at claim time, before the provider has been invoked.
    pub fn initiated(unit: &CampaignLead, now: DateTime<Utc>) -> Self {
        Self {
            id: CallId::new(),
            campaign_lead_id: unit.id,
            campaign_id: unit.campaign_id,
            lead_id: unit.lead_id,
            provider_handle: None,
            status: CallStatus::Initiated,
            outcome: None,
            recording_url: None,
            started_at: now,
            ended_at: None,
        }
    }
}
