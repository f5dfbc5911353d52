use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{
    AuditEntryId, CallId, CampaignId, CampaignLeadId, LeadId,
};

/// Category of an audit record. Used by regulatory reporting to filter the
/// trail without parsing detail strings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    ComplianceDenied,
    DndLookup,
    CallDispatched,
    OutcomeRecorded,
    LeaseRecovered,
    InvariantAlert,
}

/// Append-only record of a compliance decision or dispatch action.
/// Entries are written once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub kind: AuditKind,
    pub occurred_at: DateTime<Utc>,
    pub campaign_id: Option<CampaignId>,
    pub lead_id: Option<LeadId>,
    pub campaign_lead_id: Option<CampaignLeadId>,
    pub call_id: Option<CallId>,
    pub detail: String,
}

impl AuditEntry {
    pub fn new(kind: AuditKind, detail: impl Into<String>) -> Self {
        Self {
            id: AuditEntryId::new(),
            kind,
            occurred_at: Utc::now(),
            campaign_id: None,
            lead_id: None,
            campaign_lead_id: None,
            call_id: None,
            detail: detail.into(),
        }
    }

    pub fn campaign(mut self, id: CampaignId) -> Self {
        self.campaign_id = Some(id);
        self
    }

    pub fn lead(mut self, id: LeadId) -> Self {
        self.lead_id = Some(id);
        self
    }

    pub fn unit(mut self, id: CampaignLeadId) -> Self {
        self.campaign_lead_id = Some(id);
        self
    }

    pub fn call(mut self, id: CallId) -> Self {
        self.call_id = Some(id);
        self
    }
}
