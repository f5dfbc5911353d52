use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CallId, CallbackId, CampaignLeadId, LeadId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Scheduled,
    Completed,
    Missed,
    Cancelled,
}

/// Derived scheduling artifact created when a call's outcome is `callback`.
/// Lives its own lifecycle, independent of the originating campaign-lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Callback {
    pub id: CallbackId,
    pub campaign_lead_id: CampaignLeadId,
    pub lead_id: LeadId,
    pub originating_call_id: CallId,
    pub scheduled_time: DateTime<Utc>,
    pub status: CallbackStatus,
    pub created_at: DateTime<Utc>,
}

impl Callback {
    pub fn scheduled(
        campaign_lead_id: CampaignLeadId,
        lead_id: LeadId,
        originating_call_id: CallId,
        scheduled_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CallbackId::new(),
            campaign_lead_id,
            lead_id,
            originating_call_id,
            scheduled_time,
            status: CallbackStatus::Scheduled,
            created_at: Utc::now(),
        }
    }
}
