use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CampaignId, CampaignLeadId, LeadId};

/// Priority assigned to a campaign-lead pairing when none is specified.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Scheduling state of a campaign-lead pairing.
///
/// `InProgress` is entered only through a successful claim and exited only by
/// the outcome reconciler. `Completed` and `Failed` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CampaignLeadStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Scheduled,
}

impl CampaignLeadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The schedulable unit pairing one lead with one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignLead {
    pub id: CampaignLeadId,
    pub campaign_id: CampaignId,
    pub lead_id: LeadId,
    pub status: CampaignLeadStatus,
    pub priority: i32,
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    /// Earliest eligible dispatch time. `None` means immediately eligible.
    pub next_attempt: Option<DateTime<Utc>>,
    /// Explicit future dispatch time, set when a callback was requested.
    pub scheduled_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CampaignLead {
    pub fn new(campaign_id: CampaignId, lead_id: LeadId) -> Self {
        Self {
            id: CampaignLeadId::new(),
            campaign_id,
            lead_id,
            status: CampaignLeadStatus::Pending,
            priority: DEFAULT_PRIORITY,
            attempts: 0,
            last_attempt: None,
            next_attempt: None,
            scheduled_time: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether this unit may be claimed at `now`. Pending units wait for
    /// `next_attempt`; scheduled units wait for their `scheduled_time`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            CampaignLeadStatus::Pending => {
                self.next_attempt.is_none_or(|at| at <= now)
            }
            CampaignLeadStatus::Scheduled => {
                self.scheduled_time.is_some_and(|at| at <= now)
            }
            _ => false,
        }
    }

    /// Sort key used by the dispatcher: eligibility time, then id for a
    /// stable tie-break.
    pub fn eligible_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            CampaignLeadStatus::Scheduled => self.scheduled_time,
            _ => self.next_attempt,
        }
    }
}
