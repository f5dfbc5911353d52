use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::CampaignId;

/// Campaign lifecycle. Only `Active` campaigns are eligible for dispatch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

/// A configured outbound-calling initiative with its own window, limits and
/// retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub status: CampaignStatus,
    /// Start of the campaign's own calling window (lead-local wall clock).
    pub call_time_start: NaiveTime,
    /// End of the window, exclusive.
    pub call_time_end: NaiveTime,
    pub call_limit_per_day: u32,
    pub retry_attempts: u32,
    pub retry_interval_minutes: i64,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(
        name: impl Into<String>,
        call_time_start: NaiveTime,
        call_time_end: NaiveTime,
    ) -> Result<Self> {
        if call_time_start >= call_time_end {
            return Err(ModelError::InvalidCallingWindow(format!(
                "start {call_time_start} is not before end {call_time_end}"
            )));
        }
        Ok(Self {
            id: CampaignId::new(),
            name: name.into(),
            status: CampaignStatus::Draft,
            call_time_start,
            call_time_end,
            call_limit_per_day: 100,
            retry_attempts: 3,
            retry_interval_minutes: 60,
            created_at: Utc::now(),
        })
    }

    pub fn is_dispatchable(&self) -> bool {
        self.status == CampaignStatus::Active
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::minutes(self.retry_interval_minutes)
    }
}
