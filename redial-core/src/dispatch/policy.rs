//! Retry/backoff policy: a pure function from attempt history to the next
//! scheduling state. No I/O, no clocks of its own, no error paths.

use chrono::{DateTime, Duration, Utc};

use redial_model::{
    Call, CallOutcome, CallStatus, Campaign, CampaignLead,
    CampaignLeadStatus,
};

/// What should happen to a campaign-lead after an attempt closes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again no earlier than `next_attempt`; status reverts to pending.
    Requeue { next_attempt: DateTime<Utc> },
    /// The unit is done. Terminal states are monotonic: the policy never
    /// resurrects a completed or failed unit.
    Terminal { status: CampaignLeadStatus },
    /// Create a callback at `at` and park the unit as `scheduled`; it
    /// resumes normal dispatch eligibility at that time.
    ScheduleCallback { at: DateTime<Utc> },
}

/// Compute the next scheduling state for `unit` after `call` closed.
///
/// `requested_callback` is the lead- or agent-specified follow-up time when
/// the outcome was `callback`; `fallback_callback_delay` fills in when the
/// completion event carried none.
pub fn next_state(
    unit: &CampaignLead,
    campaign: &Campaign,
    call: &Call,
    requested_callback: Option<DateTime<Utc>>,
    fallback_callback_delay: Duration,
    now: DateTime<Utc>,
) -> RetryDecision {
    // Exhaustion is irreversible; a terminal unit stays terminal no matter
    // what late events claim.
    if unit.status.is_terminal() {
        return RetryDecision::Terminal {
            status: unit.status,
        };
    }

    if call.outcome == Some(CallOutcome::Callback) {
        let at = requested_callback
            .unwrap_or_else(|| now + fallback_callback_delay);
        return RetryDecision::ScheduleCallback { at };
    }

    match call.status {
        CallStatus::Completed => RetryDecision::Terminal {
            status: CampaignLeadStatus::Completed,
        },
        // Initiated/InProgress only reach the policy through lease
        // recovery; they count as a failed attempt like the rest.
        CallStatus::Failed
        | CallStatus::NoAnswer
        | CallStatus::Initiated
        | CallStatus::InProgress => {
            let attempts = unit.attempts.saturating_add(1);
            if attempts >= campaign.retry_attempts {
                RetryDecision::Terminal {
                    status: CampaignLeadStatus::Failed,
                }
            } else {
                RetryDecision::Requeue {
                    next_attempt: now + campaign.retry_interval(),
                }
            }
        }
    }
}
