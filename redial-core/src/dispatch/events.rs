use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

use redial_model::{
    CallHandle, CallId, CallbackId, CampaignId, CampaignLeadId,
    CampaignLeadStatus, LeadId,
};

use crate::error::Result;

/// State-change notifications emitted by the dispatcher loop and the outcome
/// reconciler. External collaborators (UI, audit trail consumers) subscribe
/// to these instead of intercepting control flow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DispatchEvent {
    LeadClaimed {
        campaign_lead_id: CampaignLeadId,
        campaign_id: CampaignId,
        lead_id: LeadId,
        claim_id: Uuid,
    },
    CallPlaced {
        call_id: CallId,
        campaign_lead_id: CampaignLeadId,
        handle: CallHandle,
    },
    PlacementFailed {
        call_id: CallId,
        campaign_lead_id: CampaignLeadId,
        error: String,
    },
    ComplianceDenied {
        campaign_lead_id: CampaignLeadId,
        campaign_id: CampaignId,
        lead_id: LeadId,
        reason: String,
        permanent: bool,
    },
    OutcomeReconciled {
        call_id: Option<CallId>,
        campaign_lead_id: CampaignLeadId,
        new_status: CampaignLeadStatus,
        attempts: u32,
    },
    CallbackScheduled {
        callback_id: CallbackId,
        campaign_lead_id: CampaignLeadId,
        scheduled_time: DateTime<Utc>,
    },
    LeaseExpired {
        campaign_lead_id: CampaignLeadId,
        claim_id: Uuid,
    },
    InvariantAlert {
        campaign_lead_id: Option<CampaignLeadId>,
        detail: String,
    },
}

#[async_trait]
pub trait DispatchEventPublisher: Send + Sync {
    async fn publish(&self, event: DispatchEvent) -> Result<()>;
}

/// Lightweight in-process event bus that fans out dispatcher notifications
/// to observers inside the runtime. Keeps the wiring flexible until an
/// external message broker is plugged in.
pub struct InProcDispatchBus {
    sender: broadcast::Sender<DispatchEvent>,
    capacity: usize,
}

impl fmt::Debug for InProcDispatchBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcDispatchBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcDispatchBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl DispatchEventPublisher for InProcDispatchBus {
    async fn publish(&self, event: DispatchEvent) -> Result<()> {
        // Lagging or absent subscribers never block dispatch.
        let _ = self.sender.send(event);
        Ok(())
    }
}
