//! Repository ports for the entities the dispatcher reads and writes.
//!
//! The core is written against these traits; `memory` provides the in-process
//! arena implementation used by the runtime and the tests. Call, callback and
//! audit rows are append-only, so their repositories expose no mutation
//! beyond creation and call closure.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use redial_model::{
    AuditEntry, Call, CallHandle, CallId, CallOutcome, CallScript,
    CallStatus, Callback, Campaign, CampaignId, CampaignLeadId,
    CampaignStatus, LanguageCode, Lead, LeadId,
};

use crate::error::Result;

pub use memory::MemoryStore;

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn insert(&self, lead: Lead) -> Result<()>;

    async fn get(&self, id: LeadId) -> Result<Lead>;

    /// Persist a fresh DND registry result. The only mutation a lead ever
    /// sees after creation.
    async fn update_dnd(
        &self,
        id: LeadId,
        registered: bool,
        checked_at: DateTime<Utc>,
    ) -> Result<()>;
}

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn insert(&self, campaign: Campaign) -> Result<()>;

    async fn get(&self, id: CampaignId) -> Result<Campaign>;

    async fn list_active(&self) -> Result<Vec<Campaign>>;

    async fn set_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
    ) -> Result<()>;
}

#[async_trait]
pub trait ScriptRepository: Send + Sync {
    async fn insert(&self, script: CallScript) -> Result<()>;

    /// Highest-version script for the campaign in the given language.
    async fn active_for(
        &self,
        campaign_id: CampaignId,
        language: &LanguageCode,
    ) -> Result<Option<CallScript>>;
}

#[async_trait]
pub trait CallRepository: Send + Sync {
    async fn insert(&self, call: Call) -> Result<()>;

    async fn get(&self, id: CallId) -> Result<Call>;

    async fn set_handle(
        &self,
        id: CallId,
        handle: CallHandle,
    ) -> Result<()>;

    async fn set_status(&self, id: CallId, status: CallStatus)
    -> Result<()>;

    /// Close the attempt. Returns the updated row.
    async fn close(
        &self,
        id: CallId,
        status: CallStatus,
        outcome: Option<CallOutcome>,
        recording_url: Option<String>,
        ended_at: DateTime<Utc>,
    ) -> Result<Call>;

    async fn find_open_by_handle(
        &self,
        handle: &CallHandle,
    ) -> Result<Option<Call>>;

    async fn find_open_for_unit(
        &self,
        unit_id: CampaignLeadId,
    ) -> Result<Option<Call>>;

    /// Daily-quota counter: calls created today (UTC day of `now`) for the
    /// campaign, regardless of their current status.
    async fn created_today(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
    ) -> Result<u32>;

    async fn history_for(
        &self,
        unit_id: CampaignLeadId,
    ) -> Result<Vec<Call>>;
}

#[async_trait]
pub trait CallbackRepository: Send + Sync {
    async fn insert(&self, callback: Callback) -> Result<()>;

    async fn list_for(
        &self,
        unit_id: CampaignLeadId,
    ) -> Result<Vec<Callback>>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<()>;

    async fn entries(&self) -> Result<Vec<AuditEntry>>;
}
