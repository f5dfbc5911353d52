//! In-process arena store backing the dispatcher runtime and the tests.
//!
//! Entities live in per-type maps keyed by their ids; relations are id
//! references only. Each repository guards its map with a single async mutex,
//! which is enough because none of these tables participates in the claim
//! atomicity contract (that belongs to the claim store).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use redial_model::{
    AuditEntry, Call, CallHandle, CallId, CallOutcome, CallScript,
    CallStatus, Callback, Campaign, CampaignId, CampaignLeadId,
    CampaignStatus, LanguageCode, Lead, LeadId, ScriptId,
};

use crate::error::{DialerError, Result};
use crate::store::{
    AuditLogRepository, CallRepository, CallbackRepository,
    CampaignRepository, LeadRepository, ScriptRepository,
};

#[derive(Debug, Default)]
pub struct InMemoryLeads {
    rows: Mutex<HashMap<LeadId, Lead>>,
}

impl InMemoryLeads {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeadRepository for InMemoryLeads {
    async fn insert(&self, lead: Lead) -> Result<()> {
        self.rows.lock().await.insert(lead.id, lead);
        Ok(())
    }

    async fn get(&self, id: LeadId) -> Result<Lead> {
        self.rows
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DialerError::NotFound(format!("lead {id}")))
    }

    async fn update_dnd(
        &self,
        id: LeadId,
        registered: bool,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut rows = self.rows.lock().await;
        let lead = rows
            .get_mut(&id)
            .ok_or_else(|| DialerError::NotFound(format!("lead {id}")))?;
        lead.dnd_registered = registered;
        lead.dnd_checked_at = Some(checked_at);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCampaigns {
    rows: Mutex<HashMap<CampaignId, Campaign>>,
}

impl InMemoryCampaigns {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignRepository for InMemoryCampaigns {
    async fn insert(&self, campaign: Campaign) -> Result<()> {
        self.rows.lock().await.insert(campaign.id, campaign);
        Ok(())
    }

    async fn get(&self, id: CampaignId) -> Result<Campaign> {
        self.rows
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DialerError::NotFound(format!("campaign {id}")))
    }

    async fn list_active(&self) -> Result<Vec<Campaign>> {
        let rows = self.rows.lock().await;
        let mut active: Vec<Campaign> = rows
            .values()
            .filter(|c| c.status == CampaignStatus::Active)
            .cloned()
            .collect();
        // Stable order so worker sharding stays deterministic across ticks.
        active.sort_by_key(|c| c.id);
        Ok(active)
    }

    async fn set_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
    ) -> Result<()> {
        let mut rows = self.rows.lock().await;
        let campaign = rows
            .get_mut(&id)
            .ok_or_else(|| DialerError::NotFound(format!("campaign {id}")))?;
        campaign.status = status;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryScripts {
    rows: Mutex<HashMap<ScriptId, CallScript>>,
}

impl InMemoryScripts {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScriptRepository for InMemoryScripts {
    async fn insert(&self, script: CallScript) -> Result<()> {
        self.rows.lock().await.insert(script.id, script);
        Ok(())
    }

    async fn active_for(
        &self,
        campaign_id: CampaignId,
        language: &LanguageCode,
    ) -> Result<Option<CallScript>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .filter(|s| {
                s.campaign_id == campaign_id && &s.language == language
            })
            .max_by_key(|s| s.version)
            .cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCalls {
    rows: Mutex<HashMap<CallId, Call>>,
}

impl InMemoryCalls {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallRepository for InMemoryCalls {
    async fn insert(&self, call: Call) -> Result<()> {
        self.rows.lock().await.insert(call.id, call);
        Ok(())
    }

    async fn get(&self, id: CallId) -> Result<Call> {
        self.rows
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DialerError::NotFound(format!("call {id}")))
    }

    async fn set_handle(
        &self,
        id: CallId,
        handle: CallHandle,
    ) -> Result<()> {
        let mut rows = self.rows.lock().await;
        let call = rows
            .get_mut(&id)
            .ok_or_else(|| DialerError::NotFound(format!("call {id}")))?;
        call.provider_handle = Some(handle);
        Ok(())
    }

    async fn set_status(
        &self,
        id: CallId,
        status: CallStatus,
    ) -> Result<()> {
        let mut rows = self.rows.lock().await;
        let call = rows
            .get_mut(&id)
            .ok_or_else(|| DialerError::NotFound(format!("call {id}")))?;
        if call.status.is_closed() {
            return Err(DialerError::Conflict(format!(
                "call {id} is already closed"
            )));
        }
        call.status = status;
        Ok(())
    }

    async fn close(
        &self,
        id: CallId,
        status: CallStatus,
        outcome: Option<CallOutcome>,
        recording_url: Option<String>,
        ended_at: DateTime<Utc>,
    ) -> Result<Call> {
        let mut rows = self.rows.lock().await;
        let call = rows
            .get_mut(&id)
            .ok_or_else(|| DialerError::NotFound(format!("call {id}")))?;
        if call.status.is_closed() {
            return Err(DialerError::Conflict(format!(
                "call {id} is already closed"
            )));
        }
        call.status = status;
        call.outcome = outcome;
        call.recording_url = recording_url;
        call.ended_at = Some(ended_at);
        Ok(call.clone())
    }

    async fn find_open_by_handle(
        &self,
        handle: &CallHandle,
    ) -> Result<Option<Call>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .find(|c| {
                c.provider_handle.as_ref() == Some(handle)
                    && !c.status.is_closed()
            })
            .cloned())
    }

    async fn find_open_for_unit(
        &self,
        unit_id: CampaignLeadId,
    ) -> Result<Option<Call>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .find(|c| {
                c.campaign_lead_id == unit_id && !c.status.is_closed()
            })
            .cloned())
    }

    async fn created_today(
        &self,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let rows = self.rows.lock().await;
        let today = now.date_naive();
        let count = rows
            .values()
            .filter(|c| {
                c.campaign_id == campaign_id
                    && c.started_at.date_naive() == today
            })
            .count();
        Ok(count as u32)
    }

    async fn history_for(
        &self,
        unit_id: CampaignLeadId,
    ) -> Result<Vec<Call>> {
        let rows = self.rows.lock().await;
        let mut history: Vec<Call> = rows
            .values()
            .filter(|c| c.campaign_lead_id == unit_id)
            .cloned()
            .collect();
        history.sort_by_key(|c| c.started_at);
        Ok(history)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCallbacks {
    rows: Mutex<Vec<Callback>>,
}

impl InMemoryCallbacks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallbackRepository for InMemoryCallbacks {
    async fn insert(&self, callback: Callback) -> Result<()> {
        self.rows.lock().await.push(callback);
        Ok(())
    }

    async fn list_for(
        &self,
        unit_id: CampaignLeadId,
    ) -> Result<Vec<Callback>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|cb| cb.campaign_lead_id == unit_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    rows: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLogRepository for InMemoryAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        self.rows.lock().await.push(entry);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.rows.lock().await.clone())
    }
}

/// Convenience bundle wiring every in-memory repository behind `Arc`s, ready
/// to hand to the dispatcher components.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub leads: Arc<InMemoryLeads>,
    pub campaigns: Arc<InMemoryCampaigns>,
    pub scripts: Arc<InMemoryScripts>,
    pub calls: Arc<InMemoryCalls>,
    pub callbacks: Arc<InMemoryCallbacks>,
    pub audit: Arc<InMemoryAuditLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use redial_model::{CampaignLead, LanguageCode, PhoneNumber};

    fn sample_lead() -> Lead {
        Lead::new(
            PhoneNumber::parse("+14155550100").unwrap(),
            LanguageCode::new("en"),
            0,
        )
    }

    #[tokio::test]
    async fn dnd_update_round_trips() {
        let leads = InMemoryLeads::new();
        let lead = sample_lead();
        let id = lead.id;
        leads.insert(lead).await.unwrap();

        let now = Utc::now();
        leads.update_dnd(id, true, now).await.unwrap();
        let stored = leads.get(id).await.unwrap();
        assert!(stored.dnd_registered);
        assert_eq!(stored.dnd_checked_at, Some(now));
    }

    #[tokio::test]
    async fn daily_quota_counts_only_today_for_one_campaign() {
        let calls = InMemoryCalls::new();
        let now = Utc::now();
        let unit = CampaignLead::new(CampaignId::new(), LeadId::new());
        let other = CampaignLead::new(CampaignId::new(), LeadId::new());

        calls.insert(Call::initiated(&unit, now)).await.unwrap();
        calls.insert(Call::initiated(&other, now)).await.unwrap();

        let mut yesterday = Call::initiated(&unit, now);
        yesterday.started_at = now - Duration::days(1);
        calls.insert(yesterday).await.unwrap();

        assert_eq!(
            calls.created_today(unit.campaign_id, now).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn close_rejects_double_completion() {
        let calls = InMemoryCalls::new();
        let now = Utc::now();
        let unit = CampaignLead::new(CampaignId::new(), LeadId::new());
        let call = Call::initiated(&unit, now);
        let id = call.id;
        calls.insert(call).await.unwrap();

        calls
            .close(id, CallStatus::Completed, None, None, now)
            .await
            .unwrap();
        let second = calls
            .close(id, CallStatus::Failed, None, None, now)
            .await;
        assert!(matches!(second, Err(DialerError::Conflict(_))));
    }

    #[tokio::test]
    async fn highest_script_version_wins() {
        let scripts = InMemoryScripts::new();
        let campaign_id = CampaignId::new();
        let lang = LanguageCode::new("en");

        let v1 = CallScript::new(campaign_id, lang.clone(), "old");
        let mut v2 = CallScript::new(campaign_id, lang.clone(), "new");
        v2.version = 2;
        scripts.insert(v1).await.unwrap();
        scripts.insert(v2).await.unwrap();

        let active = scripts
            .active_for(campaign_id, &lang)
            .await
            .unwrap()
            .expect("script");
        assert_eq!(active.version, 2);
        assert_eq!(active.content, "new");
    }
}
