//! Compliance gate: the mandatory pre-dispatch check chain.
//!
//! Every attempt passes through the gate immediately before placement, and
//! the checks always run in the same order so denial reasons are stable:
//! campaign state, daily quota, calling hours, DND registry, script
//! validity. Every denial and every live registry lookup lands in the audit
//! trail.

use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use redial_model::{
    AuditEntry, AuditKind, CallScript, Campaign, CampaignLead, Lead,
    ScriptId,
};

use crate::dispatch::config::{
    CallingHoursPolicy, DndCheckConfig, ScriptValidationConfig,
};
use crate::error::Result;
use crate::providers::DndRegistry;
use crate::store::{AuditLogRepository, CallRepository, LeadRepository, ScriptRepository};

/// Why the gate refused to dispatch. Transient reasons leave the unit
/// pending for a later pass; permanent reasons remove it from dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    CampaignInactive,
    QuotaExhausted,
    OutsideCallingHours,
    DndRegistered,
    RegistryUnavailable,
    NoValidScript,
}

impl DenyReason {
    /// Permanent reasons will not clear on their own within the campaign's
    /// horizon, so the unit is failed rather than left to spin.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            DenyReason::DndRegistered | DenyReason::NoValidScript
        )
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DenyReason::CampaignInactive => "campaign_inactive",
            DenyReason::QuotaExhausted => "quota_exhausted",
            DenyReason::OutsideCallingHours => "outside_calling_hours",
            DenyReason::DndRegistered => "dnd_registered",
            DenyReason::RegistryUnavailable => "registry_unavailable",
            DenyReason::NoValidScript => "no_valid_script",
        };
        f.write_str(label)
    }
}

/// Gate decision. An allow carries the script that passed validation so the
/// caller dials with exactly what was checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow { script: CallScript },
    Deny { reason: DenyReason },
}

/// Static script checks, cached per (script, version) since script content
/// is immutable once versioned.
#[derive(Debug, Default)]
pub struct ScriptValidator {
    config: ScriptValidationConfig,
    cache: DashMap<(ScriptId, u32), bool>,
}

impl ScriptValidator {
    pub fn new(config: ScriptValidationConfig) -> Self {
        Self {
            config,
            cache: DashMap::new(),
        }
    }

    pub fn is_valid(&self, script: &CallScript) -> bool {
        let key = script.version_key();
        if let Some(cached) = self.cache.get(&key) {
            return *cached;
        }
        let valid = self.validate(script);
        self.cache.insert(key, valid);
        valid
    }

    fn validate(&self, script: &CallScript) -> bool {
        let content = script.content.to_lowercase();
        let has_any = |markers: &[String]| {
            markers.iter().any(|m| content.contains(&m.to_lowercase()))
        };
        has_any(&self.config.identification_markers)
            && has_any(&self.config.opt_out_markers)
            && !has_any(&self.config.prohibited_terms)
    }
}

pub struct ComplianceGate {
    leads: Arc<dyn LeadRepository>,
    calls: Arc<dyn CallRepository>,
    scripts: Arc<dyn ScriptRepository>,
    registry: Arc<dyn DndRegistry>,
    audit: Arc<dyn AuditLogRepository>,
    validator: ScriptValidator,
    calling_hours: CallingHoursPolicy,
    dnd: DndCheckConfig,
}

impl fmt::Debug for ComplianceGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplianceGate")
            .field("calling_hours", &self.calling_hours)
            .field("dnd", &self.dnd)
            .finish_non_exhaustive()
    }
}

impl ComplianceGate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        calls: Arc<dyn CallRepository>,
        scripts: Arc<dyn ScriptRepository>,
        registry: Arc<dyn DndRegistry>,
        audit: Arc<dyn AuditLogRepository>,
        validator: ScriptValidator,
        calling_hours: CallingHoursPolicy,
        dnd: DndCheckConfig,
    ) -> Self {
        Self {
            leads,
            calls,
            scripts,
            registry,
            audit,
            validator,
            calling_hours,
            dnd,
        }
    }

    /// Run the full check chain for one candidate unit.
    pub async fn evaluate(
        &self,
        campaign: &Campaign,
        unit: &CampaignLead,
        now: DateTime<Utc>,
    ) -> Result<Verdict> {
        if !campaign.is_dispatchable() {
            return self
                .deny(campaign, unit, DenyReason::CampaignInactive)
                .await;
        }

        let placed = self.calls.created_today(campaign.id, now).await?;
        if placed >= campaign.call_limit_per_day {
            return self
                .deny(campaign, unit, DenyReason::QuotaExhausted)
                .await;
        }

        let lead = self.leads.get(unit.lead_id).await?;
        if !self.within_calling_hours(campaign, &lead, now) {
            return self
                .deny(campaign, unit, DenyReason::OutsideCallingHours)
                .await;
        }

        match self.dnd_registered(&lead, now).await? {
            DndAnswer::Registered => {
                return self
                    .deny(campaign, unit, DenyReason::DndRegistered)
                    .await;
            }
            DndAnswer::Unavailable => {
                return self
                    .deny(campaign, unit, DenyReason::RegistryUnavailable)
                    .await;
            }
            DndAnswer::Clear => {}
        }

        let script = self
            .scripts
            .active_for(campaign.id, &lead.language)
            .await?;
        match script {
            Some(script) if self.validator.is_valid(&script) => {
                Ok(Verdict::Allow { script })
            }
            _ => {
                self.deny(campaign, unit, DenyReason::NoValidScript)
                    .await
            }
        }
    }

    /// Both the regional window and the campaign's own window must admit
    /// the lead's local wall clock. Window ends are exclusive.
    fn within_calling_hours(
        &self,
        campaign: &Campaign,
        lead: &Lead,
        now: DateTime<Utc>,
    ) -> bool {
        let local = lead.local_time(now);
        if !self.calling_hours.permits_weekday(local.weekday()) {
            return false;
        }
        let t = local.time();
        let policy = &self.calling_hours;
        t >= policy.window_start
            && t < policy.window_end
            && t >= campaign.call_time_start
            && t < campaign.call_time_end
    }

    async fn dnd_registered(
        &self,
        lead: &Lead,
        now: DateTime<Utc>,
    ) -> Result<DndAnswer> {
        if lead.dnd_is_fresh(now, Duration::hours(self.dnd.ttl_hours)) {
            return Ok(if lead.dnd_registered {
                DndAnswer::Registered
            } else {
                DndAnswer::Clear
            });
        }

        let lookup = tokio::time::timeout(
            StdDuration::from_millis(self.dnd.timeout_ms),
            self.registry.check(&lead.phone),
        )
        .await;

        let registered = match lookup {
            Ok(Ok(registered)) => registered,
            Ok(Err(err)) => {
                warn!(
                    target: "dial::compliance",
                    lead_id = %lead.id,
                    error = %err,
                    "DND registry lookup failed"
                );
                self.audit
                    .append(
                        AuditEntry::new(
                            AuditKind::DndLookup,
                            format!("registry lookup failed: {err}"),
                        )
                        .lead(lead.id),
                    )
                    .await?;
                return Ok(DndAnswer::Unavailable);
            }
            Err(_) => {
                warn!(
                    target: "dial::compliance",
                    lead_id = %lead.id,
                    timeout_ms = self.dnd.timeout_ms,
                    "DND registry lookup timed out"
                );
                self.audit
                    .append(
                        AuditEntry::new(
                            AuditKind::DndLookup,
                            format!(
                                "registry lookup timed out after {}ms",
                                self.dnd.timeout_ms
                            ),
                        )
                        .lead(lead.id),
                    )
                    .await?;
                return Ok(DndAnswer::Unavailable);
            }
        };

        self.audit
            .append(
                AuditEntry::new(
                    AuditKind::DndLookup,
                    format!("registry answered registered={registered}"),
                )
                .lead(lead.id),
            )
            .await?;
        self.leads.update_dnd(lead.id, registered, now).await?;

        Ok(if registered {
            DndAnswer::Registered
        } else {
            DndAnswer::Clear
        })
    }

    async fn deny(
        &self,
        campaign: &Campaign,
        unit: &CampaignLead,
        reason: DenyReason,
    ) -> Result<Verdict> {
        debug!(
            target: "dial::compliance",
            campaign_id = %campaign.id,
            campaign_lead_id = %unit.id,
            %reason,
            permanent = reason.is_permanent(),
            "dispatch denied"
        );
        self.audit
            .append(
                AuditEntry::new(AuditKind::ComplianceDenied, reason.to_string())
                    .campaign(campaign.id)
                    .lead(unit.lead_id)
                    .unit(unit.id),
            )
            .await?;
        Ok(Verdict::Deny { reason })
    }
}

enum DndAnswer {
    Registered,
    Clear,
    Unavailable,
}
