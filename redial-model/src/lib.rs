//! Core data model definitions shared across Redial crates.
//!
//! Entities are plain structs related by id references only; no mutual object
//! ownership. The dispatch core (`redial-core`) owns every state transition.
#![allow(missing_docs)]

pub mod audit;
pub mod call;
pub mod callback;
pub mod campaign;
pub mod campaign_lead;
pub mod error;
pub mod ids;
pub mod lead;
pub mod script;

// Intentionally curated re-exports for downstream consumers.
pub use audit::{AuditEntry, AuditKind};
pub use call::{Call, CallHandle, CallOutcome, CallStatus};
pub use callback::{Callback, CallbackStatus};
pub use campaign::{Campaign, CampaignStatus};
pub use campaign_lead::{CampaignLead, CampaignLeadStatus, DEFAULT_PRIORITY};
pub use error::{ModelError, Result as ModelResult};
pub use ids::{
    AuditEntryId, CallId, CallbackId, CampaignId, CampaignLeadId, LeadId,
    ScriptId,
};
pub use lead::{LanguageCode, Lead, PhoneNumber};
pub use script::CallScript;
