//! External capabilities consumed by the dispatch core.
//!
//! The telephony transport and the DND registry are opaque collaborators:
//! the core invokes them through these traits and never implements them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use redial_model::{
    CallHandle, CallOutcome, CallScript, CallStatus, PhoneNumber,
};

/// Failures surfaced by the call-placement provider. Both are attempt
/// failures from the dispatcher's point of view: the attempt is recorded and
/// the retry policy decides what happens next.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("invalid number: {0}")]
    InvalidNumber(String),
}

/// Failures surfaced by the DND registry. A timeout means "could not
/// verify" and the compliance gate must treat it as a denial, never as an
/// implicit allow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry lookup timed out after {0}ms")]
    RegistryTimeout(u64),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Opaque call-placement capability. Placement is fire-and-forget: the call
/// itself runs on the provider's infrastructure and completion arrives later
/// as a [`CallStatusChanged`] event.
#[async_trait]
pub trait CallPlacement: Send + Sync {
    async fn place_call(
        &self,
        phone: &PhoneNumber,
        script: &CallScript,
    ) -> std::result::Result<CallHandle, ProviderError>;
}

/// Regulatory do-not-disturb registry lookup. The compliance gate bounds
/// every lookup with a hard timeout; implementations need not enforce one.
#[async_trait]
pub trait DndRegistry: Send + Sync {
    async fn check(
        &self,
        phone: &PhoneNumber,
    ) -> std::result::Result<bool, RegistryError>;
}

/// Asynchronous status notification from the telephony provider, consumed by
/// the outcome reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStatusChanged {
    pub handle: CallHandle,
    pub status: CallStatus,
    pub outcome: Option<CallOutcome>,
    /// Lead- or agent-requested follow-up time, present when the outcome is
    /// `callback`.
    pub requested_callback: Option<DateTime<Utc>>,
    pub recording_url: Option<String>,
}
