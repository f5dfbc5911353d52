//! Core dispatch engine for outbound campaign calling.
//!
//! The crate is organised around one flow: a [`dispatch::CampaignDispatcher`]
//! pass selects due campaign-leads, runs them through the
//! [`dispatch::ComplianceGate`], claims them in a [`dispatch::ClaimStore`]
//! and hands them to a [`providers::CallPlacement`] implementation; the
//! [`dispatch::OutcomeReconciler`] later folds provider completions (or
//! expired leases) back into scheduling state under the retry policy.
//! [`dispatch::DialerRuntime`] supervises the long-running pieces.
#![allow(missing_docs)]

pub mod dispatch;
pub mod error;
pub mod providers;
pub mod store;

pub use dispatch::{
    CampaignDispatcher, ClaimOutcome, ClaimStore, ClaimStoreSnapshot,
    ClaimToken, ComplianceGate, DenyReason, DialerRuntime,
    DispatchEvent, DispatchEventPublisher, DispatcherConfig,
    InMemoryClaimStore, InProcDispatchBus, OutcomeReconciler,
    PassSummary, PriorityOrder, ReleaseDisposition, RetryDecision,
    ScriptValidator, Verdict,
};
pub use error::{DialerError, Result};
pub use providers::{
    CallPlacement, CallStatusChanged, DndRegistry, ProviderError,
    RegistryError,
};
pub use store::MemoryStore;
