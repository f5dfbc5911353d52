//! Campaign call dispatch: compliance gating, claims, retry policy,
//! the dispatcher pass and the outcome reconciler, plus the runtime that
//! keeps them ticking.

pub mod claims;
pub mod compliance;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod policy;
pub mod reconciler;
pub mod runtime;

pub use claims::{
    ClaimOutcome, ClaimStore, ClaimStoreSnapshot, ClaimToken,
    InMemoryClaimStore, ReleaseDisposition,
};
pub use compliance::{
    ComplianceGate, DenyReason, ScriptValidator, Verdict,
};
pub use config::{
    CallingHoursPolicy, DispatcherConfig, DndCheckConfig, LeaseConfig,
    PriorityOrder, ScriptValidationConfig, WorkerConfig,
};
pub use dispatcher::{CampaignDispatcher, PassSummary};
pub use events::{
    DispatchEvent, DispatchEventPublisher, InProcDispatchBus,
};
pub use policy::{next_state, RetryDecision};
pub use reconciler::OutcomeReconciler;
pub use runtime::DialerRuntime;
