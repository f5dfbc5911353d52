use std::cmp::Ordering;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Global knobs that tune dispatcher behaviour.
///
/// All fields carry defaults so deployments can progressively adopt regional
/// policy overrides without supplying a full configuration payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Regulatory calling-hours policy for the deployment region.
    pub calling_hours: CallingHoursPolicy,
    /// DND registry lookup tuning (cache TTL, hard timeout).
    pub dnd: DndCheckConfig,
    /// Static script validation rules.
    pub script: ScriptValidationConfig,
    /// Claim lease defaults and housekeeping cadence.
    pub lease: LeaseConfig,
    /// Worker pool sizing and tick cadence.
    pub workers: WorkerConfig,
    /// Which end of the priority scale dispatches first.
    pub priority_order: PriorityOrder,
    /// Fallback callback delay when the completion event carries no
    /// requested time (hours).
    pub default_callback_delay_hours: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            calling_hours: CallingHoursPolicy::default(),
            dnd: DndCheckConfig::default(),
            script: ScriptValidationConfig::default(),
            lease: LeaseConfig::default(),
            workers: WorkerConfig::default(),
            priority_order: PriorityOrder::default(),
            default_callback_delay_hours: 24,
        }
    }
}

/// Regulatory calling window, evaluated against the lead's local wall clock.
/// The campaign's own window is intersected with this one; neither may be
/// bypassed by the dispatcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallingHoursPolicy {
    /// Permitted weekdays, Monday first.
    pub weekdays: [bool; 7],
    pub window_start: NaiveTime,
    /// Exclusive upper bound: a call at exactly this time is denied.
    pub window_end: NaiveTime,
}

impl Default for CallingHoursPolicy {
    fn default() -> Self {
        Self {
            // Monday through Saturday.
            weekdays: [true, true, true, true, true, true, false],
            window_start: NaiveTime::from_hms_opt(9, 0, 0)
                .expect("valid window start"),
            window_end: NaiveTime::from_hms_opt(21, 0, 0)
                .expect("valid window end"),
        }
    }
}

impl CallingHoursPolicy {
    pub fn permits_weekday(&self, weekday: Weekday) -> bool {
        self.weekdays[weekday.num_days_from_monday() as usize]
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DndCheckConfig {
    /// How long a cached registry result stays fresh (hours).
    pub ttl_hours: i64,
    /// Hard timeout on a registry lookup (ms). A timed-out lookup is a
    /// transient denial, never an implicit allow.
    pub timeout_ms: u64,
}

impl Default for DndCheckConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            timeout_ms: 1_000,
        }
    }
}

/// Static validation rules applied once per script version. Matching is
/// case-insensitive substring search.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScriptValidationConfig {
    /// At least one marker must appear (caller identification).
    pub identification_markers: Vec<String>,
    /// At least one marker must appear (opt-out language).
    pub opt_out_markers: Vec<String>,
    /// None of these may appear.
    pub prohibited_terms: Vec<String>,
}

impl Default for ScriptValidationConfig {
    fn default() -> Self {
        Self {
            identification_markers: vec![
                "my name is".into(),
                "calling from".into(),
                "on behalf of".into(),
            ],
            opt_out_markers: vec![
                "opt out".into(),
                "do not call".into(),
                "remove you from our list".into(),
            ],
            prohibited_terms: vec![
                "guaranteed winner".into(),
                "risk-free".into(),
                "act now or".into(),
            ],
        }
    }
}

/// Claim lease tuning. Calls run for seconds to minutes on the provider's
/// side, so leases are long relative to in-process work.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// TTL granted to each claim (seconds).
    pub claim_ttl_secs: i64,
    /// Cadence for scanning expired leases (ms).
    pub housekeeper_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            claim_ttl_secs: 300,
            housekeeper_interval_ms: 5_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of dispatcher workers. Campaigns are sharded across workers so
    /// each makes independent forward progress.
    pub workers: usize,
    /// Pass cadence per worker (ms).
    pub tick_interval_ms: u64,
    /// Buffer size of the provider completion channel.
    pub completion_buffer: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            tick_interval_ms: 1_000,
            completion_buffer: 256,
        }
    }
}

/// Which end of the integer priority scale dispatches first. The upstream
/// data model never pinned a direction, so it is a policy knob rather than a
/// hardcoded assumption.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PriorityOrder {
    #[default]
    HigherFirst,
    LowerFirst,
}

impl PriorityOrder {
    /// Ordering of `a` relative to `b` where `Less` dispatches earlier.
    pub fn compare(&self, a: i32, b: i32) -> Ordering {
        match self {
            PriorityOrder::HigherFirst => b.cmp(&a),
            PriorityOrder::LowerFirst => a.cmp(&b),
        }
    }
}
