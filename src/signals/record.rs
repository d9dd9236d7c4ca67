// =============================================================================
// Signal Record — the wire and persistence shape of a terminal transition
// =============================================================================
//
// One record per plan lifecycle, produced when a plan reaches TRIGGERED,
// INVALID, or EXPIRED. The triple (plan_id, state, timestamp_ms) is the
// global deduplication key; the store enforces it with a unique index and
// the emitter caches it in memory.
// =============================================================================

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::state_machine::{InvalidReason, PlanState};

/// Protocol tag stamped on every emitted signal.
pub const PROTOCOL_VERSION: &str = "breakout-v1";

/// Terminal state carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalState {
    Triggered,
    Invalid,
    Expired,
}

impl SignalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Invalid => "invalid",
            Self::Expired => "expired",
        }
    }

    /// Map a terminal plan state; `None` for non-terminal states.
    pub fn from_plan_state(state: &PlanState) -> Option<Self> {
        match state {
            PlanState::Triggered { .. } => Some(Self::Triggered),
            PlanState::Invalid { .. } => Some(Self::Invalid),
            PlanState::Expired => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle timestamps and the invalidation reason, ISO-8601 UTC strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalRuntime {
    pub armed_at: Option<String>,
    pub triggered_at: Option<String>,
    pub invalid_reason: Option<String>,
}

/// Indicator snapshot at emission time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalMetrics {
    pub rvol: Option<f64>,
    pub natr_pct: Option<f64>,
    pub atr: Option<f64>,
    pub pinbar: bool,
}

/// The full emitted signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub plan_id: String,
    pub state: SignalState,
    /// Market timestamp of the tick that produced the terminal transition.
    pub timestamp_ms: i64,
    pub runtime: SignalRuntime,
    pub last_price: f64,
    pub metrics: SignalMetrics,
    pub strength_score: u32,
    pub protocol_version: String,
}

/// Deduplication key: (plan_id, state, timestamp_ms).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalKey {
    pub plan_id: String,
    pub state: SignalState,
    pub timestamp_ms: i64,
}

impl SignalRecord {
    pub fn key(&self) -> SignalKey {
        SignalKey {
            plan_id: self.plan_id.clone(),
            state: self.state,
            timestamp_ms: self.timestamp_ms,
        }
    }
}

/// Render a market timestamp as ISO-8601 UTC with millisecond precision.
pub fn iso_utc(ts_ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(ts_ms)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Runtime block for a terminal state, given the lifecycle mirrors.
pub fn runtime_block(
    armed_at: Option<i64>,
    triggered_at: Option<i64>,
    invalid_reason: Option<InvalidReason>,
) -> SignalRuntime {
    SignalRuntime {
        armed_at: armed_at.and_then(iso_utc),
        triggered_at: triggered_at.and_then(iso_utc),
        invalid_reason: invalid_reason.map(|r| r.as_str().to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================
