// =============================================================================
// Breakout Plans — admission model and lifecycle state machine
// =============================================================================
//
// A plan is an immutable instruction: watch one instrument for a breakout
// through a level in one direction, confirm it, and report the outcome. The
// model here is the admission-time shape; `state_machine` drives the
// per-tick lifecycle.

pub mod state_machine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AdmissionError;
use crate::types::Direction;

/// The only entry type this engine evaluates.
const ENTRY_TYPE_BREAKOUT: &str = "breakout";

// ---------------------------------------------------------------------------
// Admission model
// ---------------------------------------------------------------------------

/// A rule that kills a plan before it triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvalidationCondition {
    /// Invalid once last price moves strictly above `level`.
    PriceAbove { level: f64 },
    /// Invalid once last price moves strictly below `level`.
    PriceBelow { level: f64 },
    /// Expired once this much market time has passed since `created_at`.
    TimeLimit { duration_seconds: i64 },
}

/// Optional entry-parameter bundle; `level` overrides `entry_price` as the
/// breakout trigger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryParams {
    #[serde(default)]
    pub level: Option<f64>,
}

/// Free-form plan attachments recognised by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraData {
    #[serde(default)]
    pub entry_params: Option<EntryParams>,

    #[serde(default)]
    pub invalidation_conditions: Vec<InvalidationCondition>,

    /// Plan-level parameter overrides, merged last by the config resolver.
    #[serde(default)]
    pub breakout_params: Option<Value>,
}

/// A breakout plan as admitted. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutPlan {
    pub id: String,
    pub instrument_id: String,
    pub direction: Direction,
    pub entry_type: String,
    pub entry_price: f64,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub extra_data: ExtraData,
}

impl BreakoutPlan {
    /// Decode and validate a plan from its admission JSON. No partial
    /// admission: any failure rejects the plan whole.
    pub fn from_json(value: &Value) -> Result<Self, AdmissionError> {
        let plan: Self = serde_json::from_value(value.clone())?;
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> Result<(), AdmissionError> {
        if self.entry_type != ENTRY_TYPE_BREAKOUT {
            return Err(AdmissionError::UnsupportedEntryType(
                self.entry_type.clone(),
            ));
        }
        if self.trigger_level().is_none() {
            return Err(AdmissionError::MissingTriggerLevel(self.id.clone()));
        }
        Ok(())
    }

    /// The breakout trigger level: `entry_params.level` when present,
    /// otherwise `entry_price`. `None` when neither yields a usable price.
    pub fn trigger_level(&self) -> Option<f64> {
        let level = self
            .extra_data
            .entry_params
            .as_ref()
            .and_then(|p| p.level)
            .unwrap_or(self.entry_price);
        (level.is_finite() && level > 0.0).then_some(level)
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at.timestamp_millis()
    }

    /// Earliest `time_limit` deadline in market milliseconds, if any.
    pub fn expiry_deadline_ms(&self) -> Option<i64> {
        self.extra_data
            .invalidation_conditions
            .iter()
            .filter_map(|c| match c {
                InvalidationCondition::TimeLimit { duration_seconds } => {
                    Some(self.created_at_ms() + duration_seconds * 1000)
                }
                _ => None,
            })
            .min()
    }

    /// True when any price-bound invalidation condition is breached.
    pub fn price_invalidated(&self, price: f64) -> bool {
        self.extra_data
            .invalidation_conditions
            .iter()
            .any(|c| match c {
                InvalidationCondition::PriceAbove { level } => price > *level,
                InvalidationCondition::PriceBelow { level } => price < *level,
                InvalidationCondition::TimeLimit { .. } => false,
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
