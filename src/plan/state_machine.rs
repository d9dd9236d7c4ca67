// =============================================================================
// Breakout Lifecycle State Machine
// =============================================================================
//
// Per-plan lifecycle over a DAG:
//
//   PENDING -> BREAK_SEEN -> BREAK_CONFIRMED -> TRIGGERED
//   PENDING | BREAK_SEEN | BREAK_CONFIRMED -> INVALID
//   PENDING | BREAK_SEEN -> EXPIRED
//
// Transitions are pure functions of (previous state, tick inputs, effective
// parameters). Terminal states are absorbing. Within one evaluation the
// machine cascades: a bar can take a plan from PENDING through TRIGGERED in
// a single tick.
//
// Tie-breaking is fail-safe: invalidation rules are checked before any
// confirmation rule on every step.
//
// All timing is market time. Wall clock never appears here.
// =============================================================================

use serde::Serialize;
use tracing::debug;

use crate::config::ParamSet;
use crate::market_data::Bar;
use crate::metrics::MetricsSnapshot;
use crate::plan::BreakoutPlan;
use crate::types::Direction;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Why a plan went INVALID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// A price-bound invalidation condition was breached.
    PriceLimit,
    /// A closed bar fell back to the pre-break side of the level.
    FakeoutClose,
    /// The confirmation window elapsed with a gate unsatisfied.
    ConfirmationFailed,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceLimit => "price_limit",
            Self::FakeoutClose => "fakeout_close",
            Self::ConfirmationFailed => "confirmation_failed",
        }
    }
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state, tagged with the data each stage needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlanState {
    Pending,
    BreakSeen {
        /// Market timestamp of the tick that saw the break.
        break_ts: i64,
        /// Open timestamp of the bar that produced the break.
        break_bar_ts: i64,
    },
    BreakConfirmed {
        armed_at: i64,
        break_bar_ts: i64,
        /// Retest mode: price has returned into the band around the level.
        retest_seen: bool,
        /// A pinbar printed on the retest tick.
        retest_pinbar: bool,
    },
    Triggered {
        triggered_at: i64,
    },
    Invalid {
        reason: InvalidReason,
    },
    Expired,
}

impl PlanState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Triggered { .. } | Self::Invalid { .. } | Self::Expired
        )
    }

    /// Position along the lifecycle DAG, used to assert monotonicity.
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::BreakSeen { .. } => 1,
            Self::BreakConfirmed { .. } => 2,
            Self::Triggered { .. } | Self::Invalid { .. } | Self::Expired => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::BreakSeen { .. } => "break_seen",
            Self::BreakConfirmed { .. } => "break_confirmed",
            Self::Triggered { .. } => "triggered",
            Self::Invalid { .. } => "invalid",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for PlanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Tick inputs
// ---------------------------------------------------------------------------

/// The freshest per-instrument view a step reads. Built by the coordinator
/// from the data store and metrics snapshot; never mutated here.
#[derive(Debug, Clone, Copy)]
pub struct TickInputs<'a> {
    /// Market timestamp of this tick.
    pub now_ts: i64,
    /// Last trade price (close of the latest bar, developing or closed).
    pub last_price: Option<f64>,
    /// The developing bar, if one exists.
    pub developing: Option<&'a Bar>,
    /// The most recent closed bar.
    pub last_closed: Option<&'a Bar>,
    /// Close of the closed bar before `last_closed` (true-range input).
    pub prev_close: Option<f64>,
    pub metrics: &'a MetricsSnapshot,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Run the machine to a fixed point for this tick, reporting every state
/// passed through to `on_transition`. A single tick may cascade through
/// several stages (momentum entries confirm and trigger on the same bar),
/// so `step` is applied until the state stops changing; the observer sees
/// each intermediate stage, whose data would otherwise be lost to the
/// caller (the coordinator mirrors `armed_at` and friends from them).
pub fn advance_with<F>(
    plan: &BreakoutPlan,
    state: &PlanState,
    inputs: &TickInputs,
    params: &ParamSet,
    mut on_transition: F,
) -> PlanState
where
    F: FnMut(&PlanState),
{
    let mut current = state.clone();
    // The DAG has three edges plus one flag update; four applications reach
    // any fixed point.
    for _ in 0..4 {
        let next = step(plan, &current, inputs, params);
        debug_assert!(
            next.rank() >= current.rank(),
            "state machine moved backwards: {current} -> {next}"
        );
        if next == current {
            break;
        }
        debug!(
            plan_id = %plan.id,
            from = %current,
            to = %next,
            ts = inputs.now_ts,
            "plan transition"
        );
        on_transition(&next);
        current = next;
    }
    current
}

/// [`advance_with`] for callers that only want the fixed point.
pub fn advance(
    plan: &BreakoutPlan,
    state: &PlanState,
    inputs: &TickInputs,
    params: &ParamSet,
) -> PlanState {
    advance_with(plan, state, inputs, params, |_| {})
}

/// One pure transition. Invalidation checks always run before confirmation
/// or trigger logic so that simultaneous firings resolve fail-safe.
pub fn step(
    plan: &BreakoutPlan,
    state: &PlanState,
    inputs: &TickInputs,
    params: &ParamSet,
) -> PlanState {
    if state.is_terminal() {
        return state.clone();
    }

    let level = match plan.trigger_level() {
        Some(l) => l,
        // Unreachable post-admission; fail safe rather than panic.
        None => {
            return PlanState::Invalid {
                reason: InvalidReason::PriceLimit,
            }
        }
    };

    // -- Invalidation first (ties resolve fail-safe) -------------------------
    if let Some(price) = inputs.last_price {
        if plan.price_invalidated(price) {
            return PlanState::Invalid {
                reason: InvalidReason::PriceLimit,
            };
        }
    }

    let break_bar_ts = match state {
        PlanState::BreakSeen { break_bar_ts, .. }
        | PlanState::BreakConfirmed { break_bar_ts, .. } => Some(*break_bar_ts),
        _ => None,
    };
    if let Some(bar_ts) = break_bar_ts {
        if params.breakout_params.fakeout_close_invalidate
            && fakeout_closed(plan.direction, level, bar_ts, inputs)
        {
            return PlanState::Invalid {
                reason: InvalidReason::FakeoutClose,
            };
        }
    }

    if matches!(state, PlanState::Pending | PlanState::BreakSeen { .. }) {
        if let Some(deadline) = plan.expiry_deadline_ms() {
            if inputs.now_ts >= deadline {
                return PlanState::Expired;
            }
        }
    }

    // -- Stage logic ---------------------------------------------------------
    match state {
        PlanState::Pending => step_pending(plan, level, inputs, params),
        PlanState::BreakSeen {
            break_ts,
            break_bar_ts,
        } => step_break_seen(plan, level, *break_ts, *break_bar_ts, inputs, params),
        PlanState::BreakConfirmed {
            armed_at,
            break_bar_ts,
            retest_seen,
            retest_pinbar,
        } => step_confirmed(
            plan,
            level,
            *armed_at,
            *break_bar_ts,
            *retest_seen,
            *retest_pinbar,
            inputs,
            params,
        ),
        terminal => terminal.clone(),
    }
}

// ---------------------------------------------------------------------------
// Stage transitions
// ---------------------------------------------------------------------------

fn step_pending(
    plan: &BreakoutPlan,
    level: f64,
    inputs: &TickInputs,
    params: &ParamSet,
) -> PlanState {
    let threshold = penetration_threshold(level, params, inputs.metrics.atr);

    // Breakout-side extreme of the developing bar, or the last trade price.
    let developing_extreme = inputs.developing.map(|bar| match plan.direction {
        Direction::Long => bar.high,
        Direction::Short => bar.low,
    });

    let broke_via_developing = developing_extreme
        .map(|p| beyond(plan.direction, level, threshold, p))
        .unwrap_or(false);
    let broke_via_price = inputs
        .last_price
        .map(|p| beyond(plan.direction, level, threshold, p))
        .unwrap_or(false);

    if !broke_via_developing && !broke_via_price {
        return PlanState::Pending;
    }

    // Identify the bar that produced the break. When it is already closed,
    // it must carry the minimum absolute volume.
    let break_bar = if broke_via_developing {
        inputs.developing
    } else {
        inputs.developing.or(inputs.last_closed)
    };
    let Some(break_bar) = break_bar else {
        return PlanState::Pending;
    };
    if break_bar.is_closed && break_bar.volume < params.volume_params.min_volume_threshold {
        return PlanState::Pending;
    }

    PlanState::BreakSeen {
        break_ts: inputs.now_ts,
        break_bar_ts: break_bar.ts_ms,
    }
}

#[allow(clippy::too_many_arguments)]
fn step_break_seen(
    plan: &BreakoutPlan,
    level: f64,
    break_ts: i64,
    break_bar_ts: i64,
    inputs: &TickInputs,
    params: &ParamSet,
) -> PlanState {
    let b = &params.breakout_params;
    let threshold = penetration_threshold(level, params, inputs.metrics.atr);
    let confirmed = PlanState::BreakConfirmed {
        armed_at: inputs.now_ts,
        break_bar_ts,
        retest_seen: false,
        retest_pinbar: false,
    };
    let failed = PlanState::Invalid {
        reason: InvalidReason::ConfirmationFailed,
    };

    if b.confirm_close {
        // The confirmation window is the break bar itself: decide when it
        // has closed, wait while it is still developing.
        let Some(last_closed) = inputs.last_closed else {
            return PlanState::BreakSeen {
                break_ts,
                break_bar_ts,
            };
        };
        if last_closed.ts_ms < break_bar_ts {
            return PlanState::BreakSeen {
                break_ts,
                break_bar_ts,
            };
        }

        let close_ok = last_closed.ts_ms == break_bar_ts
            && beyond(plan.direction, level, threshold, last_closed.close);
        if close_ok && gates_pass(plan, break_bar_ts, inputs, params) {
            confirmed
        } else {
            failed
        }
    } else {
        // Time mode: gates are judged once the confirmation window elapses.
        if inputs.now_ts - break_ts < b.confirm_time_ms {
            return PlanState::BreakSeen {
                break_ts,
                break_bar_ts,
            };
        }
        if gates_pass(plan, break_bar_ts, inputs, params) {
            confirmed
        } else {
            failed
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn step_confirmed(
    plan: &BreakoutPlan,
    level: f64,
    armed_at: i64,
    break_bar_ts: i64,
    retest_seen: bool,
    retest_pinbar: bool,
    inputs: &TickInputs,
    params: &ParamSet,
) -> PlanState {
    let b = &params.breakout_params;

    if !b.allow_retest_entry {
        // Momentum mode: enter on the tick that confirmed.
        return PlanState::Triggered {
            triggered_at: inputs.now_ts,
        };
    }

    let Some(price) = inputs.last_price else {
        return PlanState::BreakConfirmed {
            armed_at,
            break_bar_ts,
            retest_seen,
            retest_pinbar,
        };
    };
    let band = level * b.retest_band_pct / 100.0;

    if !retest_seen {
        if (price - level).abs() <= band {
            return PlanState::BreakConfirmed {
                armed_at,
                break_bar_ts,
                retest_seen: true,
                retest_pinbar: inputs.metrics.pinbar.is_some(),
            };
        }
        return PlanState::BreakConfirmed {
            armed_at,
            break_bar_ts,
            retest_seen,
            retest_pinbar,
        };
    }

    // Retest observed: enter when price resumes beyond the band in the
    // breakout direction.
    if beyond(plan.direction, level, band, price) {
        return PlanState::Triggered {
            triggered_at: inputs.now_ts,
        };
    }
    PlanState::BreakConfirmed {
        armed_at,
        break_bar_ts,
        retest_seen,
        retest_pinbar,
    }
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// Penetration distance for BREAK_SEEN: the percentage branch, widened by
/// the ATR branch when configured and ATR is available.
pub fn penetration_threshold(level: f64, params: &ParamSet, atr: Option<f64>) -> f64 {
    let b = &params.breakout_params;
    let pct_branch = level * b.penetration_pct / 100.0;
    match atr {
        Some(atr) if b.penetration_natr_mult > 0.0 => pct_branch.max(atr * b.penetration_natr_mult),
        _ => pct_branch,
    }
}

/// Strictly beyond the level by the threshold, on the breakout side.
/// Equality never triggers.
fn beyond(direction: Direction, level: f64, threshold: f64, price: f64) -> bool {
    (price - level) * direction.sign() > threshold
}

/// A closed bar at or after the break bar settled back on the pre-break
/// side of the level.
fn fakeout_closed(direction: Direction, level: f64, break_bar_ts: i64, inputs: &TickInputs) -> bool {
    let Some(closed) = inputs.last_closed else {
        return false;
    };
    if closed.ts_ms < break_bar_ts {
        return false;
    }
    (closed.close - level) * direction.sign() < 0.0
}

/// Confirmation gates: volume, range, and (optionally) sweep. All fail
/// closed when their inputs are missing.
fn gates_pass(
    plan: &BreakoutPlan,
    break_bar_ts: i64,
    inputs: &TickInputs,
    params: &ParamSet,
) -> bool {
    let b = &params.breakout_params;

    // Volume gate.
    match inputs.metrics.rvol {
        Some(rvol) if rvol >= b.min_rvol => {}
        _ => return false,
    }

    // Range gate: break-bar true range against ATR.
    if b.min_break_range_atr > 0.0 {
        let Some(atr) = inputs.metrics.atr else {
            return false;
        };
        let Some(tr) = break_bar_true_range(break_bar_ts, inputs) else {
            return false;
        };
        if tr < b.min_break_range_atr * atr {
            return false;
        }
    }

    // Sweep gate: book depletion on the side resisting the breakout.
    if b.ob_sweep_check {
        match inputs.metrics.sweep {
            Some(side) if side.supports(plan.direction) => {}
            _ => return false,
        }
    }

    true
}

/// True range of the bar that produced the break, whichever buffer slot it
/// currently occupies.
fn break_bar_true_range(break_bar_ts: i64, inputs: &TickInputs) -> Option<f64> {
    if let Some(closed) = inputs.last_closed {
        if closed.ts_ms == break_bar_ts {
            return Some(closed.true_range(inputs.prev_close));
        }
    }
    if let Some(dev) = inputs.developing {
        if dev.ts_ms == break_bar_ts {
            return Some(dev.true_range(inputs.last_closed.map(|b| b.close)));
        }
    }
    None
}

// =============================================================================
// Tests
// =============================================================================
