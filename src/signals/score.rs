// =============================================================================
// Strength Score — graded quality of a triggered breakout
// =============================================================================
//
// A triggered signal carries a 0..100 score built from additive components:
//
//   base        30   every confirmed break starts here
//   volume      0-25 scales with RVOL above 1.0, only above the volume gate
//   volatility  25   when NATR sits inside the tradeable band
//   pattern     10   pinbar on the retest bar (retest mode only)
//   liquidity   10   book sweep in the breakout direction
//
// Component weights come from `scoring_params` so instruments can re-grade
// without code changes.
// =============================================================================

use crate::config::{BreakoutParams, ScoringParams};
use crate::metrics::MetricsSnapshot;
use crate::types::Direction;

/// Score a triggered breakout from the tick's metrics snapshot.
pub fn strength_score(
    metrics: &MetricsSnapshot,
    breakout: &BreakoutParams,
    scoring: &ScoringParams,
    direction: Direction,
    retest_pinbar: bool,
) -> u32 {
    let mut score = scoring.base;

    // Volume: reward RVOL above 1.0, capped, never negative. Only counted
    // when the volume gate itself is satisfied.
    if let Some(rvol) = metrics.rvol {
        if rvol >= breakout.min_rvol {
            let raw = ((rvol - 1.0) * 10.0).round();
            let component = raw.clamp(0.0, scoring.volume_max as f64) as u32;
            score += component;
        }
    }

    // Volatility: a NATR band wide enough to move but not untradeable.
    if let Some(natr) = metrics.natr_pct {
        if natr >= scoring.natr_floor && natr <= scoring.natr_ceiling {
            score += scoring.volatility_bonus;
        }
    }

    // Pattern: rejection candle at the retest.
    if breakout.allow_retest_entry && retest_pinbar {
        score += scoring.pattern_bonus;
    }

    // Liquidity: the resisting side of the book was swept.
    if let Some(side) = metrics.sweep {
        if side.supports(direction) {
            score += scoring.liquidity_bonus;
        }
    }

    score.min(100)
}

// =============================================================================
// Tests
// =============================================================================
