// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators the breakout
// engine consumes. Every public function returns `Option<T>` so callers are
// forced to handle insufficient-data and numerical-edge-case scenarios.
// Inputs are always *closed* bars, oldest first.

pub mod atr;
pub mod pinbar;
pub mod rvol;
