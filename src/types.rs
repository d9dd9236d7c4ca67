// =============================================================================
// Shared types used across the breakout engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of a breakout plan: long breaks above the level, short below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short. Used to fold the two breakout sides
    /// into a single arithmetic form.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Which side of the book a sweep depleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepSide {
    /// Bid depth collapsed — aggressive selling into support.
    Bid,
    /// Ask depth collapsed — aggressive buying into resistance.
    Ask,
}

impl SweepSide {
    /// A sweep supports a breakout when the side *resisting* that breakout
    /// is the one being eaten: asks for a long break, bids for a short one.
    pub fn supports(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Self::Ask, Direction::Long) | (Self::Bid, Direction::Short)
        )
    }
}

impl std::fmt::Display for SweepSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bid => write!(f, "bid"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

/// Pinbar classification on a closed bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinbarKind {
    /// Long lower wick — rejection of lower prices.
    Bullish,
    /// Long upper wick — rejection of higher prices.
    Bearish,
}

impl std::fmt::Display for PinbarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
        }
    }
}
