// =============================================================================
// Market Data Module
// =============================================================================
//
// Typed bar and book records, the payload normalizer that produces them, and
// the per-instrument rolling store they land in. The store is a passive value
// owned by the engine coordinator; everything downstream reads snapshots.

pub mod normalizer;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::errors::ParseError;

// ---------------------------------------------------------------------------
// Bar
// ---------------------------------------------------------------------------

/// A single OHLCV bar. A bar is *developing* (latest, mutable) until its
/// confirm flag closes it; closed bars are immutable history and the only
/// input to indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Market timestamp of the bar open, milliseconds.
    pub ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Base-currency volume.
    pub volume: f64,
    pub is_closed: bool,
}

impl Bar {
    /// Check OHLC consistency (`low <= min(o,c) <= max(o,c) <= high`) and
    /// non-negative, finite volume.
    pub fn validate(&self) -> Result<(), ParseError> {
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(ParseError::InvalidBar {
                ts_ms: self.ts_ms,
                detail: "non-finite field".to_string(),
            });
        }
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || body_high > self.high {
            return Err(ParseError::InvalidBar {
                ts_ms: self.ts_ms,
                detail: format!(
                    "OHLC out of order: o={} h={} l={} c={}",
                    self.open, self.high, self.low, self.close
                ),
            });
        }
        if self.volume < 0.0 {
            return Err(ParseError::InvalidBar {
                ts_ms: self.ts_ms,
                detail: format!("negative volume {}", self.volume),
            });
        }
        Ok(())
    }

    /// High-low range of the bar.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Wilder's true range relative to the previous close. Falls back to the
    /// plain high-low range when no previous close exists.
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        match prev_close {
            Some(pc) => {
                let hl = self.high - self.low;
                let hc = (self.high - pc).abs();
                let lc = (self.low - pc).abs();
                hl.max(hc).max(lc)
            }
            None => self.range(),
        }
    }
}

// ---------------------------------------------------------------------------
// Book snapshot
// ---------------------------------------------------------------------------

/// One price level of the book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// A full depth snapshot: bids descending by price, asks ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Market timestamp of the snapshot, milliseconds.
    pub ts_ms: i64,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Midpoint of the top of book.
    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        }
    }

    /// Sum of bid sizes across the top `levels` levels.
    pub fn bid_depth(&self, levels: usize) -> f64 {
        self.bids.iter().take(levels).map(|l| l.size).sum()
    }

    /// Sum of ask sizes across the top `levels` levels.
    pub fn ask_depth(&self, levels: usize) -> f64 {
        self.asks.iter().take(levels).map(|l| l.size).sum()
    }

    /// Depth imbalance over the top `levels` levels, in [-1, +1].
    /// Positive means bid-heavy.
    pub fn imbalance(&self, levels: usize) -> f64 {
        let bid = self.bid_depth(levels);
        let ask = self.ask_depth(levels);
        let total = bid + ask;
        if total > 0.0 {
            (bid - ask) / total
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
