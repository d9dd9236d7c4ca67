// =============================================================================
// Pinbar Classification
// =============================================================================
//
// A pinbar is a rejection candle: a small body pushed to one end of the
// range by a single long wick. Classification rules on a closed bar:
//
//   body       = |close - open|
//   upper_wick = high - max(open, close)
//   lower_wick = min(open, close) - low
//
//   pinbar <=> body <= 0.33 * (high - low)
//              and one wick >= 2 * body
//              and the other wick <= body
//
// The side with the long wick names the kind: a long lower wick rejects
// lower prices (bullish), a long upper wick rejects higher prices (bearish).
// =============================================================================

use crate::market_data::Bar;
use crate::types::PinbarKind;

/// Maximum body size as a fraction of the full range.
const MAX_BODY_FRACTION: f64 = 0.33;

/// Minimum long-wick length as a multiple of the body.
const MIN_WICK_BODY_RATIO: f64 = 2.0;

/// Classify a closed bar as a pinbar, if it is one.
pub fn classify(bar: &Bar) -> Option<PinbarKind> {
    let range = bar.range();
    if range <= 0.0 || !range.is_finite() {
        return None;
    }

    let body = (bar.close - bar.open).abs();
    let upper_wick = bar.high - bar.open.max(bar.close);
    let lower_wick = bar.open.min(bar.close) - bar.low;

    if body > MAX_BODY_FRACTION * range {
        return None;
    }

    if lower_wick >= MIN_WICK_BODY_RATIO * body && upper_wick <= body {
        return Some(PinbarKind::Bullish);
    }
    if upper_wick >= MIN_WICK_BODY_RATIO * body && lower_wick <= body {
        return Some(PinbarKind::Bearish);
    }
    None
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            ts_ms: 0,
            open,
            high,
            low,
            close,
            volume: 100.0,
            is_closed: true,
        }
    }

    #[test]
    fn hammer_is_bullish() {
        // Long lower wick, tiny body near the top.
        let b = bar(100.0, 100.6, 97.0, 100.5);
        assert_eq!(classify(&b), Some(PinbarKind::Bullish));
    }

    #[test]
    fn shooting_star_is_bearish() {
        // Long upper wick, tiny body near the bottom.
        let b = bar(100.0, 103.0, 99.8, 99.9);
        assert_eq!(classify(&b), Some(PinbarKind::Bearish));
    }

    #[test]
    fn full_body_candle_is_not_a_pinbar() {
        let b = bar(100.0, 103.0, 99.9, 102.9);
        assert_eq!(classify(&b), None);
    }

    #[test]
    fn two_long_wicks_is_not_a_pinbar() {
        // Doji with symmetric long wicks: neither wick is <= body.
        let b = bar(100.0, 102.0, 98.0, 100.1);
        assert_eq!(classify(&b), None);
    }

    #[test]
    fn flat_bar_is_not_a_pinbar() {
        let b = bar(100.0, 100.0, 100.0, 100.0);
        assert_eq!(classify(&b), None);
    }

    #[test]
    fn small_body_but_short_wick_is_not_a_pinbar() {
        // Body 0.2, lower wick 0.3 (< 2 * body), upper wick 0.3.
        let b = bar(100.0, 100.5, 99.7, 100.2);
        assert_eq!(classify(&b), None);
    }
}
