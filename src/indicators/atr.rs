// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// True Range (TR) of each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the smoothed average of TR using Wilder's method:
//   ATR_0 = SMA of the first `period` TR values
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
// =============================================================================

use crate::market_data::Bar;

/// Compute the most recent ATR value over a slice of closed bars (oldest
/// first) using Wilder's smoothing.
///
/// Returns `None` when `period` is zero, fewer than `period + 1` bars exist
/// (each TR needs the preceding close), or any intermediate value is
/// non-finite.
pub fn calculate_atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let tr_values: Vec<f64> = bars
        .windows(2)
        .map(|pair| pair[1].true_range(Some(pair[0].close)))
        .collect();

    let period_f = period as f64;
    let mut atr = tr_values[..period].iter().sum::<f64>() / period_f;
    for &tr in &tr_values[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
    }

    atr.is_finite().then_some(atr)
}

/// ATR expressed as a percentage of the latest close. Comparable across
/// instruments with different price scales.
pub fn calculate_natr_pct(bars: &[Bar], period: usize) -> Option<f64> {
    let atr = calculate_atr(bars, period)?;
    let last_close = bars.last()?.close;
    if last_close <= 0.0 {
        return None;
    }
    Some((atr / last_close) * 100.0)
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
    fn period_zero_is_none() {
        let bars = vec![bar(100.0, 105.0, 95.0, 102.0); 20];
        assert!(calculate_atr(&bars, 0).is_none());
    }

    #[test]
    fn insufficient_data_is_none() {
        let bars = vec![bar(100.0, 105.0, 95.0, 102.0); 10];
        assert!(calculate_atr(&bars, 14).is_none());
    }

    #[test]
    fn exact_minimum_data() {
        // period=3 needs 4 bars for 3 TR values.
        let bars = vec![
            bar(100.0, 102.0, 98.0, 101.0),
            bar(101.0, 104.0, 99.0, 103.0),
            bar(103.0, 106.0, 100.0, 105.0),
            bar(105.0, 108.0, 102.0, 107.0),
        ];
        let atr = calculate_atr(&bars, 3).unwrap();
        assert!(atr > 0.0 && atr.is_finite());
    }

    #[test]
    fn constant_range_converges() {
        // Every bar spans 10 with close at midpoint: ATR approaches 10.
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.1;
                bar(base, base + 5.0, base - 5.0, base)
            })
            .collect();
        let atr = calculate_atr(&bars, 14).unwrap();
        assert!((atr - 10.0).abs() < 1.0, "expected near 10.0, got {atr}");
    }

    #[test]
    fn gap_enters_via_prev_close() {
        // |H - prevClose| dominates the first TR after a gap up.
        let bars = vec![
            bar(100.0, 105.0, 95.0, 95.0),
            bar(110.0, 115.0, 108.0, 112.0),
            bar(112.0, 118.0, 110.0, 115.0),
            bar(115.0, 120.0, 113.0, 118.0),
        ];
        let atr = calculate_atr(&bars, 3).unwrap();
        assert!(atr > 7.0, "ATR should reflect the gap, got {atr}");
    }

    #[test]
    fn nan_input_is_none() {
        let bars = vec![
            bar(100.0, 105.0, 95.0, 100.0),
            bar(100.0, f64::NAN, 95.0, 100.0),
            bar(100.0, 105.0, 95.0, 100.0),
            bar(100.0, 105.0, 95.0, 100.0),
        ];
        assert!(calculate_atr(&bars, 3).is_none());
    }

    #[test]
    fn natr_is_percent_of_close() {
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64;
                bar(base, base + 3.0, base - 3.0, base + 1.0)
            })
            .collect();
        let atr = calculate_atr(&bars, 14).unwrap();
        let natr = calculate_natr_pct(&bars, 14).unwrap();
        let last_close = bars.last().unwrap().close;
        assert!((natr - atr / last_close * 100.0).abs() < 1e-9);
    }

    #[test]
    fn natr_none_on_zero_close() {
        let mut bars: Vec<Bar> = (0..20)
            .map(|_| bar(100.0, 105.0, 95.0, 100.0))
            .collect();
        bars.last_mut().unwrap().close = 0.0;
        bars.last_mut().unwrap().low = 0.0;
        bars.last_mut().unwrap().open = 0.0;
        assert!(calculate_natr_pct(&bars, 14).is_none());
    }
}
