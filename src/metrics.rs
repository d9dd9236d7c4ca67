// =============================================================================
// Metrics Calculator — lazy per-tick indicator snapshot
// =============================================================================
//
// Derives ATR, NATR, RVOL, pinbar, book imbalance, and the order-book sweep
// signal from a per-instrument data store. Computed once per tick by the
// coordinator and handed read-only to every plan on the instrument.
//
// Indicator inputs are closed bars only; the developing bar never leaks into
// ATR or RVOL. Each snapshot carries the timestamp of the most recent closed
// bar it consumed.
// =============================================================================

use serde::Serialize;

use crate::config::ParamSet;
use crate::indicators::{atr, pinbar, rvol};
use crate::market_data::store::InstrumentStore;
use crate::market_data::BookSnapshot;
use crate::types::{PinbarKind, SweepSide};

/// One tick's derived indicator view for an instrument.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Timestamp of the most recent closed bar used, if any.
    pub ts_ms: Option<i64>,
    pub atr: Option<f64>,
    pub natr_pct: Option<f64>,
    pub rvol: Option<f64>,
    /// Pinbar classification of the most recent closed bar.
    pub pinbar: Option<PinbarKind>,
    /// Depth imbalance of the latest book over the configured levels.
    pub imbalance: Option<f64>,
    /// Sweep signal derived from successive book snapshots.
    pub sweep: Option<SweepSide>,
}

impl MetricsSnapshot {
    /// Build the snapshot for `timeframe` from the store's current state.
    pub fn compute(store: &InstrumentStore, timeframe: &str, params: &ParamSet) -> Self {
        let mut snap = Self::default();

        if let Some(series) = store.series(timeframe) {
            let closed = series.closed_bars();
            snap.ts_ms = closed.last().map(|b| b.ts_ms);
            snap.atr = atr::calculate_atr(&closed, params.atr_params.period);
            snap.natr_pct = atr::calculate_natr_pct(&closed, params.atr_params.period);
            snap.rvol = rvol::calculate_rvol(
                &series.volume_history(),
                params.volume_params.rvol_period,
            );
            snap.pinbar = closed.last().and_then(pinbar::classify);
        }

        if let Some(book) = store.book() {
            snap.imbalance = Some(book.imbalance(params.orderbook_params.depth_levels));
            snap.sweep = detect_sweep(
                store.prev_book(),
                book,
                params.orderbook_params.depth_levels,
                params.orderbook_params.depletion_threshold,
            );
        }

        snap
    }
}

/// Compare top-of-book depth between successive snapshots. A sweep is
/// declared on the side whose depth depleted by more than `threshold`
/// (fractional); when both sides deplete, the harder-hit side wins.
fn detect_sweep(
    prev: Option<&BookSnapshot>,
    current: &BookSnapshot,
    levels: usize,
    threshold: f64,
) -> Option<SweepSide> {
    let prev = prev?;

    let bid_depletion = depletion(prev.bid_depth(levels), current.bid_depth(levels));
    let ask_depletion = depletion(prev.ask_depth(levels), current.ask_depth(levels));

    let bid_swept = bid_depletion > threshold;
    let ask_swept = ask_depletion > threshold;

    match (bid_swept, ask_swept) {
        (true, true) => {
            if bid_depletion >= ask_depletion {
                Some(SweepSide::Bid)
            } else {
                Some(SweepSide::Ask)
            }
        }
        (true, false) => Some(SweepSide::Bid),
        (false, true) => Some(SweepSide::Ask),
        (false, false) => None,
    }
}

/// Fractional depth loss from `prev` to `current`; zero when depth grew or
/// there was nothing to deplete.
fn depletion(prev: f64, current: f64) -> f64 {
    if prev <= 0.0 {
        return 0.0;
    }
    ((prev - current) / prev).max(0.0)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{Bar, BookLevel};

    fn bar(ts_ms: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            ts_ms,
            open,
            high,
            low,
            close,
            volume,
            is_closed: true,
        }
    }

    fn book(ts_ms: i64, bid_size: f64, ask_size: f64) -> BookSnapshot {
        BookSnapshot {
            ts_ms,
            bids: vec![BookLevel { price: 99.0, size: bid_size }],
            asks: vec![BookLevel { price: 101.0, size: ask_size }],
        }
    }

    fn params() -> ParamSet {
        let mut p = ParamSet::default();
        p.atr_params.period = 3;
        p.volume_params.rvol_period = 3;
        p
    }

    #[test]
    fn empty_store_yields_empty_snapshot() {
        let store = InstrumentStore::new("X", 20);
        let snap = MetricsSnapshot::compute(&store, "1m", &params());
        assert!(snap.ts_ms.is_none());
        assert!(snap.atr.is_none());
        assert!(snap.rvol.is_none());
        assert!(snap.sweep.is_none());
    }

    #[test]
    fn too_few_closed_bars_keeps_metrics_none() {
        let mut store = InstrumentStore::new("X", 20);
        for i in 0..3 {
            store.apply_bar("1m", bar(i * 60_000, 100.0, 101.0, 99.0, 100.0, 500.0));
        }
        let snap = MetricsSnapshot::compute(&store, "1m", &params());
        // 3 closed bars: ATR(3) needs 4, RVOL(3) needs 4.
        assert!(snap.atr.is_none());
        assert!(snap.rvol.is_none());
        assert_eq!(snap.ts_ms, Some(120_000));
    }

    #[test]
    fn metrics_populate_once_lookbacks_fill() {
        let mut store = InstrumentStore::new("X", 20);
        for i in 0..6 {
            store.apply_bar("1m", bar(i * 60_000, 100.0, 102.0, 98.0, 100.0, 500.0));
        }
        // Final bar doubles the volume.
        store.apply_bar("1m", bar(6 * 60_000, 100.0, 102.0, 98.0, 100.0, 1000.0));

        let snap = MetricsSnapshot::compute(&store, "1m", &params());
        assert!((snap.atr.unwrap() - 4.0).abs() < 1e-9);
        assert!((snap.natr_pct.unwrap() - 4.0).abs() < 1e-9);
        assert!((snap.rvol.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn developing_bar_excluded_from_indicators() {
        let mut store = InstrumentStore::new("X", 20);
        for i in 0..7 {
            store.apply_bar("1m", bar(i * 60_000, 100.0, 102.0, 98.0, 100.0, 500.0));
        }
        let closed_snap = MetricsSnapshot::compute(&store, "1m", &params());

        // A wild developing bar must not move any indicator.
        let mut developing = bar(7 * 60_000, 100.0, 150.0, 50.0, 149.0, 9999.0);
        developing.is_closed = false;
        store.apply_bar("1m", developing);

        let snap = MetricsSnapshot::compute(&store, "1m", &params());
        assert_eq!(snap.atr, closed_snap.atr);
        assert_eq!(snap.rvol, closed_snap.rvol);
        assert_eq!(snap.ts_ms, closed_snap.ts_ms);
    }

    #[test]
    fn ask_sweep_detected() {
        let mut store = InstrumentStore::new("X", 20);
        store.apply_book(book(1, 10.0, 10.0));
        store.apply_book(book(2, 9.5, 4.0)); // asks lost 60%

        let snap = MetricsSnapshot::compute(&store, "1m", &params());
        assert_eq!(snap.sweep, Some(SweepSide::Ask));
    }

    #[test]
    fn bid_sweep_detected() {
        let mut store = InstrumentStore::new("X", 20);
        store.apply_book(book(1, 10.0, 10.0));
        store.apply_book(book(2, 3.0, 9.0)); // bids lost 70%

        let snap = MetricsSnapshot::compute(&store, "1m", &params());
        assert_eq!(snap.sweep, Some(SweepSide::Bid));
    }

    #[test]
    fn stable_book_is_no_sweep() {
        let mut store = InstrumentStore::new("X", 20);
        store.apply_book(book(1, 10.0, 10.0));
        store.apply_book(book(2, 9.0, 9.0)); // 10% either side

        let snap = MetricsSnapshot::compute(&store, "1m", &params());
        assert!(snap.sweep.is_none());
    }

    #[test]
    fn single_snapshot_is_no_sweep() {
        let mut store = InstrumentStore::new("X", 20);
        store.apply_book(book(1, 10.0, 10.0));

        let snap = MetricsSnapshot::compute(&store, "1m", &params());
        assert!(snap.sweep.is_none());
        assert!(snap.imbalance.is_some());
    }
}
