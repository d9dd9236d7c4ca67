// =============================================================================
// Data Normalizer — raw exchange payloads to typed bars and books
// =============================================================================
//
// Payloads arrive wrapped in a `{code, msg, data}` envelope. Candlestick
// `data` is an array of 9-tuples with numeric fields encoded as strings:
//
//   [ts_ms, open, high, low, close, vol_base, vol_quote, vol_quote_alt, confirm]
//
// Book `data` carries `{asks, bids, ts}` with levels `[price, size, _, _]`.
//
// Structural problems (bad envelope, wrong arity, unparseable numbers) fail
// the whole payload. Per-bar semantic problems (inconsistent OHLC, spike
// rejection) drop only the offending bar; the rest of the payload survives.
// =============================================================================

use serde_json::Value;

use crate::config::SpikeFilterParams;
use crate::errors::ParseError;
use crate::market_data::{Bar, BookLevel, BookSnapshot};

/// Number of fields in one candlestick row.
const CANDLE_ROW_LEN: usize = 9;

/// Result of candlestick normalization: accepted bars in ascending timestamp
/// order plus the per-bar rejections (for the caller to log).
#[derive(Debug, Default)]
pub struct NormalizedCandles {
    pub bars: Vec<Bar>,
    pub rejected: Vec<ParseError>,
}

/// Context for the spike filter: the freshest trade price and ATR known for
/// the instrument *before* this payload is applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpikeContext {
    pub last_price: Option<f64>,
    pub atr: Option<f64>,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Unwrap the `{code, msg, data}` envelope, verifying a success code.
fn envelope_data(payload: &Value) -> Result<&Value, ParseError> {
    let code = match payload.get("code") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(ParseError::MissingField("code")),
    };
    if code != "0" {
        let msg = payload
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        return Err(ParseError::Exchange { code, msg });
    }
    payload.get("data").ok_or(ParseError::MissingField("data"))
}

// ---------------------------------------------------------------------------
// Field parsing helpers
// ---------------------------------------------------------------------------

/// Exchanges send numeric values as JSON strings; accept raw numbers too.
fn parse_f64(val: &Value, field: &'static str) -> Result<f64, ParseError> {
    match val {
        Value::String(s) => s.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
            field,
            value: s.clone(),
        }),
        Value::Number(n) => n.as_f64().ok_or_else(|| ParseError::InvalidNumber {
            field,
            value: n.to_string(),
        }),
        other => Err(ParseError::InvalidNumber {
            field,
            value: other.to_string(),
        }),
    }
}

fn parse_i64(val: &Value, field: &'static str) -> Result<i64, ParseError> {
    match val {
        Value::String(s) => s.parse::<i64>().map_err(|_| ParseError::InvalidNumber {
            field,
            value: s.clone(),
        }),
        Value::Number(n) => n.as_i64().ok_or_else(|| ParseError::InvalidNumber {
            field,
            value: n.to_string(),
        }),
        other => Err(ParseError::InvalidNumber {
            field,
            value: other.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Candlesticks
// ---------------------------------------------------------------------------

/// Parse a candlestick payload into bars, ascending by timestamp.
///
/// `is_closed` comes from the confirm flag (`"1"` means closed). Bars that
/// fail OHLC or volume consistency are dropped into `rejected` rather than
/// failing the payload.
pub fn normalize_candlesticks(payload: &Value) -> Result<NormalizedCandles, ParseError> {
    let data = envelope_data(payload)?;
    let rows = data.as_array().ok_or(ParseError::MissingField("data"))?;

    let mut out = NormalizedCandles {
        bars: Vec::with_capacity(rows.len()),
        rejected: Vec::new(),
    };

    for row in rows {
        let fields = row.as_array().ok_or(ParseError::MissingField("data[]"))?;
        if fields.len() < CANDLE_ROW_LEN {
            return Err(ParseError::InvalidBar {
                ts_ms: 0,
                detail: format!("candle row has {} fields, expected {CANDLE_ROW_LEN}", fields.len()),
            });
        }

        let ts_ms = parse_i64(&fields[0], "ts")?;
        let bar = Bar {
            ts_ms,
            open: parse_f64(&fields[1], "open")?,
            high: parse_f64(&fields[2], "high")?,
            low: parse_f64(&fields[3], "low")?,
            close: parse_f64(&fields[4], "close")?,
            volume: parse_f64(&fields[5], "volume")?,
            is_closed: fields[8].as_str() == Some("1") || fields[8] == Value::from(1),
        };

        match bar.validate() {
            Ok(()) => out.bars.push(bar),
            Err(e) => out.rejected.push(e),
        }
    }

    out.bars.sort_by_key(|b| b.ts_ms);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Spike filter
// ---------------------------------------------------------------------------

/// Reject a candle whose close jumped implausibly far from the last trade
/// price. Uses `atr_multiplier * ATR` when ATR is available, otherwise
/// `fallback_pct * last_price`. With no last price at all the filter has no
/// reference and accepts the bar.
pub fn check_spike(
    bar: &Bar,
    ctx: &SpikeContext,
    params: &SpikeFilterParams,
) -> Result<(), ParseError> {
    if !params.enabled {
        return Ok(());
    }
    let last_price = match ctx.last_price {
        Some(p) if p > 0.0 => p,
        _ => return Ok(()),
    };

    let limit = match ctx.atr {
        Some(atr) if atr > 0.0 => params.atr_multiplier * atr,
        _ => params.fallback_pct * last_price,
    };

    if (bar.close - last_price).abs() > limit {
        return Err(ParseError::PriceSpike {
            ts_ms: bar.ts_ms,
            close: bar.close,
            last_price,
            limit,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Order book
// ---------------------------------------------------------------------------

/// Parse a book payload into a [`BookSnapshot`], verifying level ordering
/// (bids descending, asks ascending), non-negative sizes, and an uncrossed
/// top of book.
pub fn normalize_orderbook(payload: &Value) -> Result<BookSnapshot, ParseError> {
    let data = envelope_data(payload)?;

    // The book document is sometimes wrapped in a single-element array.
    let doc = match data {
        Value::Array(items) => items.first().ok_or(ParseError::MissingField("data[0]"))?,
        other => other,
    };

    let ts_ms = parse_i64(doc.get("ts").ok_or(ParseError::MissingField("ts"))?, "ts")?;
    let bids = parse_levels(doc.get("bids").ok_or(ParseError::MissingField("bids"))?, "bids", ts_ms)?;
    let asks = parse_levels(doc.get("asks").ok_or(ParseError::MissingField("asks"))?, "asks", ts_ms)?;

    for pair in bids.windows(2) {
        if pair[0].price <= pair[1].price {
            return Err(ParseError::InvalidBook {
                ts_ms,
                detail: format!("bids not descending: {} then {}", pair[0].price, pair[1].price),
            });
        }
    }
    for pair in asks.windows(2) {
        if pair[0].price >= pair[1].price {
            return Err(ParseError::InvalidBook {
                ts_ms,
                detail: format!("asks not ascending: {} then {}", pair[0].price, pair[1].price),
            });
        }
    }
    if let (Some(bid), Some(ask)) = (bids.first(), asks.first()) {
        if bid.price >= ask.price {
            return Err(ParseError::InvalidBook {
                ts_ms,
                detail: format!("crossed book: bid {} >= ask {}", bid.price, ask.price),
            });
        }
    }

    Ok(BookSnapshot { ts_ms, bids, asks })
}

fn parse_levels(
    val: &Value,
    field: &'static str,
    ts_ms: i64,
) -> Result<Vec<BookLevel>, ParseError> {
    let rows = val.as_array().ok_or(ParseError::MissingField(field))?;
    let mut levels = Vec::with_capacity(rows.len());

    for row in rows {
        let cells = row.as_array().ok_or(ParseError::MissingField(field))?;
        if cells.len() < 2 {
            return Err(ParseError::InvalidBook {
                ts_ms,
                detail: format!("{field} level has {} fields, expected >= 2", cells.len()),
            });
        }
        let price = parse_f64(&cells[0], "price")?;
        let size = parse_f64(&cells[1], "size")?;
        if !price.is_finite() || price <= 0.0 {
            return Err(ParseError::InvalidBook {
                ts_ms,
                detail: format!("{field} level has non-positive price {price}"),
            });
        }
        if !size.is_finite() || size < 0.0 {
            return Err(ParseError::InvalidBook {
                ts_ms,
                detail: format!("{field} level has negative size {size}"),
            });
        }
        levels.push(BookLevel { price, size });
    }
    Ok(levels)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candle_payload(rows: Vec<Value>) -> Value {
        json!({ "code": "0", "msg": "", "data": rows })
    }

    fn row(ts: i64, o: f64, h: f64, l: f64, c: f64, v: f64, confirm: &str) -> Value {
        json!([
            ts.to_string(),
            o.to_string(),
            h.to_string(),
            l.to_string(),
            c.to_string(),
            v.to_string(),
            "0",
            "0",
            confirm
        ])
    }

    #[test]
    fn candles_parse_and_sort_ascending() {
        // Exchange order is newest-first; output must be ascending.
        let payload = candle_payload(vec![
            row(120_000, 99.1, 100.9, 99.0, 100.7, 3000.0, "0"),
            row(60_000, 99.0, 100.2, 98.9, 99.1, 1000.0, "1"),
        ]);
        let out = normalize_candlesticks(&payload).unwrap();
        assert_eq!(out.bars.len(), 2);
        assert!(out.rejected.is_empty());
        assert_eq!(out.bars[0].ts_ms, 60_000);
        assert!(out.bars[0].is_closed);
        assert!(!out.bars[1].is_closed);
        assert!((out.bars[1].close - 100.7).abs() < f64::EPSILON);
    }

    #[test]
    fn error_envelope_rejected() {
        let payload = json!({ "code": "51001", "msg": "instrument not found", "data": [] });
        let err = normalize_candlesticks(&payload).unwrap_err();
        assert!(matches!(err, ParseError::Exchange { .. }));
    }

    #[test]
    fn short_row_fails_payload() {
        let payload = candle_payload(vec![json!(["60000", "99", "100"])]);
        assert!(normalize_candlesticks(&payload).is_err());
    }

    #[test]
    fn unparseable_number_fails_payload() {
        let payload = candle_payload(vec![row(60_000, 99.0, 100.2, 98.9, 99.1, 1000.0, "1")]);
        let mut bad = payload.clone();
        bad["data"][0][4] = json!("not-a-price");
        assert!(matches!(
            normalize_candlesticks(&bad).unwrap_err(),
            ParseError::InvalidNumber { field: "close", .. }
        ));
    }

    #[test]
    fn inconsistent_ohlc_drops_only_that_bar() {
        let payload = candle_payload(vec![
            row(60_000, 99.0, 98.0, 98.9, 99.1, 1000.0, "1"), // high < open
            row(120_000, 99.1, 100.9, 99.0, 100.7, 3000.0, "1"),
        ]);
        let out = normalize_candlesticks(&payload).unwrap();
        assert_eq!(out.bars.len(), 1);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.bars[0].ts_ms, 120_000);
    }

    #[test]
    fn spike_filter_uses_atr_when_available() {
        let params = SpikeFilterParams::default();
        let bar = Bar {
            ts_ms: 1,
            open: 100.0,
            high: 112.0,
            low: 99.0,
            close: 111.0,
            volume: 10.0,
            is_closed: true,
        };
        // limit = 3.0 * 2.0 = 6.0, |111 - 100| = 11 > 6 => spike.
        let ctx = SpikeContext {
            last_price: Some(100.0),
            atr: Some(2.0),
        };
        let err = check_spike(&bar, &ctx, &params).unwrap_err();
        assert!(err.is_price_spike());
    }

    #[test]
    fn spike_filter_falls_back_to_pct() {
        let params = SpikeFilterParams::default();
        let bar = Bar {
            ts_ms: 1,
            open: 100.0,
            high: 107.0,
            low: 99.0,
            close: 106.0,
            volume: 10.0,
            is_closed: true,
        };
        // No ATR: limit = 0.05 * 100 = 5.0, |106 - 100| = 6 > 5 => spike.
        let ctx = SpikeContext {
            last_price: Some(100.0),
            atr: None,
        };
        assert!(check_spike(&bar, &ctx, &params).is_err());

        // Within the fallback band passes.
        let calm = Bar { close: 104.0, high: 105.0, ..bar };
        assert!(check_spike(&calm, &ctx, &params).is_ok());
    }

    #[test]
    fn spike_filter_inert_without_reference_price() {
        let params = SpikeFilterParams::default();
        let bar = Bar {
            ts_ms: 1,
            open: 100.0,
            high: 1000.0,
            low: 99.0,
            close: 999.0,
            volume: 10.0,
            is_closed: true,
        };
        assert!(check_spike(&bar, &SpikeContext::default(), &params).is_ok());
    }

    #[test]
    fn spike_filter_disabled_passes_everything() {
        let params = SpikeFilterParams {
            enabled: false,
            ..SpikeFilterParams::default()
        };
        let bar = Bar {
            ts_ms: 1,
            open: 100.0,
            high: 1000.0,
            low: 99.0,
            close: 999.0,
            volume: 10.0,
            is_closed: true,
        };
        let ctx = SpikeContext {
            last_price: Some(100.0),
            atr: Some(1.0),
        };
        assert!(check_spike(&bar, &ctx, &params).is_ok());
    }

    fn book_payload() -> Value {
        json!({
            "code": "0",
            "msg": "",
            "data": [{
                "ts": "1700000000000",
                "bids": [["99.5", "3.0", "0", "1"], ["99.0", "1.0", "0", "1"]],
                "asks": [["100.5", "1.5", "0", "1"], ["101.0", "2.0", "0", "1"]]
            }]
        })
    }

    #[test]
    fn book_parses() {
        let snap = normalize_orderbook(&book_payload()).unwrap();
        assert_eq!(snap.ts_ms, 1_700_000_000_000);
        assert_eq!(snap.best_bid(), Some(99.5));
        assert_eq!(snap.best_ask(), Some(100.5));
        assert_eq!(snap.bids.len(), 2);
    }

    #[test]
    fn unsorted_bids_rejected() {
        let mut payload = book_payload();
        payload["data"][0]["bids"] = json!([["99.0", "1.0"], ["99.5", "3.0"]]);
        let err = normalize_orderbook(&payload).unwrap_err();
        assert!(matches!(err, ParseError::InvalidBook { .. }));
    }

    #[test]
    fn crossed_book_rejected() {
        let mut payload = book_payload();
        payload["data"][0]["asks"] = json!([["99.4", "1.0"]]);
        assert!(normalize_orderbook(&payload).is_err());
    }

    #[test]
    fn negative_size_rejected() {
        let mut payload = book_payload();
        payload["data"][0]["asks"] = json!([["100.5", "-1.0"]]);
        assert!(normalize_orderbook(&payload).is_err());
    }
}
