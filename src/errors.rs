// =============================================================================
// Error taxonomy for the breakout engine
// =============================================================================
//
// Component-level errors are typed so that callers can branch on them; the
// binary edge wraps them in anyhow. The engine itself is recoverable by
// design: a malformed payload drops one tick, a bad plan is rejected at
// admission, a sink failure is logged and isolated. Only a durability failure
// in the signal store is surfaced up to the coordinator.
// =============================================================================

use thiserror::Error;

/// Errors produced while normalizing raw exchange payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload envelope itself could not be decoded.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The exchange returned a non-success envelope.
    #[error("exchange error code {code}: {msg}")]
    Exchange { code: String, msg: String },

    /// A required field is missing from the payload.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A numeric field failed to parse.
    #[error("invalid number in `{field}`: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// OHLC ordering or volume sign constraints violated.
    #[error("inconsistent bar at ts {ts_ms}: {detail}")]
    InvalidBar { ts_ms: i64, detail: String },

    /// Book levels out of order, negative sizes, or a crossed book.
    #[error("inconsistent orderbook at ts {ts_ms}: {detail}")]
    InvalidBook { ts_ms: i64, detail: String },

    /// A candle close jumped further from the last trade price than the
    /// spike filter allows. The offending bar is dropped; ingestion of the
    /// remaining bars in the payload continues.
    #[error("price spike at ts {ts_ms}: close {close} vs last {last_price} (limit {limit})")]
    PriceSpike {
        ts_ms: i64,
        close: f64,
        last_price: f64,
        limit: f64,
    },
}

impl ParseError {
    /// True for the spike-filter rejection variant.
    pub fn is_price_spike(&self) -> bool {
        matches!(self, Self::PriceSpike { .. })
    }
}

/// Errors produced while merging or validating configuration layers.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode config: {0}")]
    Decode(#[from] serde_json::Error),

    /// A merged parameter set failed a validation rule.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Errors produced during plan admission. No partial admission: a plan that
/// fails any check is rejected whole.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("malformed plan: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported entry type `{0}` (only `breakout` is accepted)")]
    UnsupportedEntryType(String),

    #[error("plan `{0}` has no usable trigger level")]
    MissingTriggerLevel(String),

    #[error("plan `{plan_id}` rejected: {source}")]
    InvalidConfig {
        plan_id: String,
        #[source]
        source: ConfigError,
    },

    #[error("plan `{0}` is already admitted")]
    DuplicatePlan(String),
}

/// Errors from the durable signal store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The (plan_id, state, timestamp_ms) triple already exists. Mapped by
    /// the emitter to a `Duplicate` outcome, never propagated further.
    #[error("duplicate signal key ({plan_id}, {state}, {timestamp_ms})")]
    Duplicate {
        plan_id: String,
        state: String,
        timestamp_ms: i64,
    },

    #[error("signal store failure: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Errors from a delivery sink. Always isolated to the sink: logged by the
/// emitter, never allowed to touch plan state or the store.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("webhook delivery failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned status {0}")]
    HttpStatus(u16),

    #[error("file sink failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize signal: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_spike_is_detectable() {
        let err = ParseError::PriceSpike {
            ts_ms: 1,
            close: 110.0,
            last_price: 100.0,
            limit: 5.0,
        };
        assert!(err.is_price_spike());
        assert!(!ParseError::MissingField("data").is_price_spike());
    }

    #[test]
    fn duplicate_store_error_is_detectable() {
        let err = StoreError::Duplicate {
            plan_id: "p1".into(),
            state: "triggered".into(),
            timestamp_ms: 42,
        };
        assert!(err.is_duplicate());
    }

    #[test]
    fn error_messages_name_the_offender() {
        let err = ParseError::InvalidNumber {
            field: "close",
            value: "abc".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("close"));
        assert!(msg.contains("abc"));
    }
}
