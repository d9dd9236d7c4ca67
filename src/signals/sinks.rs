// =============================================================================
// Delivery Sinks — webhook, file, stdout
// =============================================================================
//
// Sinks receive each emitted signal exactly once, after the store insert has
// succeeded. Delivery is fire-and-forget from the engine's perspective: a
// failing sink is logged by the emitter and never touches plan state or the
// store.
// =============================================================================

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::errors::DeliveryError;
use crate::signals::record::SignalRecord;

/// A signal delivery target.
pub trait SignalSink: Send + Sync {
    fn name(&self) -> &str;

    fn deliver(&self, record: &SignalRecord) -> Result<(), DeliveryError>;
}

// ---------------------------------------------------------------------------
// Stdout
// ---------------------------------------------------------------------------

/// Writes one JSON line per signal to standard output.
pub struct StdoutSink;

impl SignalSink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    fn deliver(&self, record: &SignalRecord) -> Result<(), DeliveryError> {
        let line = serde_json::to_string(record)?;
        println!("{line}");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File appender
// ---------------------------------------------------------------------------

/// Appends one JSON line per signal to a log file.
pub struct FileSink {
    path: String,
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeliveryError> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.display().to_string(),
            file: Mutex::new(file),
        })
    }
}

impl SignalSink for FileSink {
    fn name(&self) -> &str {
        &self.path
    }

    fn deliver(&self, record: &SignalRecord) -> Result<(), DeliveryError> {
        let line = serde_json::to_string(record)?;
        let mut file = self.file.lock();
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP webhook
// ---------------------------------------------------------------------------

/// POSTs each signal as JSON to a configured URL.
pub struct WebhookSink {
    url: String,
    client: reqwest::blocking::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl SignalSink for WebhookSink {
    fn name(&self) -> &str {
        &self.url
    }

    fn deliver(&self, record: &SignalRecord) -> Result<(), DeliveryError> {
        let response = self.client.post(&self.url).json(record).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::HttpStatus(status.as_u16()));
        }
        debug!(url = %self.url, plan_id = %record.plan_id, "webhook delivered");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory (tests)
// ---------------------------------------------------------------------------

/// Collects delivered signals in memory. Used by tests to count dispatches.
#[derive(Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<SignalRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<SignalRecord> {
        self.delivered.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.lock().is_empty()
    }
}

impl SignalSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn deliver(&self, record: &SignalRecord) -> Result<(), DeliveryError> {
        self.delivered.lock().push(record.clone());
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::record::{
        SignalMetrics, SignalRuntime, SignalState, PROTOCOL_VERSION,
    };

    fn record() -> SignalRecord {
        SignalRecord {
            plan_id: "p1".to_string(),
            state: SignalState::Triggered,
            timestamp_ms: 1000,
            runtime: SignalRuntime::default(),
            last_price: 100.0,
            metrics: SignalMetrics::default(),
            strength_score: 65,
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.jsonl");

        let sink = FileSink::open(&path).unwrap();
        sink.deliver(&record()).unwrap();
        sink.deliver(&record()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: SignalRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.plan_id, "p1");
    }

    #[test]
    fn memory_sink_counts_dispatches() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.deliver(&record()).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.delivered()[0].strength_score, 65);
    }
}
