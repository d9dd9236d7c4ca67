// =============================================================================
// Signal Store — durable append-only audit log with a uniqueness constraint
// =============================================================================
//
// SQLite-backed table keyed by (plan_id, state, timestamp_ms). The unique
// index is the single cross-instrument serialization point of the engine:
// concurrent writers race on the insert and exactly one wins.
//
// WAL mode keeps readers unblocked during writes. The connection sits behind
// a mutex; every operation is one short round trip.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode};
use tracing::info;

use crate::errors::StoreError;
use crate::signals::record::{SignalKey, SignalRecord, SignalState};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS signals (
    plan_id      TEXT    NOT NULL,
    state        TEXT    NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    payload      TEXT    NOT NULL,
    created_at   INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    UNIQUE(plan_id, state, timestamp_ms)
);

CREATE INDEX IF NOT EXISTS idx_signals_plan
    ON signals(plan_id, timestamp_ms);
"#;

/// Durable signal store. Cheap to clone behind an `Arc`.
pub struct SignalStore {
    conn: Mutex<Connection>,
}

impl SignalStore {
    /// Open (creating if necessary) an on-disk store.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        info!(path = %path.display(), "signal store opened");
        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
        }))
    }

    /// In-memory store for tests and dry runs.
    pub fn open_in_memory() -> Result<Arc<Self>, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
        }))
    }

    /// Insert one signal. A unique-constraint violation maps to
    /// [`StoreError::Duplicate`]; everything else is a durability failure.
    pub fn insert(&self, record: &SignalRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record).map_err(|e| {
            StoreError::Sqlite(rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
        })?;

        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO signals (plan_id, state, timestamp_ms, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.plan_id,
                record.state.as_str(),
                record.timestamp_ms,
                payload
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate {
                    plan_id: record.plan_id.clone(),
                    state: record.state.as_str().to_string(),
                    timestamp_ms: record.timestamp_ms,
                })
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// All signals for one plan, oldest first.
    pub fn list_by_plan(&self, plan_id: &str) -> Result<Vec<SignalRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT payload FROM signals WHERE plan_id = ?1 ORDER BY timestamp_ms")?;
        let rows = stmt.query_map(params![plan_id], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for payload in rows {
            let payload = payload?;
            if let Ok(record) = serde_json::from_str::<SignalRecord>(&payload) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Number of key triples occurring more than once. Always zero under
    /// correct operation; tests assert on it.
    pub fn count_duplicates(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM (
                 SELECT plan_id FROM signals
                 GROUP BY plan_id, state, timestamp_ms
                 HAVING COUNT(*) > 1
             )",
            [],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(count)
    }

    /// Every key triple in the store. Seeds the emitter's in-memory set on
    /// startup so idempotency survives restarts.
    pub fn known_keys(&self) -> Result<Vec<SignalKey>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT plan_id, state, timestamp_ms FROM signals")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut keys = Vec::new();
        for row in rows {
            let (plan_id, state, timestamp_ms) = row?;
            let state = match state.as_str() {
                "triggered" => SignalState::Triggered,
                "invalid" => SignalState::Invalid,
                "expired" => SignalState::Expired,
                _ => continue,
            };
            keys.push(SignalKey {
                plan_id,
                state,
                timestamp_ms,
            });
        }
        Ok(keys)
    }
}

// =============================================================================
// Tests
// =============================================================================
