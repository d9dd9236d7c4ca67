// =============================================================================
// Signal Emitter — exactly-once emission over store + in-memory dedup
// =============================================================================
//
// Emission protocol, in order:
//   1. Compute the key (plan_id, state, timestamp_ms).
//   2. Hit the in-memory set; present => Duplicate.
//   3. Insert into the store; unique-constraint violation => cache the key
//      and return Duplicate.
//   4. Insert succeeded: cache the key, then dispatch to every sink.
//   5. Sink failures are logged and isolated; the store row is the truth.
//
// The in-memory set is a cache of completed keys, seeded from the store at
// startup so idempotency survives restarts. A durability failure is returned
// to the caller untouched: nothing is cached, nothing is dispatched, and the
// same record may be retried later.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::errors::StoreError;
use crate::signals::record::{SignalKey, SignalRecord};
use crate::signals::sinks::SignalSink;
use crate::signals::store::SignalStore;

/// Result of an emission attempt that reached a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// First time this key was seen: persisted and dispatched.
    Emitted,
    /// The key already exists (here or in a previous run): nothing done.
    Duplicate,
}

pub struct SignalEmitter {
    store: Arc<SignalStore>,
    seen: Mutex<HashSet<SignalKey>>,
    sinks: Vec<Box<dyn SignalSink>>,
}

impl SignalEmitter {
    /// Build an emitter, seeding the dedup cache from the store.
    pub fn new(
        store: Arc<SignalStore>,
        sinks: Vec<Box<dyn SignalSink>>,
    ) -> Result<Self, StoreError> {
        let seen: HashSet<SignalKey> = store.known_keys()?.into_iter().collect();
        info!(
            seeded = seen.len(),
            sinks = sinks.len(),
            "signal emitter ready"
        );
        Ok(Self {
            store,
            seen: Mutex::new(seen),
            sinks,
        })
    }

    /// Emit a signal unless its key has been emitted before.
    ///
    /// Returns `Err` only on a durability failure, in which case no state
    /// was recorded anywhere and the caller should retry the same record.
    pub fn emit_if_new(&self, record: &SignalRecord) -> Result<EmitOutcome, StoreError> {
        let key = record.key();

        if self.seen.lock().contains(&key) {
            debug!(plan_id = %record.plan_id, state = %record.state, "duplicate signal (cached)");
            return Ok(EmitOutcome::Duplicate);
        }

        match self.store.insert(record) {
            Ok(()) => {
                self.seen.lock().insert(key);
                self.dispatch(record);
                info!(
                    plan_id = %record.plan_id,
                    state = %record.state,
                    ts = record.timestamp_ms,
                    score = record.strength_score,
                    "signal emitted"
                );
                Ok(EmitOutcome::Emitted)
            }
            Err(e) if e.is_duplicate() => {
                // Another worker (or a previous run) owns this key.
                self.seen.lock().insert(key);
                debug!(plan_id = %record.plan_id, state = %record.state, "duplicate signal (store)");
                Ok(EmitOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }

    /// Deliver to every sink, isolating failures.
    fn dispatch(&self, record: &SignalRecord) {
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(record) {
                warn!(
                    sink = sink.name(),
                    plan_id = %record.plan_id,
                    error = %e,
                    "sink delivery failed"
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
