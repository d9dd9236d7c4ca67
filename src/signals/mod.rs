// =============================================================================
// Signals Module
// =============================================================================
//
// Terminal-state signal pipeline for the breakout engine:
// - Wire/persisted record shape (`record`)
// - Strength scoring for triggered signals (`score`)
// - Durable audit store with the uniqueness constraint (`store`)
// - Exactly-once emitter over store + in-memory dedup (`emitter`)
// - Delivery sinks: webhook, file, stdout (`sinks`)

pub mod emitter;
pub mod record;
pub mod score;
pub mod sinks;
pub mod store;

pub use emitter::{EmitOutcome, SignalEmitter};
pub use record::{SignalKey, SignalRecord, SignalState};
pub use sinks::SignalSink;
pub use store::SignalStore;
