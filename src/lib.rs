//! Breakwatch — deterministic breakout trading-plan evaluation engine.
//!
//! A tick-driven pipeline: raw candle/book payloads are normalized and
//! spike-filtered into per-instrument rolling stores, indicators are derived
//! incrementally over closed bars, and each admitted plan runs a breakout
//! lifecycle state machine whose terminal transitions emit exactly-once
//! signals through a durable store and delivery sinks.

pub mod config;
pub mod engine;
pub mod errors;
pub mod indicators;
pub mod market_data;
pub mod metrics;
pub mod plan;
pub mod signals;
pub mod types;

pub use config::{EngineConfig, ParamSet};
pub use engine::Engine;
pub use metrics::MetricsSnapshot;
pub use plan::BreakoutPlan;
pub use signals::{SignalEmitter, SignalRecord, SignalStore};
pub use types::Direction;
