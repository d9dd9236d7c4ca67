// =============================================================================
// Breakwatch — Main Entry Point
// =============================================================================
//
// Wires config, signal store, sinks, and the engine, then replays a JSONL
// tick file through `evaluate_tick`. Each line of the tick file is one tick:
//
//   { "instrument_id": "ETH-USDT-SWAP",
//     "timeframe": "1m",                // optional, defaults to config
//     "candlesticks": { ... },          // optional raw candle payload
//     "orderbook": { ... } }            // optional raw book payload
//
// Plans are loaded from a JSON array file (second argument). Signals go to
// the configured sinks and to the SQLite audit store.
//
// Environment:
//   BREAKWATCH_CONFIG       config file path       (default breakwatch.json)
//   BREAKWATCH_DB           sqlite path            (default signals.db)
//   BREAKWATCH_WEBHOOK_URL  webhook sink           (optional)
//   BREAKWATCH_SIGNAL_LOG   file sink path         (optional)
// =============================================================================

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use breakwatch::config::EngineConfig;
use breakwatch::engine::Engine;
use breakwatch::signals::sinks::{FileSink, StdoutSink, WebhookSink};
use breakwatch::signals::{SignalEmitter, SignalSink, SignalStore};

fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── 1. Config ────────────────────────────────────────────────────────
    let config_path =
        std::env::var("BREAKWATCH_CONFIG").unwrap_or_else(|_| "breakwatch.json".into());
    let config = EngineConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(path = %config_path, error = %e, "failed to load config, using defaults");
        EngineConfig::default()
    });

    // ── 2. Store and sinks ───────────────────────────────────────────────
    let db_path = std::env::var("BREAKWATCH_DB").unwrap_or_else(|_| "signals.db".into());
    let store = SignalStore::open(&db_path).context("failed to open signal store")?;

    let mut sinks: Vec<Box<dyn SignalSink>> = vec![Box::new(StdoutSink)];
    if let Ok(url) = std::env::var("BREAKWATCH_WEBHOOK_URL") {
        sinks.push(Box::new(
            WebhookSink::new(url.as_str()).context("failed to build webhook sink")?,
        ));
        info!(url = %url, "webhook sink enabled");
    }
    if let Ok(path) = std::env::var("BREAKWATCH_SIGNAL_LOG") {
        sinks.push(Box::new(
            FileSink::open(&path).context("failed to open signal log")?,
        ));
        info!(path = %path, "file sink enabled");
    }

    let emitter = Arc::new(SignalEmitter::new(store, sinks)?);
    let engine = Engine::new(&config, emitter)?;

    // ── 3. Plans ─────────────────────────────────────────────────────────
    let mut args = std::env::args().skip(1);
    let ticks_path = args
        .next()
        .context("usage: breakwatch <ticks.jsonl> [plans.json]")?;

    if let Some(plans_path) = args.next() {
        let text = std::fs::read_to_string(&plans_path)
            .with_context(|| format!("failed to read plans from {plans_path}"))?;
        let plans: Vec<Value> =
            serde_json::from_str(&text).context("plans file must be a JSON array")?;

        for mut plan in plans {
            if plan.get("id").is_none() {
                plan["id"] = Value::from(uuid::Uuid::new_v4().to_string());
            }
            match engine.admit_plan(&plan) {
                Ok(id) => info!(plan_id = %id, "plan loaded"),
                Err(e) => warn!(error = %e, "plan rejected"),
            }
        }
    }

    // ── 4. Replay ticks ──────────────────────────────────────────────────
    let file = std::fs::File::open(&ticks_path)
        .with_context(|| format!("failed to open tick file {ticks_path}"))?;
    let reader = std::io::BufReader::new(file);

    let mut ticks: u64 = 0;
    let mut emitted: u64 = 0;
    for line in reader.lines() {
        let line = line.context("failed to read tick line")?;
        if line.trim().is_empty() {
            continue;
        }
        let tick: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "skipping malformed tick line");
                continue;
            }
        };

        let Some(instrument_id) = tick.get("instrument_id").and_then(Value::as_str) else {
            warn!("tick line missing instrument_id, skipped");
            continue;
        };
        let timeframe = tick
            .get("timeframe")
            .and_then(Value::as_str)
            .unwrap_or(engine.primary_timeframe())
            .to_string();

        ticks += 1;
        match engine.evaluate_tick_on(
            instrument_id,
            &timeframe,
            tick.get("candlesticks"),
            tick.get("orderbook"),
        ) {
            Ok(signals) => emitted += signals.len() as u64,
            Err(e) => warn!(instrument = %instrument_id, error = %e, "tick dropped"),
        }
    }

    info!(ticks, emitted, "replay complete");
    Ok(())
}
