// =============================================================================
// Engine Coordinator — tick entry point
// =============================================================================
//
// Owns every per-instrument slot (data store + bound plans) and the signal
// emitter. One tick = one inbound payload pair for one instrument:
//
//   book payload -> normalizer -> store
//   candle payload -> normalizer -> spike filter -> store
//   metrics snapshot (once)
//   each plan, in admission order: state machine step -> emitter
//
// Slots are independent: ticks for different instruments may run on
// different threads, each serialized by its own slot lock. The signal store
// is the only shared resource; its uniqueness constraint provides all
// cross-instrument serialization.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{ConfigResolver, EngineConfig, ParamSet};
use crate::errors::{AdmissionError, ConfigError, ParseError};
use crate::indicators::atr;
use crate::market_data::normalizer::{self, SpikeContext};
use crate::market_data::store::InstrumentStore;
use crate::metrics::MetricsSnapshot;
use crate::plan::state_machine::{self, InvalidReason, PlanState, TickInputs};
use crate::plan::BreakoutPlan;
use crate::signals::record::{runtime_block, SignalMetrics, SignalRecord, SignalState, PROTOCOL_VERSION};
use crate::signals::score::strength_score;
use crate::signals::{EmitOutcome, SignalEmitter};

// ---------------------------------------------------------------------------
// Per-plan runtime
// ---------------------------------------------------------------------------

/// One admitted plan plus its frozen parameters and lifecycle mirrors.
struct PlanRuntime {
    plan: BreakoutPlan,
    params: ParamSet,
    state: PlanState,
    break_ts: Option<i64>,
    armed_at: Option<i64>,
    triggered_at: Option<i64>,
    invalid_reason: Option<InvalidReason>,
    retest_pinbar: bool,
    signal_emitted: bool,
    /// Built once at the terminal transition; retried until the store
    /// accepts it or reports a duplicate.
    pending_signal: Option<SignalRecord>,
}

impl PlanRuntime {
    fn new(plan: BreakoutPlan, params: ParamSet) -> Self {
        Self {
            plan,
            params,
            state: PlanState::Pending,
            break_ts: None,
            armed_at: None,
            triggered_at: None,
            invalid_reason: None,
            retest_pinbar: false,
            signal_emitted: false,
            pending_signal: None,
        }
    }

    /// Record the mirrors a state carries as the machine passes through it.
    fn note_transition(&mut self, next: &PlanState) {
        match next {
            PlanState::BreakSeen { break_ts, .. } => {
                self.break_ts = Some(*break_ts);
            }
            PlanState::BreakConfirmed {
                armed_at,
                retest_pinbar,
                ..
            } => {
                self.armed_at.get_or_insert(*armed_at);
                self.retest_pinbar = *retest_pinbar;
            }
            PlanState::Triggered { triggered_at } => {
                self.triggered_at = Some(*triggered_at);
            }
            PlanState::Invalid { reason } => {
                self.invalid_reason = Some(*reason);
            }
            PlanState::Pending | PlanState::Expired => {}
        }
    }
}

/// One instrument's market data and bound plans, owned by its slot lock.
struct InstrumentSlot {
    store: InstrumentStore,
    /// Instrument-level parameters used for ingestion (spike filter,
    /// indicator periods) before any plan is involved.
    ingest: ParamSet,
    plans: Vec<PlanRuntime>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    resolver: ConfigResolver,
    defaults: ParamSet,
    slots: RwLock<HashMap<String, Arc<Mutex<InstrumentSlot>>>>,
    plan_ids: Mutex<HashSet<String>>,
    emitter: Arc<SignalEmitter>,
}

impl Engine {
    pub fn new(config: &EngineConfig, emitter: Arc<SignalEmitter>) -> Result<Self, ConfigError> {
        Ok(Self {
            resolver: ConfigResolver::new(config)?,
            defaults: config.defaults.clone(),
            slots: RwLock::new(HashMap::new()),
            plan_ids: Mutex::new(HashSet::new()),
            emitter,
        })
    }

    /// The timeframe `evaluate_tick` reads when none is named.
    pub fn primary_timeframe(&self) -> &str {
        &self.defaults.time_params.primary_timeframe
    }

    fn slot(&self, instrument_id: &str) -> Arc<Mutex<InstrumentSlot>> {
        if let Some(slot) = self.slots.read().get(instrument_id) {
            return slot.clone();
        }

        let mut slots = self.slots.write();
        slots
            .entry(instrument_id.to_string())
            .or_insert_with(|| {
                let ingest = match self.resolver.resolve(instrument_id, None) {
                    Ok(params) => params,
                    Err(e) => {
                        warn!(
                            instrument = %instrument_id,
                            error = %e,
                            "instrument overrides invalid, using defaults"
                        );
                        self.defaults.clone()
                    }
                };
                let capacity = ingest.buffer_capacity();
                Arc::new(Mutex::new(InstrumentSlot {
                    store: InstrumentStore::new(instrument_id, capacity),
                    ingest,
                    plans: Vec::new(),
                }))
            })
            .clone()
    }

    // -----------------------------------------------------------------------
    // Plan admission
    // -----------------------------------------------------------------------

    /// Admit one plan from its JSON document. All-or-nothing: a malformed
    /// document, wrong entry type, missing trigger level, or invalid merged
    /// parameters rejects the plan whole.
    pub fn admit_plan(&self, value: &Value) -> Result<String, AdmissionError> {
        let plan = BreakoutPlan::from_json(value)?;
        let params = self
            .resolver
            .resolve(&plan.instrument_id, plan.extra_data.breakout_params.as_ref())
            .map_err(|source| AdmissionError::InvalidConfig {
                plan_id: plan.id.clone(),
                source,
            })?;

        {
            let mut ids = self.plan_ids.lock();
            if !ids.insert(plan.id.clone()) {
                return Err(AdmissionError::DuplicatePlan(plan.id.clone()));
            }
        }

        let plan_id = plan.id.clone();
        let slot = self.slot(&plan.instrument_id);
        let mut slot = slot.lock();

        info!(
            plan_id = %plan_id,
            instrument = %plan.instrument_id,
            direction = %plan.direction,
            level = plan.trigger_level(),
            retest = params.breakout_params.allow_retest_entry,
            "plan admitted"
        );
        slot.plans.push(PlanRuntime::new(plan, params));
        Ok(plan_id)
    }

    // -----------------------------------------------------------------------
    // Tick evaluation
    // -----------------------------------------------------------------------

    /// Evaluate one tick on the primary timeframe.
    pub fn evaluate_tick(
        &self,
        instrument_id: &str,
        candlesticks: Option<&Value>,
        orderbook: Option<&Value>,
    ) -> Result<Vec<SignalRecord>, ParseError> {
        let timeframe = self.defaults.time_params.primary_timeframe.clone();
        self.evaluate_tick_on(instrument_id, &timeframe, candlesticks, orderbook)
    }

    /// Evaluate one tick: ingest payloads, refresh metrics, run every bound
    /// plan, and return the signals that were actually emitted (duplicates
    /// excluded).
    ///
    /// A malformed payload returns the error with no state mutated; the
    /// tick is dropped for this instrument.
    pub fn evaluate_tick_on(
        &self,
        instrument_id: &str,
        timeframe: &str,
        candlesticks: Option<&Value>,
        orderbook: Option<&Value>,
    ) -> Result<Vec<SignalRecord>, ParseError> {
        // Parse everything before touching the store so a bad payload
        // leaves no partial mutation behind.
        let book = orderbook.map(normalizer::normalize_orderbook).transpose()?;
        let candles = candlesticks
            .map(normalizer::normalize_candlesticks)
            .transpose()?;

        let slot = self.slot(instrument_id);
        let mut slot = slot.lock();

        // 1. Book first: sweep detection wants the freshest depth.
        if let Some(book) = book {
            slot.store.apply_book(book);
        }

        // 2. Bars, ascending, through the spike filter.
        if let Some(candles) = candles {
            for rejection in &candles.rejected {
                warn!(instrument = %instrument_id, error = %rejection, "bar dropped");
            }

            let mut ctx = SpikeContext {
                last_price: slot.store.last_price(),
                atr: slot
                    .store
                    .series(timeframe)
                    .map(|s| s.closed_bars())
                    .and_then(|bars| atr::calculate_atr(&bars, slot.ingest.atr_params.period)),
            };

            for bar in candles.bars {
                match normalizer::check_spike(&bar, &ctx, &slot.ingest.spike_filter) {
                    Ok(()) => {
                        ctx.last_price = Some(bar.close);
                        slot.store.apply_bar(timeframe, bar);
                    }
                    Err(e) => {
                        warn!(instrument = %instrument_id, error = %e, "bar dropped");
                    }
                }
            }
        }

        // 3. One metrics snapshot per tick.
        let metrics = MetricsSnapshot::compute(&slot.store, timeframe, &slot.ingest);

        let Some(now_ts) = slot.store.market_ts() else {
            // Nothing has ever arrived for this instrument.
            return Ok(Vec::new());
        };
        let last_price = slot.store.last_price();
        let (developing, last_closed, prev_close) = match slot.store.series(timeframe) {
            Some(series) => (
                series.developing().cloned(),
                series.last_closed().cloned(),
                series.prev_close(),
            ),
            None => (None, None, None),
        };

        let inputs = TickInputs {
            now_ts,
            last_price,
            developing: developing.as_ref(),
            last_closed: last_closed.as_ref(),
            prev_close,
            metrics: &metrics,
        };

        // 4. Plans in admission order.
        let mut emitted = Vec::new();
        let slot = &mut *slot;
        for runtime in &mut slot.plans {
            if runtime.state.is_terminal() {
                // A store failure on a previous tick left the signal
                // pending; retry it now.
                if !runtime.signal_emitted {
                    Self::try_emit(&self.emitter, runtime, &mut emitted);
                }
                continue;
            }

            // Cascade to this tick's fixed point, collecting every stage
            // passed through so the lifecycle mirrors survive same-tick
            // multi-hop transitions.
            let mut hops: Vec<PlanState> = Vec::new();
            let next = state_machine::advance_with(
                &runtime.plan,
                &runtime.state,
                &inputs,
                &runtime.params,
                |state| hops.push(state.clone()),
            );
            for hop in &hops {
                runtime.note_transition(hop);
            }
            runtime.state = next;

            if runtime.state.is_terminal() {
                if let Some(record) =
                    Self::build_signal(runtime, &metrics, last_price, now_ts)
                {
                    runtime.pending_signal = Some(record);
                    Self::try_emit(&self.emitter, runtime, &mut emitted);
                }
            }
        }

        Ok(emitted)
    }

    /// Build the signal record for a plan that just reached a terminal
    /// state. Only triggered signals carry a strength score.
    fn build_signal(
        runtime: &PlanRuntime,
        metrics: &MetricsSnapshot,
        last_price: Option<f64>,
        now_ts: i64,
    ) -> Option<SignalRecord> {
        let state = SignalState::from_plan_state(&runtime.state)?;

        let score = match state {
            SignalState::Triggered => strength_score(
                metrics,
                &runtime.params.breakout_params,
                &runtime.params.scoring_params,
                runtime.plan.direction,
                runtime.retest_pinbar,
            ),
            _ => 0,
        };

        Some(SignalRecord {
            plan_id: runtime.plan.id.clone(),
            state,
            timestamp_ms: now_ts,
            runtime: runtime_block(
                runtime.armed_at,
                runtime.triggered_at,
                runtime.invalid_reason,
            ),
            last_price: last_price.unwrap_or_default(),
            metrics: SignalMetrics {
                rvol: metrics.rvol,
                natr_pct: metrics.natr_pct,
                atr: metrics.atr,
                pinbar: metrics.pinbar.is_some(),
            },
            strength_score: score,
            protocol_version: PROTOCOL_VERSION.to_string(),
        })
    }

    /// Hand the pending signal to the emitter. A durability failure keeps
    /// the record pending so the next tick retries it with the same key.
    fn try_emit(
        emitter: &SignalEmitter,
        runtime: &mut PlanRuntime,
        emitted: &mut Vec<SignalRecord>,
    ) {
        let Some(record) = runtime.pending_signal.clone() else {
            return;
        };
        match emitter.emit_if_new(&record) {
            Ok(EmitOutcome::Emitted) => {
                runtime.signal_emitted = true;
                runtime.pending_signal = None;
                emitted.push(record);
            }
            Ok(EmitOutcome::Duplicate) => {
                runtime.signal_emitted = true;
                runtime.pending_signal = None;
            }
            Err(e) => {
                error!(
                    plan_id = %runtime.plan.id,
                    error = %e,
                    "signal store unavailable, will retry emission"
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
