// =============================================================================
// Engine Configuration — layered parameters with serde defaults
// =============================================================================
//
// Three layers feed every plan evaluation:
//
//   global defaults  <-  per-instrument overrides  <-  plan breakout_params
//
// Merging is last-write-wins per leaf key, implemented as a recursive JSON
// object merge followed by a typed deserialization and a validation pass.
// Every field carries a serde default so that partial documents (and older
// config files missing new fields) always load.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::errors::ConfigError;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_penetration_pct() -> f64 {
    0.05
}

fn default_min_rvol() -> f64 {
    1.5
}

fn default_confirm_time_ms() -> i64 {
    60_000
}

fn default_retest_band_pct() -> f64 {
    0.02
}

fn default_min_break_range_atr() -> f64 {
    0.5
}

fn default_atr_period() -> usize {
    14
}

fn default_rvol_period() -> usize {
    20
}

fn default_depth_levels() -> usize {
    5
}

fn default_imbalance_threshold() -> f64 {
    0.6
}

fn default_depletion_threshold() -> f64 {
    0.3
}

fn default_primary_timeframe() -> String {
    "1m".to_string()
}

fn default_score_base() -> u32 {
    30
}

fn default_score_volume_max() -> u32 {
    25
}

fn default_score_volatility_bonus() -> u32 {
    25
}

fn default_natr_floor() -> f64 {
    0.5
}

fn default_natr_ceiling() -> f64 {
    5.0
}

fn default_score_pattern_bonus() -> u32 {
    10
}

fn default_score_liquidity_bonus() -> u32 {
    10
}

fn default_spike_atr_multiplier() -> f64 {
    3.0
}

fn default_spike_fallback_pct() -> f64 {
    0.05
}

// =============================================================================
// Parameter sections
// =============================================================================

/// Breakout lifecycle parameters consumed by the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutParams {
    /// Penetration distance as a percentage of the trigger level.
    #[serde(default = "default_penetration_pct")]
    pub penetration_pct: f64,

    /// Optional ATR multiple for the penetration threshold; the larger of
    /// the two branches wins. Zero disables the ATR branch.
    #[serde(default)]
    pub penetration_natr_mult: f64,

    /// Minimum relative volume on the break bar.
    #[serde(default = "default_min_rvol")]
    pub min_rvol: f64,

    /// Close-confirmation mode: the break bar must close beyond the level.
    /// When false, confirmation uses elapsed market time instead.
    #[serde(default = "default_true")]
    pub confirm_close: bool,

    /// Elapsed market time required in time-confirmation mode.
    #[serde(default = "default_confirm_time_ms")]
    pub confirm_time_ms: i64,

    /// Retest mode: wait for a pullback to the level before triggering.
    #[serde(default)]
    pub allow_retest_entry: bool,

    /// Retest proximity band as a percentage of the trigger level.
    #[serde(default = "default_retest_band_pct")]
    pub retest_band_pct: f64,

    /// Invalidate when a closed bar falls back to the pre-break side.
    #[serde(default = "default_true")]
    pub fakeout_close_invalidate: bool,

    /// Require an order-book sweep in the breakout direction to confirm.
    #[serde(default)]
    pub ob_sweep_check: bool,

    /// Minimum break-bar true range as a multiple of ATR. Zero disables.
    #[serde(default = "default_min_break_range_atr")]
    pub min_break_range_atr: f64,
}

impl Default for BreakoutParams {
    fn default() -> Self {
        Self {
            penetration_pct: default_penetration_pct(),
            penetration_natr_mult: 0.0,
            min_rvol: default_min_rvol(),
            confirm_close: true,
            confirm_time_ms: default_confirm_time_ms(),
            allow_retest_entry: false,
            retest_band_pct: default_retest_band_pct(),
            fakeout_close_invalidate: true,
            ob_sweep_check: false,
            min_break_range_atr: default_min_break_range_atr(),
        }
    }
}

/// ATR computation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtrParams {
    #[serde(default = "default_atr_period")]
    pub period: usize,
}

impl Default for AtrParams {
    fn default() -> Self {
        Self {
            period: default_atr_period(),
        }
    }
}

/// Volume / RVOL parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeParams {
    #[serde(default = "default_rvol_period")]
    pub rvol_period: usize,

    /// Minimum absolute volume on a closed break bar. Zero disables.
    #[serde(default)]
    pub min_volume_threshold: f64,
}

impl Default for VolumeParams {
    fn default() -> Self {
        Self {
            rvol_period: default_rvol_period(),
            min_volume_threshold: 0.0,
        }
    }
}

/// Order-book derivation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookParams {
    /// Number of top-of-book levels considered for depth and imbalance.
    #[serde(default = "default_depth_levels")]
    pub depth_levels: usize,

    /// Imbalance magnitude treated as significant.
    #[serde(default = "default_imbalance_threshold")]
    pub imbalance_threshold: f64,

    /// Depth depletion ratio between successive snapshots that declares a
    /// sweep on that side.
    #[serde(default = "default_depletion_threshold")]
    pub depletion_threshold: f64,
}

impl Default for OrderbookParams {
    fn default() -> Self {
        Self {
            depth_levels: default_depth_levels(),
            imbalance_threshold: default_imbalance_threshold(),
            depletion_threshold: default_depletion_threshold(),
        }
    }
}

/// Time-semantics parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeParams {
    /// Timeframe tag the engine evaluates plans against.
    #[serde(default = "default_primary_timeframe")]
    pub primary_timeframe: String,
}

impl Default for TimeParams {
    fn default() -> Self {
        Self {
            primary_timeframe: default_primary_timeframe(),
        }
    }
}

/// Strength-score weights for triggered signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringParams {
    #[serde(default = "default_score_base")]
    pub base: u32,

    /// Cap of the volume component.
    #[serde(default = "default_score_volume_max")]
    pub volume_max: u32,

    /// Flat bonus when NATR sits in the tradeable band.
    #[serde(default = "default_score_volatility_bonus")]
    pub volatility_bonus: u32,

    #[serde(default = "default_natr_floor")]
    pub natr_floor: f64,

    #[serde(default = "default_natr_ceiling")]
    pub natr_ceiling: f64,

    /// Bonus for a pinbar on the retest bar.
    #[serde(default = "default_score_pattern_bonus")]
    pub pattern_bonus: u32,

    /// Bonus for a sweep in the breakout direction.
    #[serde(default = "default_score_liquidity_bonus")]
    pub liquidity_bonus: u32,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            base: default_score_base(),
            volume_max: default_score_volume_max(),
            volatility_bonus: default_score_volatility_bonus(),
            natr_floor: default_natr_floor(),
            natr_ceiling: default_natr_ceiling(),
            pattern_bonus: default_score_pattern_bonus(),
            liquidity_bonus: default_score_liquidity_bonus(),
        }
    }
}

/// Ingestion spike filter parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpikeFilterParams {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Reject a candle whose close moved more than this many ATRs from the
    /// last trade price.
    #[serde(default = "default_spike_atr_multiplier")]
    pub atr_multiplier: f64,

    /// Fallback fractional move limit when ATR is not yet available.
    #[serde(default = "default_spike_fallback_pct")]
    pub fallback_pct: f64,
}

impl Default for SpikeFilterParams {
    fn default() -> Self {
        Self {
            enabled: true,
            atr_multiplier: default_spike_atr_multiplier(),
            fallback_pct: default_spike_fallback_pct(),
        }
    }
}

// =============================================================================
// ParamSet — one fully merged layer stack
// =============================================================================

/// The complete parameter document. Doubles as the `defaults` config section
/// and as the frozen effective parameter set handed to the state machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSet {
    #[serde(default)]
    pub breakout_params: BreakoutParams,

    #[serde(default)]
    pub atr_params: AtrParams,

    #[serde(default)]
    pub volume_params: VolumeParams,

    #[serde(default)]
    pub orderbook_params: OrderbookParams,

    #[serde(default)]
    pub time_params: TimeParams,

    #[serde(default)]
    pub scoring_params: ScoringParams,

    #[serde(default)]
    pub spike_filter: SpikeFilterParams,
}

impl ParamSet {
    /// Validate the merged parameter set. Called at config load and at every
    /// plan admission; a failure rejects the entity being admitted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.breakout_params;

        check_unit_range("breakout_params.penetration_pct", b.penetration_pct)?;
        check_unit_range("breakout_params.retest_band_pct", b.retest_band_pct)?;
        check_unit_range("spike_filter.fallback_pct", self.spike_filter.fallback_pct)?;
        check_unit_range(
            "orderbook_params.imbalance_threshold",
            self.orderbook_params.imbalance_threshold,
        )?;
        check_unit_range(
            "orderbook_params.depletion_threshold",
            self.orderbook_params.depletion_threshold,
        )?;

        check_non_negative("breakout_params.min_rvol", b.min_rvol)?;
        check_non_negative("breakout_params.penetration_natr_mult", b.penetration_natr_mult)?;
        check_non_negative("breakout_params.min_break_range_atr", b.min_break_range_atr)?;
        check_non_negative(
            "volume_params.min_volume_threshold",
            self.volume_params.min_volume_threshold,
        )?;
        check_non_negative("spike_filter.atr_multiplier", self.spike_filter.atr_multiplier)?;

        if b.confirm_time_ms <= 0 {
            return Err(ConfigError::Validation(format!(
                "breakout_params.confirm_time_ms must be > 0, got {}",
                b.confirm_time_ms
            )));
        }
        if self.atr_params.period < 2 {
            return Err(ConfigError::Validation(format!(
                "atr_params.period must be >= 2, got {}",
                self.atr_params.period
            )));
        }
        if self.volume_params.rvol_period < 1 {
            return Err(ConfigError::Validation(
                "volume_params.rvol_period must be >= 1".to_string(),
            ));
        }
        if self.orderbook_params.depth_levels < 1 {
            return Err(ConfigError::Validation(
                "orderbook_params.depth_levels must be >= 1".to_string(),
            ));
        }
        if self.scoring_params.natr_floor > self.scoring_params.natr_ceiling {
            return Err(ConfigError::Validation(format!(
                "scoring_params natr band is inverted: [{}, {}]",
                self.scoring_params.natr_floor, self.scoring_params.natr_ceiling
            )));
        }
        Ok(())
    }

    /// Rolling-buffer bound derived from the indicator look-backs.
    pub fn buffer_capacity(&self) -> usize {
        self.atr_params.period.max(self.volume_params.rvol_period) + 5
    }
}

fn check_unit_range(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) || !value.is_finite() {
        return Err(ConfigError::Validation(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

fn check_non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if value < 0.0 || !value.is_finite() {
        return Err(ConfigError::Validation(format!(
            "{name} must be >= 0, got {value}"
        )));
    }
    Ok(())
}

// =============================================================================
// EngineConfig — the on-disk document
// =============================================================================

/// Top-level configuration file: a `defaults` document plus per-instrument
/// partial overrides (kept as raw JSON so the merge stays leaf-level).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub defaults: ParamSet,

    #[serde(default)]
    pub instruments: HashMap<String, Value>,
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.defaults.validate()?;

        info!(
            path = %path.display(),
            instruments = config.instruments.len(),
            "engine config loaded"
        );
        Ok(config)
    }
}

// =============================================================================
// ConfigResolver
// =============================================================================

/// Merges the three configuration layers into a frozen [`ParamSet`].
///
/// The resolver holds the defaults pre-serialized; `resolve` clones them,
/// overlays the instrument document and then the plan overrides, and
/// deserializes + validates the result.
pub struct ConfigResolver {
    defaults: Value,
    instruments: HashMap<String, Value>,
}

/// Section keys recognised at the top level of an override document.
const SECTION_KEYS: &[&str] = &[
    "breakout_params",
    "atr_params",
    "volume_params",
    "orderbook_params",
    "time_params",
    "scoring_params",
    "spike_filter",
];

impl ConfigResolver {
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.defaults.validate()?;
        let defaults = serde_json::to_value(&config.defaults)?;
        Ok(Self {
            defaults,
            instruments: config.instruments.clone(),
        })
    }

    /// Produce the effective parameter set for one plan evaluation.
    ///
    /// `plan_overrides` is the plan's `extra_data.breakout_params` document.
    /// Bare leaf keys (`penetration_pct`, ...) override the breakout section;
    /// a document that names whole sections overrides those sections.
    pub fn resolve(
        &self,
        instrument_id: &str,
        plan_overrides: Option<&Value>,
    ) -> Result<ParamSet, ConfigError> {
        let mut merged = self.defaults.clone();

        if let Some(instrument) = self.instruments.get(instrument_id) {
            merge_into(&mut merged, instrument);
        }

        if let Some(overrides) = plan_overrides {
            let sectioned = overrides
                .as_object()
                .map(|o| o.keys().any(|k| SECTION_KEYS.contains(&k.as_str())))
                .unwrap_or(false);
            if sectioned {
                merge_into(&mut merged, overrides);
            } else if let Some(section) = merged.get_mut("breakout_params") {
                merge_into(section, overrides);
            }
        }

        let params: ParamSet = serde_json::from_value(merged)?;
        params.validate()?;
        Ok(params)
    }
}

/// Recursive JSON merge: objects merge key-by-key, everything else is
/// overwritten by the overlay (last write wins per leaf).
fn merge_into(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
