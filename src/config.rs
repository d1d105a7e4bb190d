// ============================================================================
// SETTINGS: every detector/controller threshold is a named, defaulted field
// ============================================================================

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub app: AppConfig,
    pub sweep: SweepConfig,
    pub imbalance: ImbalanceConfig,
    pub structure: StructureConfig,
    pub profiler: ProfilerConfig,
    pub scm: ScmConfig,
    pub advisor: AdvisorConfig,
}

impl AppSettings {
    /// Layered load: built-in defaults <- `<path>.toml` (optional) <- `EDGE__*` env vars.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("EDGE").separator("__"))
            .build()
            .with_context(|| format!("reading settings from {}", path.display()))?;
        settings
            .try_deserialize()
            .context("settings do not match the expected shape")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub symbols: Vec<String>,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("out"),
            symbols: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub min_htf_candles: usize,
    pub equal_lookback: usize,
    pub equal_tolerance: f64,
    pub min_equal_touches: usize,
    pub sweep_lookback: usize,
    pub breaker_lookback: usize,
    pub breaker_confirm_lookback: usize,
    pub pool_weight: f64,
    pub sweep_weight: f64,
    pub breaker_weight: f64,
    pub session_weight: f64,
    pub imbalance_weight: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            min_htf_candles: 5,
            equal_lookback: 20,
            equal_tolerance: 0.001, // 0.1%
            min_equal_touches: 2,
            sweep_lookback: 10,
            breaker_lookback: 5,
            breaker_confirm_lookback: 10,
            pool_weight: 0.3,
            sweep_weight: 0.3,
            breaker_weight: 0.3,
            session_weight: 0.2,
            imbalance_weight: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImbalanceConfig {
    pub lookback: usize,
    pub wick_ratio: f64,
    pub exhaustion_volume_mult: f64,
    pub exhaustion_max_body_ratio: f64,
    /// Raw delta units, not normalized per asset.
    pub cvd_threshold: f64,
    pub degraded_strength: f64,
}

impl Default for ImbalanceConfig {
    fn default() -> Self {
        Self {
            lookback: 20,
            wick_ratio: 0.4,
            exhaustion_volume_mult: 2.0,
            exhaustion_max_body_ratio: 0.25,
            cvd_threshold: 0.1,
            degraded_strength: 0.01,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StructureConfig {
    pub min_candles: usize,
    pub swing_window: usize,
    pub equal_tolerance: f64,
    pub impulse_range_mult: f64,
    pub range_lookback: usize,
    pub bias_weight: f64,
    pub confluence_weight: f64,
    pub session_weight: f64,
    pub equal_weight: f64,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            min_candles: 10,
            swing_window: 100,
            equal_tolerance: 0.001,
            impulse_range_mult: 2.0,
            range_lookback: 20,
            bias_weight: 0.4,
            confluence_weight: 0.2,
            session_weight: 0.1,
            equal_weight: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub min_exploration_closes: u32,
    pub trend_monster_pf: f64,
    pub fragile_pf: f64,
    pub mean_reverter_pf_low: f64,
    pub mean_reverter_pf_high: f64,
    pub neutral_trender_pf: f64,
    pub strong_choppy_pf: f64,
    pub weak_improving_pf: f64,
    /// Micro-regime derivation from detector output.
    pub trending_confidence: f64,
    pub sweep_reversal_strength: f64,
    pub chop_event_count: u32,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            min_exploration_closes: 15,
            trend_monster_pf: 2.0,
            fragile_pf: 0.8,
            mean_reverter_pf_low: 0.5,
            mean_reverter_pf_high: 1.5,
            neutral_trender_pf: 1.0,
            strong_choppy_pf: 1.5,
            weak_improving_pf: 1.0,
            trending_confidence: 0.5,
            sweep_reversal_strength: 0.6,
            chop_event_count: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScmConfig {
    pub kill_min_closes: u32,
    pub high_below: u32,
    pub normal_below: u32,
    pub low_below: u32,
    pub sweep_boost_strength: f64,
    pub structure_boost_confidence: f64,
    pub sweep_imbalance_strength: f64,
    pub weak_structure_confidence: f64,
    pub capital_min_weight: f64,
}

impl Default for ScmConfig {
    fn default() -> Self {
        Self {
            kill_min_closes: 8,
            high_below: 8,
            normal_below: 20,
            low_below: 40,
            sweep_boost_strength: 0.7,
            structure_boost_confidence: 0.6,
            sweep_imbalance_strength: 0.5,
            weak_structure_confidence: 0.3,
            capital_min_weight: 0.15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub min_exploration_closes: u32,
    pub freeze_min_degraded: u32,
    pub relax_pf: f64,
    pub observe_pf: f64,
    pub tighten_pf: f64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            min_exploration_closes: 10,
            freeze_min_degraded: 2,
            relax_pf: 2.0,
            observe_pf: 1.5,
            tighten_pf: 1.0,
        }
    }
}
