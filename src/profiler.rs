// =============================================================================
// EDGE PROFILER: archetype classification per symbol
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::ProfilerConfig;
use crate::imbalance::ImbalanceSignal;
use crate::structure::StructureSignal;
use crate::sweep::SweepSignal;
use crate::types::{
    DriftStatus, ExecLabel, MicroRegime, Rotation, SampleCounts, SelfEval, Tier, Trend,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    TrendMonster,
    Fragile,
    MeanReverter,
    NeutralTrender,
    StrongButChoppy,
    WeakButImproving,
    UnderSampled,
    Unknown,
}

impl Archetype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Archetype::TrendMonster => "trend_monster",
            Archetype::Fragile => "fragile",
            Archetype::MeanReverter => "mean_reverter",
            Archetype::NeutralTrender => "neutral_trender",
            Archetype::StrongButChoppy => "strong_but_choppy",
            Archetype::WeakButImproving => "weak_but_improving",
            Archetype::UnderSampled => "under_sampled",
            Archetype::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized external telemetry for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeInputs {
    pub tier: Tier,
    /// `None` when the source value was missing or unparsable.
    pub short_pf: Option<f64>,
    pub long_pf: Option<f64>,
    pub exp_trades_count: Option<u32>,
    pub drift: DriftStatus,
    pub exec_label: ExecLabel,
    pub quality_score: Option<f64>,
    pub rotation: Rotation,
    pub self_eval: SelfEval,
    pub counts: SampleCounts,
    /// Externally supplied regime; derived from detector output when absent.
    pub micro_regime: Option<MicroRegime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeProfile {
    pub symbol: String,
    pub tier: Tier,
    pub short_pf: Option<f64>,
    pub long_pf: Option<f64>,
    pub exp_trades_count: Option<u32>,
    pub drift_status: DriftStatus,
    pub micro_regime: MicroRegime,
    pub exec_label: ExecLabel,
    pub quality_score: Option<f64>,
    pub rotation: Rotation,
    pub self_eval: SelfEval,
    pub archetype: Archetype,
    pub sample_counts: SampleCounts,
    pub reasons: Vec<String>,
}

/// Facts the archetype rules are evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct EdgeFacts {
    pub short_pf: Option<f64>,
    pub exec: ExecLabel,
    pub drift: DriftStatus,
    pub micro_regime: MicroRegime,
}

type RuleLabel = fn(&ProfilerConfig) -> String;
type ArchetypeRule = (RuleLabel, fn(&EdgeFacts, &ProfilerConfig) -> bool, Archetype);

/// Ordered, first match wins. Labels are rendered from the active thresholds.
const ARCHETYPE_RULES: [ArchetypeRule; 6] = [
    (
        |c| format!("short_pf>{} & exec=friendly", c.trend_monster_pf),
        |f, c| pf_above(f, c.trend_monster_pf) && f.exec == ExecLabel::Friendly,
        Archetype::TrendMonster,
    ),
    (
        |c| format!("short_pf<{} & exec=hostile", c.fragile_pf),
        |f, c| pf_below(f, c.fragile_pf) && f.exec == ExecLabel::Hostile,
        Archetype::Fragile,
    ),
    (
        |c| {
            format!(
                "{}<short_pf<{} & exec=hostile & micro in {{indecision, chop_noise}}",
                c.mean_reverter_pf_low, c.mean_reverter_pf_high
            )
        },
        |f, c| {
            pf_above(f, c.mean_reverter_pf_low)
                && pf_below(f, c.mean_reverter_pf_high)
                && f.exec == ExecLabel::Hostile
                && matches!(f.micro_regime, MicroRegime::Indecision | MicroRegime::ChopNoise)
        },
        Archetype::MeanReverter,
    ),
    (
        |c| format!("short_pf>={} & exec=neutral", c.neutral_trender_pf),
        |f, c| f.short_pf.is_some_and(|pf| pf >= c.neutral_trender_pf) && f.exec == ExecLabel::Neutral,
        Archetype::NeutralTrender,
    ),
    (
        |c| format!("short_pf>{} & exec=hostile", c.strong_choppy_pf),
        |f, c| pf_above(f, c.strong_choppy_pf) && f.exec == ExecLabel::Hostile,
        Archetype::StrongButChoppy,
    ),
    (
        |c| format!("short_pf<{} & drift=improving & exec!=hostile", c.weak_improving_pf),
        |f, c| pf_below(f, c.weak_improving_pf) && f.drift == DriftStatus::Improving && f.exec != ExecLabel::Hostile,
        Archetype::WeakButImproving,
    ),
];

fn pf_above(facts: &EdgeFacts, threshold: f64) -> bool {
    facts.short_pf.is_some_and(|pf| pf > threshold)
}

fn pf_below(facts: &EdgeFacts, threshold: f64) -> bool {
    facts.short_pf.is_some_and(|pf| pf < threshold)
}

#[derive(Debug, Clone, Default)]
pub struct EdgeProfiler {
    config: ProfilerConfig,
}

impl EdgeProfiler {
    pub fn new(config: ProfilerConfig) -> Self {
        Self { config }
    }

    pub fn profile(
        &self,
        symbol: &str,
        inputs: &EdgeInputs,
        sweep: &SweepSignal,
        imbalance: &ImbalanceSignal,
        structure: &StructureSignal,
    ) -> EdgeProfile {
        let micro_regime = inputs
            .micro_regime
            .unwrap_or_else(|| self.derive_micro_regime(sweep, imbalance, structure));

        let facts = EdgeFacts {
            short_pf: inputs.short_pf,
            exec: inputs.exec_label,
            drift: inputs.drift,
            micro_regime,
        };
        let (archetype, reason) = self.classify(inputs.counts.exploration, &facts);
        debug!(symbol, %archetype, "edge profiled");

        EdgeProfile {
            symbol: symbol.to_string(),
            tier: inputs.tier,
            short_pf: inputs.short_pf,
            long_pf: inputs.long_pf,
            exp_trades_count: inputs.exp_trades_count,
            drift_status: inputs.drift,
            micro_regime,
            exec_label: inputs.exec_label,
            quality_score: inputs.quality_score,
            rotation: inputs.rotation,
            self_eval: inputs.self_eval,
            archetype,
            sample_counts: inputs.counts,
            reasons: vec![reason],
        }
    }

    /// Sample-size gate, then the ordered rule table.
    pub fn classify(&self, exploration_closes: u32, facts: &EdgeFacts) -> (Archetype, String) {
        if exploration_closes < self.config.min_exploration_closes {
            return (
                Archetype::UnderSampled,
                format!(
                    "exploration_closes {} < {}",
                    exploration_closes, self.config.min_exploration_closes
                ),
            );
        }

        ARCHETYPE_RULES
            .iter()
            .find(|(_, predicate, _)| predicate(facts, &self.config))
            .map(|(label, _, archetype)| (*archetype, label(&self.config)))
            .unwrap_or_else(|| (Archetype::Unknown, "no archetype rule matched".to_string()))
    }

    pub fn derive_micro_regime(
        &self,
        sweep: &SweepSignal,
        imbalance: &ImbalanceSignal,
        structure: &StructureSignal,
    ) -> MicroRegime {
        let cfg = &self.config;
        if !(sweep.sufficient_history || imbalance.sufficient_history || structure.sufficient_history) {
            return MicroRegime::Unknown;
        }
        if structure.bias_1h != Trend::Neutral && structure.confidence >= cfg.trending_confidence {
            return MicroRegime::Trending;
        }
        if sweep.strength >= cfg.sweep_reversal_strength {
            return MicroRegime::SweepReversal;
        }
        if imbalance.absorption_count + imbalance.exhaustion_count >= cfg.chop_event_count {
            return MicroRegime::ChopNoise;
        }
        MicroRegime::Indecision
    }
}
