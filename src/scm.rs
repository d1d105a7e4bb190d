// =============================================================================
// SAMPLE COLLECTION MODE CONTROLLER
// Base level from tier/sample size, then an ordered fold of overrides
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::advisor::{AdvisorRecommendation, Recommendation};
use crate::config::ScmConfig;
use crate::imbalance::ImbalanceSignal;
use crate::profiler::{Archetype, EdgeProfile};
use crate::structure::StructureSignal;
use crate::sweep::SweepSignal;
use crate::types::{CapitalIntent, DriftStatus, ExecLabel, SelfEval, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScmLevel {
    Off,
    Low,
    Normal,
    High,
}

impl ScmLevel {
    /// One notch less sampling; `Off` stays `Off`.
    pub fn step_down(self) -> Self {
        match self {
            ScmLevel::High => ScmLevel::Normal,
            ScmLevel::Normal => ScmLevel::Low,
            ScmLevel::Low | ScmLevel::Off => ScmLevel::Off,
        }
    }
}

impl fmt::Display for ScmLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScmLevel::Off => "off",
            ScmLevel::Low => "low",
            ScmLevel::Normal => "normal",
            ScmLevel::High => "high",
        };
        f.write_str(s)
    }
}

/// Snapshot of what the level was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScmContext {
    pub tier: Tier,
    pub exec_label: ExecLabel,
    pub drift_status: DriftStatus,
    pub archetype: Archetype,
    pub exploration_closes: u32,
    pub advisor: Option<Recommendation>,
    pub self_eval: SelfEval,
    pub sweep_strength: f64,
    pub structure_confidence: f64,
    pub avg_imbalance: f64,
    pub capital_weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScmState {
    pub symbol: String,
    pub level: ScmLevel,
    pub reasons: Vec<String>,
    pub context: ScmContext,
}

/// Everything one symbol's decision reads.
#[derive(Debug, Clone, Copy)]
pub struct ScmInputs<'a> {
    pub profile: &'a EdgeProfile,
    pub sweep: &'a SweepSignal,
    pub imbalance: &'a ImbalanceSignal,
    pub structure: &'a StructureSignal,
    pub advice: Option<&'a AdvisorRecommendation>,
    pub capital: Option<&'a CapitalIntent>,
}

impl ScmInputs<'_> {
    fn is_kill_branch(&self) -> bool {
        self.profile.tier == Tier::Tier3 && self.profile.exec_label == ExecLabel::Hostile
    }

    fn recommendation(&self) -> Option<Recommendation> {
        self.advice.map(|a| a.recommendation)
    }
}

/// Level plus the audit trail built so far.
#[derive(Debug, Clone, PartialEq)]
struct Decision {
    level: ScmLevel,
    reasons: Vec<String>,
}

impl Decision {
    fn set(mut self, level: ScmLevel, reason: String) -> Self {
        self.reasons.push(format!("{} ({} -> {})", reason, self.level, level));
        self.level = level;
        self
    }
}

type Override = fn(&ScmInputs<'_>, &ScmConfig, Decision) -> Decision;

/// Applied in order; every override sees the result of the previous one.
const OVERRIDES: [(&str, Override); 6] = [
    ("execution", execution_override),
    ("drift", drift_override),
    ("advisor", advisor_override),
    ("self_eval", self_eval_override),
    ("structure", structural_override),
    ("capital", capital_override),
];

fn execution_override(inputs: &ScmInputs<'_>, _: &ScmConfig, d: Decision) -> Decision {
    let p = inputs.profile;
    if p.exec_label == ExecLabel::Friendly
        && matches!(p.drift_status, DriftStatus::Improving | DriftStatus::Stable)
        && d.level == ScmLevel::Normal
    {
        return d.set(ScmLevel::High, format!("Friendly execution with {:?} drift", p.drift_status));
    }
    d
}

fn drift_override(inputs: &ScmInputs<'_>, _: &ScmConfig, d: Decision) -> Decision {
    if inputs.profile.drift_status == DriftStatus::Degrading && d.level != ScmLevel::Off && d.level != ScmLevel::Low {
        return d.set(ScmLevel::Low, "Drift degrading".to_string());
    }
    d
}

fn advisor_override(inputs: &ScmInputs<'_>, _: &ScmConfig, d: Decision) -> Decision {
    match inputs.recommendation() {
        Some(Recommendation::Freeze) if d.level != ScmLevel::Off => d.set(ScmLevel::Off, "Advisor freeze".to_string()),
        Some(Recommendation::Tighten) if d.level == ScmLevel::High => {
            d.set(ScmLevel::Normal, "Advisor tighten".to_string())
        }
        _ => d,
    }
}

fn self_eval_override(inputs: &ScmInputs<'_>, _: &ScmConfig, d: Decision) -> Decision {
    let eval = inputs.profile.self_eval;
    if eval.is_persistently_degraded() && d.level != ScmLevel::Off {
        return d.set(
            ScmLevel::Off,
            format!("Self-eval degraded {} with no improvement", eval.degraded),
        );
    }
    d
}

/// Sub-rules only read detectors that had enough history.
fn structural_override(inputs: &ScmInputs<'_>, cfg: &ScmConfig, mut d: Decision) -> Decision {
    let (sweep, imbalance, structure) = (inputs.sweep, inputs.imbalance, inputs.structure);

    if sweep.sufficient_history
        && structure.sufficient_history
        && sweep.strength > cfg.sweep_boost_strength
        && structure.confidence > cfg.structure_boost_confidence
        && matches!(d.level, ScmLevel::Low | ScmLevel::Normal)
    {
        d = d.set(
            ScmLevel::High,
            format!(
                "Sweep {:.2} with structure confidence {:.2}",
                sweep.strength, structure.confidence
            ),
        );
    }

    if imbalance.sufficient_history && imbalance.has_flow_events() && d.level != ScmLevel::Off {
        let next = d.level.step_down();
        d = d.set(
            next,
            format!(
                "Absorption {} / exhaustion {} present",
                imbalance.absorption_count, imbalance.exhaustion_count
            ),
        );
    }

    if sweep.sufficient_history
        && imbalance.sufficient_history
        && sweep.strength > cfg.sweep_imbalance_strength
        && imbalance.avg_imbalance > 0.0
        && d.level == ScmLevel::Normal
    {
        d = d.set(
            ScmLevel::High,
            format!("Sweep {:.2} with positive imbalance", sweep.strength),
        );
    }

    if structure.sufficient_history
        && structure.confidence < cfg.weak_structure_confidence
        && d.level != ScmLevel::Off
    {
        let next = d.level.step_down();
        d = d.set(next, format!("Weak structure confidence {:.2}", structure.confidence));
    }

    d
}

fn capital_override(inputs: &ScmInputs<'_>, cfg: &ScmConfig, d: Decision) -> Decision {
    if d.level != ScmLevel::Off || inputs.is_kill_branch() {
        return d;
    }
    match inputs.capital {
        Some(intent) if intent.is_exploit() && intent.weight >= cfg.capital_min_weight && !intent.is_policy_blocked() => {
            d.set(ScmLevel::Low, format!("Capital exploit intent, weight {:.2}", intent.weight))
        }
        _ => d,
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScmController {
    config: ScmConfig,
}

impl ScmController {
    pub fn new(config: ScmConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, inputs: &ScmInputs<'_>) -> ScmState {
        let base = self.base_level(inputs);
        let decision = OVERRIDES
            .iter()
            .fold(base, |d, (_, apply)| apply(inputs, &self.config, d));

        let profile = inputs.profile;
        debug!(symbol = %profile.symbol, level = %decision.level, rules = decision.reasons.len(), "scm evaluated");

        ScmState {
            symbol: profile.symbol.clone(),
            level: decision.level,
            reasons: decision.reasons,
            context: ScmContext {
                tier: profile.tier,
                exec_label: profile.exec_label,
                drift_status: profile.drift_status,
                archetype: profile.archetype,
                exploration_closes: profile.sample_counts.exploration,
                advisor: inputs.recommendation(),
                self_eval: profile.self_eval,
                sweep_strength: inputs.sweep.strength,
                structure_confidence: inputs.structure.confidence,
                avg_imbalance: inputs.imbalance.avg_imbalance,
                capital_weight: inputs.capital.map(|c| c.weight),
            },
        }
    }

    fn base_level(&self, inputs: &ScmInputs<'_>) -> Decision {
        let cfg = &self.config;
        let closes = inputs.profile.sample_counts.exploration;

        let (level, reason) = if inputs.is_kill_branch() {
            if closes >= cfg.kill_min_closes {
                (ScmLevel::Off, format!("tier3 with hostile execution after {} closes", closes))
            } else {
                (ScmLevel::Low, format!("tier3 with hostile execution, only {} closes", closes))
            }
        } else if closes < cfg.high_below {
            (ScmLevel::High, format!("{} exploration closes < {}", closes, cfg.high_below))
        } else if closes < cfg.normal_below {
            (ScmLevel::Normal, format!("{} exploration closes < {}", closes, cfg.normal_below))
        } else if closes < cfg.low_below {
            (ScmLevel::Low, format!("{} exploration closes < {}", closes, cfg.low_below))
        } else {
            (ScmLevel::Off, format!("{} exploration closes >= {}", closes, cfg.low_below))
        };

        Decision {
            level,
            reasons: vec![format!("Base {}: {}", level, reason)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::AdvisorContext;
    use crate::types::{MicroRegime, Rotation, SampleCounts};

    fn profile(tier: Tier, exec: ExecLabel, drift: DriftStatus, exploration: u32) -> EdgeProfile {
        EdgeProfile {
            symbol: "BTC".to_string(),
            tier,
            short_pf: Some(1.2),
            long_pf: None,
            exp_trades_count: None,
            drift_status: drift,
            micro_regime: MicroRegime::Unknown,
            exec_label: exec,
            quality_score: None,
            rotation: Rotation::Hold,
            self_eval: SelfEval::default(),
            archetype: Archetype::Unknown,
            sample_counts: SampleCounts { exploration, normal: 0, total: exploration },
            reasons: Vec::new(),
        }
    }

    fn advice(p: &EdgeProfile, recommendation: Recommendation) -> AdvisorRecommendation {
        AdvisorRecommendation {
            symbol: p.symbol.clone(),
            recommendation,
            reasons: Vec::new(),
            context: AdvisorContext {
                tier: p.tier,
                short_pf: p.short_pf,
                exec_label: p.exec_label,
                archetype: p.archetype,
                drift_status: p.drift_status,
                rotation: p.rotation,
                self_eval: p.self_eval,
                sample_counts: p.sample_counts,
            },
        }
    }

    struct Signals {
        sweep: SweepSignal,
        imbalance: ImbalanceSignal,
        structure: StructureSignal,
    }

    fn no_history() -> Signals {
        Signals {
            sweep: SweepSignal::neutral("n/a"),
            imbalance: ImbalanceSignal::neutral("n/a"),
            structure: StructureSignal::neutral("n/a"),
        }
    }

    fn run(
        p: &EdgeProfile,
        s: &Signals,
        advice: Option<&AdvisorRecommendation>,
        capital: Option<&CapitalIntent>,
    ) -> ScmState {
        ScmController::default().evaluate(&ScmInputs {
            profile: p,
            sweep: &s.sweep,
            imbalance: &s.imbalance,
            structure: &s.structure,
            advice,
            capital,
        })
    }

    fn exploit(weight: f64) -> CapitalIntent {
        CapitalIntent {
            lane_intent: "exploit".to_string(),
            weight,
            policy_level: "normal".to_string(),
            allow_new_entries: true,
        }
    }

    #[test]
    fn test_small_sample_tier2_is_high() {
        let p = profile(Tier::Tier2, ExecLabel::Neutral, DriftStatus::InsufficientData, 5);
        let a = advice(&p, Recommendation::Observe);
        let state = run(&p, &no_history(), Some(&a), None);
        assert_eq!(state.level, ScmLevel::High);
        assert_eq!(state.reasons.len(), 1);
    }

    #[test]
    fn test_base_levels() {
        let cases = [(0, ScmLevel::High), (8, ScmLevel::Normal), (19, ScmLevel::Normal), (20, ScmLevel::Low), (40, ScmLevel::Off)];
        for (closes, expected) in cases {
            let p = profile(Tier::Tier2, ExecLabel::Neutral, DriftStatus::Stable, closes);
            assert_eq!(run(&p, &no_history(), None, None).level, expected, "closes={}", closes);
        }
    }

    #[test]
    fn test_tier3_hostile_kill_survives_everything() {
        let signals = no_history();
        for closes in [8, 12, 50] {
            let mut p = profile(Tier::Tier3, ExecLabel::Hostile, DriftStatus::Improving, closes);
            p.self_eval = SelfEval { improved: 4, degraded: 0, inconclusive: 0 };
            let a = advice(&p, Recommendation::Relax);
            let state = run(&p, &signals, Some(&a), Some(&exploit(0.5)));
            assert_eq!(state.level, ScmLevel::Off);
        }

        let p = profile(Tier::Tier3, ExecLabel::Hostile, DriftStatus::Stable, 7);
        assert_eq!(run(&p, &signals, None, None).level, ScmLevel::Low);
    }

    #[test]
    fn test_friendly_normal_goes_high_then_degrading_drift_wins() {
        let p = profile(Tier::Tier1, ExecLabel::Friendly, DriftStatus::Stable, 10);
        assert_eq!(run(&p, &no_history(), None, None).level, ScmLevel::High);

        let p = profile(Tier::Tier1, ExecLabel::Friendly, DriftStatus::Degrading, 10);
        let state = run(&p, &no_history(), None, None);
        assert_eq!(state.level, ScmLevel::Low);
        assert!(state.reasons.iter().any(|r| r.starts_with("Drift degrading")));
    }

    #[test]
    fn test_advisor_and_self_eval_overrides() {
        let p = profile(Tier::Tier2, ExecLabel::Neutral, DriftStatus::Stable, 3);
        let freeze = advice(&p, Recommendation::Freeze);
        assert_eq!(run(&p, &no_history(), Some(&freeze), None).level, ScmLevel::Off);

        let tighten = advice(&p, Recommendation::Tighten);
        assert_eq!(run(&p, &no_history(), Some(&tighten), None).level, ScmLevel::Normal);

        let mut p = profile(Tier::Tier2, ExecLabel::Neutral, DriftStatus::Stable, 3);
        p.self_eval = SelfEval { improved: 0, degraded: 2, inconclusive: 0 };
        assert_eq!(run(&p, &no_history(), None, None).level, ScmLevel::Off);
    }

    #[test]
    fn test_structural_boost_and_step_downs() {
        let p = profile(Tier::Tier2, ExecLabel::Neutral, DriftStatus::Stable, 25);
        let mut s = no_history();
        s.sweep.sufficient_history = true;
        s.sweep.strength = 0.8;
        s.structure.sufficient_history = true;
        s.structure.confidence = 0.7;
        let state = run(&p, &s, None, None);
        assert_eq!(state.level, ScmLevel::High);

        s.imbalance.sufficient_history = true;
        s.imbalance.absorption_count = 1;
        assert_eq!(run(&p, &s, None, None).level, ScmLevel::Normal);

        s.imbalance.avg_imbalance = 0.3;
        assert_eq!(run(&p, &s, None, None).level, ScmLevel::High);

        s.structure.confidence = 0.2;
        s.imbalance.absorption_count = 0;
        s.imbalance.avg_imbalance = 0.0;
        let state = run(&p, &s, None, None);
        assert_eq!(state.level, ScmLevel::Off);
        assert!(state.reasons.last().is_some_and(|r| r.starts_with("Weak structure confidence")));
    }

    #[test]
    fn test_capital_floor_only_raises_off() {
        let p = profile(Tier::Tier2, ExecLabel::Neutral, DriftStatus::Stable, 45);
        let state = run(&p, &no_history(), None, Some(&exploit(0.2)));
        assert_eq!(state.level, ScmLevel::Low);

        assert_eq!(run(&p, &no_history(), None, Some(&exploit(0.1))).level, ScmLevel::Off);

        let mut blocked = exploit(0.4);
        blocked.policy_level = "halt".to_string();
        assert_eq!(run(&p, &no_history(), None, Some(&blocked)).level, ScmLevel::Off);

        let p = profile(Tier::Tier2, ExecLabel::Neutral, DriftStatus::Stable, 10);
        assert_eq!(run(&p, &no_history(), None, Some(&exploit(0.9))).level, ScmLevel::Normal);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let mut p = profile(Tier::Tier1, ExecLabel::Friendly, DriftStatus::Improving, 12);
        p.self_eval = SelfEval { improved: 1, degraded: 1, inconclusive: 2 };
        let a = advice(&p, Recommendation::Tighten);
        let first = run(&p, &no_history(), Some(&a), Some(&exploit(0.3)));
        let second = run(&p, &no_history(), Some(&a), Some(&exploit(0.3)));
        assert_eq!(first.level, second.level);
        assert_eq!(first.reasons, second.reasons);
    }
}
