// =============================================================================
// TUNING ADVISOR: gated relax / tighten / freeze / observe recommendations
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::AdvisorConfig;
use crate::profiler::{Archetype, EdgeProfile};
use crate::types::{DriftStatus, ExecLabel, Rotation, SampleCounts, SelfEval, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Relax,
    Tighten,
    Freeze,
    Observe,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Recommendation::Relax => "relax",
            Recommendation::Tighten => "tighten",
            Recommendation::Freeze => "freeze",
            Recommendation::Observe => "observe",
        };
        f.write_str(s)
    }
}

/// Inputs the recommendation was made from, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorContext {
    pub tier: Tier,
    pub short_pf: Option<f64>,
    pub exec_label: ExecLabel,
    pub archetype: Archetype,
    pub drift_status: DriftStatus,
    pub rotation: Rotation,
    pub self_eval: SelfEval,
    pub sample_counts: SampleCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorRecommendation {
    pub symbol: String,
    pub recommendation: Recommendation,
    pub reasons: Vec<String>,
    pub context: AdvisorContext,
}

type RuleLabel = fn(&AdvisorConfig) -> String;
type AdviceRule = (RuleLabel, fn(&AdvisorContext, &AdvisorConfig) -> bool, Recommendation);

/// Gate 3, first match wins.
const ADVICE_RULES: [AdviceRule; 7] = [
    (
        |cfg| format!("tier1 with short_pf>{} and friendly execution", cfg.relax_pf),
        |c, cfg| c.tier == Tier::Tier1 && c.short_pf.is_some_and(|pf| pf > cfg.relax_pf) && c.exec_label == ExecLabel::Friendly,
        Recommendation::Relax,
    ),
    (
        |cfg| format!("tier1 with short_pf>{} and acceptable execution", cfg.observe_pf),
        |c, cfg| {
            c.tier == Tier::Tier1
                && c.short_pf.is_some_and(|pf| pf > cfg.observe_pf)
                && matches!(c.exec_label, ExecLabel::Friendly | ExecLabel::Neutral)
        },
        Recommendation::Observe,
    ),
    (
        |cfg| format!("tier3 with short_pf<{} or missing and hostile execution", cfg.tighten_pf),
        |c, cfg| {
            c.tier == Tier::Tier3
                && c.short_pf.map_or(true, |pf| pf < cfg.tighten_pf)
                && c.exec_label == ExecLabel::Hostile
        },
        Recommendation::Tighten,
    ),
    (|_| "archetype fragile".to_string(), |c, _| c.archetype == Archetype::Fragile, Recommendation::Tighten),
    (|_| "archetype mean_reverter".to_string(), |c, _| c.archetype == Archetype::MeanReverter, Recommendation::Observe),
    (|_| "archetype trend_monster".to_string(), |c, _| c.archetype == Archetype::TrendMonster, Recommendation::Relax),
    (|_| "archetype under_sampled".to_string(), |c, _| c.archetype == Archetype::UnderSampled, Recommendation::Observe),
];

#[derive(Debug, Clone, Default)]
pub struct TuningAdvisor {
    config: AdvisorConfig,
}

impl TuningAdvisor {
    pub fn new(config: AdvisorConfig) -> Self {
        Self { config }
    }

    pub fn advise(&self, profile: &EdgeProfile) -> AdvisorRecommendation {
        let context = AdvisorContext {
            tier: profile.tier,
            short_pf: profile.short_pf,
            exec_label: profile.exec_label,
            archetype: profile.archetype,
            drift_status: profile.drift_status,
            rotation: profile.rotation,
            self_eval: profile.self_eval,
            sample_counts: profile.sample_counts,
        };

        let (recommendation, mut reasons) = self.decide(&context);
        reasons.extend(annotations(&context));
        debug!(symbol = %profile.symbol, %recommendation, "advice computed");

        AdvisorRecommendation {
            symbol: profile.symbol.clone(),
            recommendation,
            reasons,
            context,
        }
    }

    fn decide(&self, ctx: &AdvisorContext) -> (Recommendation, Vec<String>) {
        let cfg = &self.config;
        let exploration = ctx.sample_counts.exploration;
        if exploration < cfg.min_exploration_closes {
            return (
                Recommendation::Observe,
                vec![format!(
                    "Only {} exploration closes (< {}); observing",
                    exploration, cfg.min_exploration_closes
                )],
            );
        }

        let eval = &ctx.self_eval;
        if (eval.degraded >= cfg.freeze_min_degraded && eval.improved == 0) || eval.degraded > eval.improved {
            return (
                Recommendation::Freeze,
                vec![format!(
                    "Self-eval degraded {} vs improved {}; freezing thresholds",
                    eval.degraded, eval.improved
                )],
            );
        }

        ADVICE_RULES
            .iter()
            .find(|(_, predicate, _)| predicate(ctx, cfg))
            .map(|(label, _, rec)| (*rec, vec![label(cfg)]))
            .unwrap_or_else(|| (Recommendation::Observe, vec!["No rule matched; observing".to_string()]))
    }
}

/// Informational only; never changes the recommendation.
fn annotations(ctx: &AdvisorContext) -> Vec<String> {
    let mut notes = Vec::new();
    match ctx.rotation {
        Rotation::Overweight => notes.push("Rotation: overweight".to_string()),
        Rotation::Underweight => notes.push("Rotation: underweight".to_string()),
        Rotation::Hold => {}
    }
    match ctx.drift_status {
        DriftStatus::Improving => notes.push("Drift: improving".to_string()),
        DriftStatus::Degrading => notes.push("Drift: degrading".to_string()),
        _ => {}
    }
    notes
}
