// =============================================================================
// BATCH PIPELINE
// detectors -> edge profile -> tuning advice -> sampling level, per symbol
// =============================================================================

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::info;

use crate::advisor::{AdvisorRecommendation, TuningAdvisor};
use crate::config::AppSettings;
use crate::imbalance::{ImbalanceHealth, ImbalanceSignal, VolumeImbalanceDetector};
use crate::loader::InputSnapshot;
use crate::profiler::{EdgeInputs, EdgeProfile, EdgeProfiler};
use crate::scm::{ScmController, ScmInputs, ScmState};
use crate::structure::{MarketStructureDetector, StructureSignal};
use crate::sweep::{LiquiditySweepDetector, SweepSignal};
use crate::types::{CandleSet, CapitalIntent};

/// All component outputs for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolReport {
    pub sweep: SweepSignal,
    pub imbalance: ImbalanceSignal,
    pub structure: StructureSignal,
    pub profile: EdgeProfile,
    pub advice: AdvisorRecommendation,
    pub scm: ScmState,
}

#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub generated_at: DateTime<Utc>,
    pub sweeps: BTreeMap<String, SweepSignal>,
    pub imbalance: BTreeMap<String, ImbalanceSignal>,
    pub imbalance_health: ImbalanceHealth,
    pub structure: BTreeMap<String, StructureSignal>,
    pub profiles: BTreeMap<String, EdgeProfile>,
    pub advice: BTreeMap<String, AdvisorRecommendation>,
    pub scm: BTreeMap<String, ScmState>,
}

pub struct Pipeline {
    sweep: LiquiditySweepDetector,
    imbalance: VolumeImbalanceDetector,
    structure: MarketStructureDetector,
    profiler: EdgeProfiler,
    advisor: TuningAdvisor,
    scm: ScmController,
}

impl Pipeline {
    pub fn new(settings: &AppSettings) -> Self {
        Self {
            sweep: LiquiditySweepDetector::new(settings.sweep.clone()),
            imbalance: VolumeImbalanceDetector::new(settings.imbalance.clone()),
            structure: MarketStructureDetector::new(settings.structure.clone()),
            profiler: EdgeProfiler::new(settings.profiler.clone()),
            advisor: TuningAdvisor::new(settings.advisor.clone()),
            scm: ScmController::new(settings.scm.clone()),
        }
    }

    /// Runs one symbol end to end. Never fails; detector errors become fallback records.
    pub fn run_symbol(
        &self,
        symbol: &str,
        candles: &CandleSet,
        inputs: &EdgeInputs,
        capital: Option<&CapitalIntent>,
    ) -> SymbolReport {
        let imbalance = self.imbalance.detect(symbol, candles);
        let sweep = self.sweep.detect(symbol, candles, imbalance.primary_delta());
        let structure = self.structure.detect(symbol, candles);

        let profile = self.profiler.profile(symbol, inputs, &sweep, &imbalance, &structure);
        let advice = self.advisor.advise(&profile);
        let scm = self.scm.evaluate(&ScmInputs {
            profile: &profile,
            sweep: &sweep,
            imbalance: &imbalance,
            structure: &structure,
            advice: Some(&advice),
            capital,
        });

        SymbolReport {
            sweep,
            imbalance,
            structure,
            profile,
            advice,
            scm,
        }
    }

    pub fn run(&self, snapshot: &InputSnapshot) -> BatchOutput {
        info!("⚙️ Running pipeline over {} symbols", snapshot.symbols.len());
        let empty_candles = CandleSet::default();
        let empty_inputs = EdgeInputs::default();

        let mut out = BatchOutput {
            generated_at: Utc::now(),
            sweeps: BTreeMap::new(),
            imbalance: BTreeMap::new(),
            imbalance_health: self.imbalance.batch_health(&BTreeMap::new()),
            structure: BTreeMap::new(),
            profiles: BTreeMap::new(),
            advice: BTreeMap::new(),
            scm: BTreeMap::new(),
        };

        for symbol in &snapshot.symbols {
            let report = self.run_symbol(
                symbol,
                snapshot.candles.get(symbol).unwrap_or(&empty_candles),
                snapshot.inputs.get(symbol).unwrap_or(&empty_inputs),
                snapshot.capital.get(symbol),
            );
            info!(
                "📊 {} | archetype={} advice={} scm={} sweep={:.2} structure={:.2}",
                symbol,
                report.profile.archetype,
                report.advice.recommendation,
                report.scm.level,
                report.sweep.strength,
                report.structure.confidence
            );

            out.sweeps.insert(symbol.clone(), report.sweep);
            out.imbalance.insert(symbol.clone(), report.imbalance);
            out.structure.insert(symbol.clone(), report.structure);
            out.profiles.insert(symbol.clone(), report.profile);
            out.advice.insert(symbol.clone(), report.advice);
            out.scm.insert(symbol.clone(), report.scm);
        }

        out.imbalance_health = self.imbalance.batch_health(&out.imbalance);
        info!("✅ Pipeline complete, imbalance health {:?}", out.imbalance_health.status);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::Recommendation;
    use crate::profiler::Archetype;
    use crate::scm::ScmLevel;
    use crate::test_support::{base_time, flat_bars, make_candle_at, series};
    use crate::types::{Candle, ExecLabel, SampleCounts, Tier};
    use chrono::Duration;

    fn snapshot(symbols: &[&str]) -> InputSnapshot {
        InputSnapshot {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_candles_one_record_per_symbol() {
        let pipeline = Pipeline::new(&AppSettings::default());
        let out = pipeline.run(&snapshot(&["BTC", "ETH", "SOL"]));

        for map_len in [
            out.sweeps.len(),
            out.imbalance.len(),
            out.structure.len(),
            out.profiles.len(),
            out.advice.len(),
            out.scm.len(),
        ] {
            assert_eq!(map_len, 3);
        }
        assert!(out.sweeps.values().all(|s| !s.sufficient_history));
        assert_eq!(out.profiles["BTC"].archetype, Archetype::UnderSampled);
        assert_eq!(out.advice["ETH"].recommendation, Recommendation::Observe);
        assert_eq!(out.scm["SOL"].level, ScmLevel::High);
    }

    #[test]
    fn test_symbol_with_candles_and_feeds() {
        let pipeline = Pipeline::new(&AppSettings::default());
        let candles = CandleSet {
            m15: series(&flat_bars(30, 100.0), 15, 9),
            h1: series(&flat_bars(30, 100.0), 60, 9),
            ..Default::default()
        };
        let inputs = EdgeInputs {
            tier: Tier::Tier1,
            short_pf: Some(2.5),
            exec_label: ExecLabel::Friendly,
            counts: SampleCounts { exploration: 12, normal: 0, total: 12 },
            ..Default::default()
        };

        let report = pipeline.run_symbol("BTC", &candles, &inputs, None);
        assert!(report.imbalance.sufficient_history);
        assert!(report.structure.sufficient_history);
        assert_eq!(report.profile.archetype, Archetype::UnderSampled);
        assert_eq!(report.advice.recommendation, Recommendation::Relax);
        assert_eq!(report.scm.context.advisor, Some(Recommendation::Relax));
    }

    #[test]
    fn test_detector_error_stays_inside_its_symbol() {
        let pipeline = Pipeline::new(&AppSettings::default());
        let mut snap = snapshot(&["BTC", "ETH"]);
        let overflowing: Vec<Candle> = (0..20)
            .map(|i| make_candle_at(base_time() + Duration::minutes(15 * i), 1.0, 21.0, 1.0, 21.0, 5e27))
            .collect();
        snap.candles.insert("BTC".to_string(), CandleSet { m15: overflowing, ..Default::default() });
        snap.candles.insert(
            "ETH".to_string(),
            CandleSet { m15: series(&flat_bars(30, 100.0), 15, 9), ..Default::default() },
        );

        let out = pipeline.run(&snap);
        let btc = &out.imbalance["BTC"];
        assert!(!btc.sufficient_history);
        assert!(btc.notes[0].starts_with("Error: delta overflow"));
        assert!(out.imbalance["ETH"].sufficient_history);
        assert_eq!(out.scm.len(), 2);
        assert_eq!(out.advice.len(), 2);
    }

    #[test]
    fn test_rerun_is_identical() {
        let pipeline = Pipeline::new(&AppSettings::default());
        let mut snap = snapshot(&["BTC"]);
        snap.candles.insert(
            "BTC".to_string(),
            CandleSet { h1: series(&flat_bars(25, 50.0), 60, 14), ..Default::default() },
        );
        let first = pipeline.run(&snap);
        let second = pipeline.run(&snap);
        assert_eq!(first.scm, second.scm);
        assert_eq!(first.profiles, second.profiles);
        assert_eq!(first.sweeps, second.sweeps);
        assert_eq!(first.imbalance_health, second.imbalance_health);
    }
}
