// =============================================================================
// VOLUME IMBALANCE DETECTOR
// Candle-level delta proxy, absorption / exhaustion events, CVD trend
// =============================================================================

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::ImbalanceConfig;
use crate::indicators::{clamp_unit, dec, mean, tail, to_f64};
use crate::types::{Candle, CandleSet, Trend};

/// Preferred order for the primary timeframe.
const PRIMARY_TIMEFRAMES: [&str; 3] = ["15m", "5m", "1h"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImbalanceSignal {
    pub timeframe: Option<String>,
    pub delta_5m: Option<f64>,
    pub delta_15m: Option<f64>,
    pub delta_1h: Option<f64>,
    pub avg_imbalance: f64,
    pub imbalance_strength: f64,
    pub absorption_count: u32,
    pub bullish_absorption: u32,
    pub bearish_absorption: u32,
    pub exhaustion_count: u32,
    pub cvd_trend: Trend,
    pub sufficient_history: bool,
    pub notes: Vec<String>,
}

impl ImbalanceSignal {
    pub fn neutral(note: impl Into<String>) -> Self {
        Self {
            timeframe: None,
            delta_5m: None,
            delta_15m: None,
            delta_1h: None,
            avg_imbalance: 0.0,
            imbalance_strength: 0.0,
            absorption_count: 0,
            bullish_absorption: 0,
            bearish_absorption: 0,
            exhaustion_count: 0,
            cvd_trend: Trend::Neutral,
            sufficient_history: false,
            notes: vec![note.into()],
        }
    }

    pub fn fallback(err: &anyhow::Error) -> Self {
        Self::neutral(format!("Error: {:#}", err))
    }

    pub fn has_flow_events(&self) -> bool {
        self.absorption_count > 0 || self.exhaustion_count > 0
    }

    /// Mean delta on the primary timeframe, if one was usable.
    pub fn primary_delta(&self) -> Option<f64> {
        match self.timeframe.as_deref() {
            Some("15m") => self.delta_15m,
            Some("5m") => self.delta_5m,
            Some("1h") => self.delta_1h,
            _ => None,
        }
    }
}

/// Per-candle order-flow proxy. `imbalance` is not clamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandleDelta {
    pub delta: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub imbalance: Decimal,
}

pub fn candle_delta(candle: &Candle) -> Result<CandleDelta> {
    let delta = (candle.close - candle.open)
        .checked_mul(candle.volume)
        .with_context(|| format!("delta overflow at {}", candle.open_time))?;
    let buy_volume = delta.max(Decimal::ZERO);
    let sell_volume = (-delta).max(Decimal::ZERO);
    let imbalance = if candle.volume <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        (buy_volume - sell_volume) / candle.volume
    };

    Ok(CandleDelta {
        delta,
        buy_volume,
        sell_volume,
        imbalance,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absorption {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// Batch-level detector health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImbalanceHealth {
    pub status: HealthStatus,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VolumeImbalanceDetector {
    config: ImbalanceConfig,
}

impl VolumeImbalanceDetector {
    pub fn new(config: ImbalanceConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, symbol: &str, candles: &CandleSet) -> ImbalanceSignal {
        match self.try_detect(candles) {
            Ok(signal) => {
                debug!(symbol, strength = signal.imbalance_strength, trend = ?signal.cvd_trend, "imbalance evaluated");
                signal
            }
            Err(e) => {
                warn!("⚠️ Volume imbalance fallback for {}: {:#}", symbol, e);
                ImbalanceSignal::fallback(&e)
            }
        }
    }

    fn try_detect(&self, candles: &CandleSet) -> Result<ImbalanceSignal> {
        let cfg = &self.config;
        let lookback = cfg.lookback.max(1);

        let primary = PRIMARY_TIMEFRAMES.iter().find_map(|&tf| {
            candles
                .series(tf)
                .filter(|series| series.len() >= lookback)
                .map(|series| (tf, series))
        });
        let Some((timeframe, series)) = primary else {
            return Ok(ImbalanceSignal::neutral(format!(
                "Insufficient history on 15m/5m/1h (need {})",
                lookback
            )));
        };

        let window = tail(series, lookback);
        let deltas = window.iter().map(candle_delta).collect::<Result<Vec<_>>>()?;
        let volumes: Vec<Decimal> = window.iter().map(|c| c.volume).collect();
        let mean_volume = mean(&volumes)?.unwrap_or_default();

        let mut bullish_absorption = 0;
        let mut bearish_absorption = 0;
        let mut exhaustion_count = 0;
        for (candle, delta) in window.iter().zip(&deltas) {
            match self.absorption(candle, delta.delta) {
                Some(Absorption::Bullish) => bullish_absorption += 1,
                Some(Absorption::Bearish) => bearish_absorption += 1,
                None => {}
            }
            if self.is_exhaustion(candle, mean_volume)? {
                exhaustion_count += 1;
            }
        }

        let imbalances: Vec<Decimal> = deltas.iter().map(|d| d.imbalance).collect();
        let avg_imbalance = to_f64(mean(&imbalances)?.unwrap_or_default())?;
        let raw: Vec<Decimal> = deltas.iter().map(|d| d.delta).collect();
        let mean_delta = to_f64(mean(&raw)?.unwrap_or_default())?;
        let cvd_trend = self.cvd_trend(mean_delta);

        let mut notes = vec![format!("Primary timeframe {}", timeframe)];
        if bullish_absorption + bearish_absorption > 0 {
            notes.push(format!(
                "Absorption: {} bullish / {} bearish",
                bullish_absorption, bearish_absorption
            ));
        }
        if exhaustion_count > 0 {
            notes.push(format!("{} exhaustion candle(s)", exhaustion_count));
        }

        Ok(ImbalanceSignal {
            timeframe: Some(timeframe.to_string()),
            delta_5m: self.mean_delta(&candles.m5)?,
            delta_15m: self.mean_delta(&candles.m15)?,
            delta_1h: self.mean_delta(&candles.h1)?,
            avg_imbalance,
            imbalance_strength: clamp_unit(avg_imbalance.abs()),
            absorption_count: bullish_absorption + bearish_absorption,
            bullish_absorption,
            bearish_absorption,
            exhaustion_count,
            cvd_trend,
            sufficient_history: true,
            notes,
        })
    }

    /// Independent mean delta for one timeframe; `None` below the lookback.
    pub fn mean_delta(&self, series: &[Candle]) -> Result<Option<f64>> {
        let lookback = self.config.lookback.max(1);
        if series.len() < lookback {
            return Ok(None);
        }
        let deltas = tail(series, lookback)
            .iter()
            .map(|c| candle_delta(c).map(|d| d.delta))
            .collect::<Result<Vec<_>>>()?;
        mean(&deltas)?.map(to_f64).transpose()
    }

    pub fn absorption(&self, candle: &Candle, delta: Decimal) -> Option<Absorption> {
        let range = candle.range();
        if range <= Decimal::ZERO {
            return None;
        }
        let threshold = dec(self.config.wick_ratio);

        if candle.upper_wick() / range > threshold && delta < Decimal::ZERO {
            Some(Absorption::Bearish)
        } else if candle.lower_wick() / range > threshold && delta > Decimal::ZERO {
            Some(Absorption::Bullish)
        } else {
            None
        }
    }

    /// Climactic volume on a small body.
    pub fn is_exhaustion(&self, candle: &Candle, mean_volume: Decimal) -> Result<bool> {
        let range = candle.range();
        if range <= Decimal::ZERO || mean_volume <= Decimal::ZERO {
            return Ok(false);
        }
        let climax = mean_volume
            .checked_mul(dec(self.config.exhaustion_volume_mult))
            .context("exhaustion volume threshold overflowed")?;
        Ok(candle.volume > climax && candle.body() / range <= dec(self.config.exhaustion_max_body_ratio))
    }

    // Raw delta units; the threshold does not scale with price or volume magnitude.
    pub fn cvd_trend(&self, mean_delta: f64) -> Trend {
        if mean_delta > self.config.cvd_threshold {
            Trend::Bullish
        } else if mean_delta < -self.config.cvd_threshold {
            Trend::Bearish
        } else {
            Trend::Neutral
        }
    }

    /// Last-writer-wins over the whole batch: degraded only when every symbol is flat.
    pub fn batch_health(&self, signals: &BTreeMap<String, ImbalanceSignal>) -> ImbalanceHealth {
        if signals.is_empty() {
            return ImbalanceHealth {
                status: HealthStatus::Ok,
                reasons: vec!["No symbols evaluated".to_string()],
            };
        }

        let flat = |s: &ImbalanceSignal| {
            s.imbalance_strength < self.config.degraded_strength && s.cvd_trend == Trend::Neutral
        };
        if signals.values().all(flat) {
            ImbalanceHealth {
                status: HealthStatus::Degraded,
                reasons: vec![format!(
                    "All {} symbols show near-zero imbalance and neutral CVD",
                    signals.len()
                )],
            }
        } else {
            let active = signals.values().filter(|s| !flat(*s)).count();
            ImbalanceHealth {
                status: HealthStatus::Ok,
                reasons: vec![format!("{}/{} symbols show order-flow signal", active, signals.len())],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{base_time, make_candle_at, make_test_candle, series};
    use chrono::Duration;
    use rust_decimal::prelude::*;

    fn detector() -> VolumeImbalanceDetector {
        VolumeImbalanceDetector::new(ImbalanceConfig::default())
    }

    #[test]
    fn test_single_candle_delta_is_unclamped() {
        let candle = make_test_candle(100.0, 102.5, 99.5, 102.0, 1000.0);
        let d = candle_delta(&candle).unwrap();
        assert_eq!(d.delta, Decimal::from(2000));
        assert_eq!(d.buy_volume, Decimal::from(2000));
        assert_eq!(d.sell_volume, Decimal::ZERO);
        assert_eq!(d.imbalance, Decimal::from(2));
    }

    #[test]
    fn test_zero_volume_imbalance_is_zero() {
        let candle = make_test_candle(100.0, 101.0, 99.0, 99.0, 0.0);
        assert_eq!(candle_delta(&candle).unwrap().imbalance, Decimal::ZERO);
    }

    #[test]
    fn test_aggregate_strength_is_clamped() {
        let bars: Vec<_> = (0..20).map(|_| (100.0, 102.5, 99.5, 102.0)).collect();
        let candles = CandleSet { m15: series(&bars, 15, 10), ..Default::default() };

        let signal = detector().detect("BTC", &candles);
        assert_eq!(signal.timeframe.as_deref(), Some("15m"));
        assert!((signal.avg_imbalance - 2.0).abs() < 1e-9);
        assert_eq!(signal.imbalance_strength, 1.0);
        assert_eq!(signal.cvd_trend, Trend::Bullish);
        assert_eq!(signal.delta_15m, Some(2000.0));
        assert_eq!(signal.delta_5m, None);
        assert_eq!(signal.primary_delta(), Some(2000.0));
    }

    #[test]
    fn test_primary_falls_back_to_5m_then_1h() {
        let bars: Vec<_> = (0..20).map(|_| (100.0, 100.5, 99.5, 100.0)).collect();
        let candles = CandleSet {
            m5: series(&bars, 5, 10),
            m15: series(&bars[..5], 15, 10),
            h1: Vec::new(),
        };
        assert_eq!(detector().detect("X", &candles).timeframe.as_deref(), Some("5m"));

        let candles = CandleSet { h1: series(&bars, 60, 10), ..Default::default() };
        let signal = detector().detect("X", &candles);
        assert_eq!(signal.timeframe.as_deref(), Some("1h"));
        assert_eq!(signal.cvd_trend, Trend::Neutral);
    }

    #[test]
    fn test_absorption_and_exhaustion() {
        let bearish = make_test_candle(100.0, 103.0, 99.8, 99.9, 500.0);
        assert_eq!(detector().absorption(&bearish, Decimal::from(-50)), Some(Absorption::Bearish));

        let bullish = make_test_candle(100.0, 100.3, 97.0, 100.2, 500.0);
        assert_eq!(detector().absorption(&bullish, Decimal::from(100)), Some(Absorption::Bullish));

        let doji = make_test_candle(100.0, 101.0, 99.0, 100.1, 5000.0);
        assert!(detector().is_exhaustion(&doji, Decimal::from(1000)).unwrap());
        assert!(!detector().is_exhaustion(&doji, Decimal::from(3000)).unwrap());
    }

    #[test]
    fn test_overflowing_window_returns_fallback() {
        let heavy: Vec<Candle> = (0..20)
            .map(|i| make_candle_at(base_time() + Duration::minutes(15 * i), 1.0, 2.0, 1.0, 2.0, 5e27))
            .collect();
        let candles = CandleSet { m15: heavy, ..Default::default() };
        let signal = detector().detect("BTC", &candles);

        assert!(!signal.sufficient_history);
        assert_eq!(signal.notes.len(), 1);
        assert!(signal.notes[0].starts_with("Error:"));
        assert_eq!(
            ImbalanceSignal { notes: vec![], ..signal },
            ImbalanceSignal { notes: vec![], ..ImbalanceSignal::neutral("x") }
        );
    }

    #[test]
    fn test_insufficient_history_is_neutral() {
        let signal = detector().detect("X", &CandleSet::default());
        assert!(!signal.sufficient_history);
        assert_eq!(signal.imbalance_strength, 0.0);
        assert_eq!(signal.cvd_trend, Trend::Neutral);
    }

    #[test]
    fn test_batch_health() {
        let mut signals = BTreeMap::new();
        signals.insert("A".to_string(), ImbalanceSignal::neutral("flat"));
        signals.insert("B".to_string(), ImbalanceSignal::neutral("flat"));
        assert_eq!(detector().batch_health(&signals).status, HealthStatus::Degraded);

        let mut live = ImbalanceSignal::neutral("live");
        live.imbalance_strength = 0.4;
        live.cvd_trend = Trend::Bearish;
        signals.insert("C".to_string(), live);
        assert_eq!(detector().batch_health(&signals).status, HealthStatus::Ok);
    }

    #[test]
    fn test_cvd_threshold_in_raw_units() {
        assert_eq!(detector().cvd_trend(0.05), Trend::Neutral);
        assert_eq!(detector().cvd_trend(-0.2), Trend::Bearish);
        let d = Decimal::from_f64(0.11).unwrap().to_f64().unwrap();
        assert_eq!(detector().cvd_trend(d), Trend::Bullish);
    }
}
