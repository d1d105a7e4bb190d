// =============================================================================
// MARKET STRUCTURE DETECTOR
// 1h swing bias, equal swings, order blocks and fair value gaps
// =============================================================================

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::StructureConfig;
use crate::indicators::{clamp_unit, dec, has_adjacent_equal, mean, swing_points, tail};
use crate::types::{Candle, CandleSet, PatternSide, Session, Trend};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureSignal {
    pub session: Option<Session>,
    pub bias_1h: Trend,
    pub equal_highs: bool,
    pub equal_lows: bool,
    pub order_block: PatternSide,
    pub fvg: PatternSide,
    pub confidence: f64,
    pub swing_highs: usize,
    pub swing_lows: usize,
    pub sufficient_history: bool,
    pub notes: Vec<String>,
}

impl StructureSignal {
    pub fn neutral(note: impl Into<String>) -> Self {
        Self {
            session: None,
            bias_1h: Trend::Neutral,
            equal_highs: false,
            equal_lows: false,
            order_block: PatternSide::None,
            fvg: PatternSide::None,
            confidence: 0.0,
            swing_highs: 0,
            swing_lows: 0,
            sufficient_history: false,
            notes: vec![note.into()],
        }
    }

    pub fn fallback(err: &anyhow::Error) -> Self {
        Self::neutral(format!("Error: {:#}", err))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarketStructureDetector {
    config: StructureConfig,
}

impl MarketStructureDetector {
    pub fn new(config: StructureConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, symbol: &str, candles: &CandleSet) -> StructureSignal {
        match self.try_detect(&candles.h1) {
            Ok(signal) => {
                debug!(symbol, bias = ?signal.bias_1h, confidence = signal.confidence, "structure evaluated");
                signal
            }
            Err(e) => {
                warn!("⚠️ Market structure fallback for {}: {:#}", symbol, e);
                StructureSignal::fallback(&e)
            }
        }
    }

    fn try_detect(&self, h1: &[Candle]) -> Result<StructureSignal> {
        let cfg = &self.config;
        if h1.len() < cfg.min_candles {
            return Ok(StructureSignal::neutral(format!(
                "Insufficient 1h history ({} < {})",
                h1.len(),
                cfg.min_candles
            )));
        }

        let window = tail(h1, cfg.swing_window);
        let Some(latest) = window.last() else {
            bail!("1h window unexpectedly empty");
        };
        let session = Session::from_hour(latest.hour_utc());

        let (swing_highs, swing_lows) = swing_points(window, 1);
        let high_levels: Vec<Decimal> = swing_highs.iter().map(|&(_, level)| level).collect();
        let low_levels: Vec<Decimal> = swing_lows.iter().map(|&(_, level)| level).collect();

        let bias = determine_bias(&high_levels, &low_levels);
        let tolerance = dec(cfg.equal_tolerance);
        let equal_highs = has_adjacent_equal(&high_levels, tolerance);
        let equal_lows = has_adjacent_equal(&low_levels, tolerance);
        let order_block = self.find_order_block(window)?;
        let fvg = find_fvg(window);

        let mut notes = Vec::new();
        let mut confidence = 0.0;
        if bias != Trend::Neutral {
            confidence += cfg.bias_weight;
            notes.push(format!("{:?} swing structure", bias));
        }
        if order_block.agrees_with(bias) && fvg.agrees_with(bias) {
            confidence += cfg.confluence_weight;
            notes.push("Order block and FVG agree with bias".to_string());
        }
        if matches!(session, Session::London | Session::NyOpen) {
            confidence += cfg.session_weight;
        }
        if equal_highs || equal_lows {
            confidence += cfg.equal_weight;
            notes.push("Equal swing levels resting".to_string());
        }

        Ok(StructureSignal {
            session: Some(session),
            bias_1h: bias,
            equal_highs,
            equal_lows,
            order_block,
            fvg,
            confidence: clamp_unit(confidence),
            swing_highs: swing_highs.len(),
            swing_lows: swing_lows.len(),
            sufficient_history: true,
            notes,
        })
    }

    /// Newest impulse candle (range > mult × trailing mean range); its predecessor is the block.
    pub fn find_order_block(&self, window: &[Candle]) -> Result<PatternSide> {
        let ranges: Vec<Decimal> = tail(window, self.config.range_lookback)
            .iter()
            .map(|c| c.range())
            .collect();
        let Some(avg_range) = mean(&ranges)? else {
            return Ok(PatternSide::None);
        };
        if avg_range <= Decimal::ZERO {
            return Ok(PatternSide::None);
        }
        let threshold = avg_range
            .checked_mul(dec(self.config.impulse_range_mult))
            .context("impulse threshold overflowed")?;

        for i in (1..window.len()).rev() {
            let impulse = &window[i];
            if impulse.range() <= threshold {
                continue;
            }
            let block = &window[i - 1];
            return Ok(if impulse.is_bullish() && block.is_bearish() {
                PatternSide::Bullish
            } else if impulse.is_bearish() && block.is_bullish() {
                PatternSide::Bearish
            } else {
                PatternSide::None
            });
        }

        Ok(PatternSide::None)
    }
}

/// HH + HL ⇒ bullish, LH + LL ⇒ bearish, using the two latest swings of each kind.
pub fn determine_bias(highs: &[Decimal], lows: &[Decimal]) -> Trend {
    if highs.len() < 2 || lows.len() < 2 {
        return Trend::Neutral;
    }
    let (prev_high, last_high) = (highs[highs.len() - 2], highs[highs.len() - 1]);
    let (prev_low, last_low) = (lows[lows.len() - 2], lows[lows.len() - 1]);

    if last_high > prev_high && last_low > prev_low {
        Trend::Bullish
    } else if last_high < prev_high && last_low < prev_low {
        Trend::Bearish
    } else {
        Trend::Neutral
    }
}

/// Nearest 3-candle gap, scanning from the newest candle backward.
pub fn find_fvg(window: &[Candle]) -> PatternSide {
    for n in (2..window.len()).rev() {
        if window[n].low > window[n - 2].high {
            return PatternSide::Bullish;
        }
        if window[n].high < window[n - 2].low {
            return PatternSide::Bearish;
        }
    }
    PatternSide::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{flat_bars, series};
    use rust_decimal::prelude::*;

    fn detector() -> MarketStructureDetector {
        MarketStructureDetector::new(StructureConfig::default())
    }

    fn d(v: f64) -> Decimal {
        Decimal::from_f64(v).unwrap()
    }

    /// Zig-zag uptrend: swing highs 102, 104 and swing lows 99, 101.
    fn uptrend_bars() -> Vec<(f64, f64, f64, f64)> {
        vec![
            (100.0, 100.5, 99.5, 100.2),
            (100.2, 102.0, 100.0, 101.5), // swing high 102
            (101.5, 101.6, 99.0, 99.5),   // swing low 99
            (101.5, 104.0, 101.4, 103.5), // swing high 104
            (103.5, 103.6, 101.0, 101.2), // swing low 101
            (101.2, 103.0, 101.1, 102.8),
            (102.8, 103.2, 102.0, 103.0),
            (103.0, 103.5, 102.5, 103.4),
            (103.4, 103.9, 103.0, 103.8),
            (103.8, 104.2, 103.6, 104.1),
        ]
    }

    #[test]
    fn test_bias_from_swings() {
        assert_eq!(determine_bias(&[d(102.0), d(104.0)], &[d(99.0), d(101.0)]), Trend::Bullish);
        assert_eq!(determine_bias(&[d(104.0), d(102.0)], &[d(101.0), d(99.0)]), Trend::Bearish);
        assert_eq!(determine_bias(&[d(104.0), d(105.0)], &[d(101.0), d(99.0)]), Trend::Neutral);
        assert_eq!(determine_bias(&[d(104.0)], &[d(101.0), d(99.0)]), Trend::Neutral);
    }

    #[test]
    fn test_uptrend_signal() {
        let candles = CandleSet { h1: series(&uptrend_bars(), 60, 8), ..Default::default() };
        let signal = detector().detect("BTC", &candles);

        assert!(signal.sufficient_history);
        assert_eq!(signal.bias_1h, Trend::Bullish);
        assert_eq!(signal.session, Some(Session::London));
        assert!(signal.confidence >= 0.45);
        assert!(signal.confidence <= 1.0);
    }

    #[test]
    fn test_fvg_nearest_wins() {
        let bars = vec![
            (100.0, 101.0, 99.0, 100.5),
            (100.5, 103.0, 100.4, 102.8),
            (102.8, 104.0, 101.5, 103.5), // bullish gap vs bar 0
            (103.5, 103.6, 100.0, 100.2),
            (100.2, 100.4, 99.0, 99.2),
            (99.2, 99.3, 98.0, 98.1), // bearish gap vs bar 3 (high 99.3 < low 100.0)
        ];
        assert_eq!(find_fvg(&series(&bars, 60, 5)), PatternSide::Bearish);
        assert_eq!(find_fvg(&series(&bars[..3], 60, 5)), PatternSide::Bullish);
    }

    #[test]
    fn test_order_block_before_impulse() {
        let mut bars = flat_bars(20, 100.0);
        bars[0] = (100.0, 100.2, 99.8, 100.05); // drop the spike so ranges stay uniform
        bars[17] = (100.1, 100.2, 99.8, 99.9);  // bearish block
        bars[18] = (99.9, 102.5, 99.85, 102.4); // bullish impulse
        let window = series(&bars, 60, 5);
        assert_eq!(detector().find_order_block(&window).unwrap(), PatternSide::Bullish);

        bars[17] = (99.9, 100.2, 99.8, 100.1); // same colour as impulse
        let window = series(&bars, 60, 5);
        assert_eq!(detector().find_order_block(&window).unwrap(), PatternSide::None);
    }

    #[test]
    fn test_short_history_is_neutral() {
        let candles = CandleSet { h1: series(&flat_bars(9, 100.0), 60, 5), ..Default::default() };
        let signal = detector().detect("X", &candles);
        assert!(!signal.sufficient_history);
        assert_eq!(signal.confidence, 0.0);
        assert_eq!(signal.bias_1h, Trend::Neutral);
    }
}
