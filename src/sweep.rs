// =============================================================================
// LIQUIDITY SWEEP DETECTOR
// HTF equal-high/low pools, LTF sweeps with displacement, breaker blocks
// =============================================================================

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SweepConfig;
use crate::indicators::{clamp_unit, dec, tail, to_f64, within_tolerance};
use crate::types::{Candle, CandleSet, PatternSide, PoolSide, Session};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSignal {
    pub session: Option<Session>,
    pub htf_pool: PoolSide,
    pub pool_level: Option<f64>,
    pub equal_highs_1h: bool,
    pub equal_lows_1h: bool,
    pub sweep_5m: bool,
    pub sweep_15m: bool,
    pub breaker_block: PatternSide,
    pub strength: f64,
    pub sufficient_history: bool,
    pub notes: Vec<String>,
}

impl SweepSignal {
    /// All flags down, strength 0.
    pub fn neutral(note: impl Into<String>) -> Self {
        Self {
            session: None,
            htf_pool: PoolSide::None,
            pool_level: None,
            equal_highs_1h: false,
            equal_lows_1h: false,
            sweep_5m: false,
            sweep_15m: false,
            breaker_block: PatternSide::None,
            strength: 0.0,
            sufficient_history: false,
            notes: vec![note.into()],
        }
    }

    pub fn fallback(err: &anyhow::Error) -> Self {
        Self::neutral(format!("Error: {:#}", err))
    }

    pub fn any_sweep(&self) -> bool {
        self.sweep_5m || self.sweep_15m
    }
}

/// Higher-timeframe liquidity pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidityPool {
    pub side: PoolSide,
    pub level: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqualLevels {
    pub equal_highs: bool,
    pub equal_lows: bool,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
}

impl EqualLevels {
    /// Equal highs take precedence over equal lows when both fire.
    pub fn pool(&self) -> Option<LiquidityPool> {
        match (self.equal_highs, self.high, self.equal_lows, self.low) {
            (true, Some(level), _, _) => Some(LiquidityPool { side: PoolSide::Above, level }),
            (_, _, true, Some(level)) => Some(LiquidityPool { side: PoolSide::Below, level }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LiquiditySweepDetector {
    config: SweepConfig,
}

impl LiquiditySweepDetector {
    pub fn new(config: SweepConfig) -> Self {
        Self { config }
    }

    /// Never fails: computation errors collapse into the neutral fallback record.
    /// `imbalance_delta` is the externally supplied mean delta used for the agreement bonus.
    pub fn detect(&self, symbol: &str, candles: &CandleSet, imbalance_delta: Option<f64>) -> SweepSignal {
        match self.try_detect(candles, imbalance_delta) {
            Ok(signal) => {
                debug!(symbol, strength = signal.strength, pool = ?signal.htf_pool, "sweep evaluated");
                signal
            }
            Err(e) => {
                warn!("⚠️ Liquidity sweep fallback for {}: {:#}", symbol, e);
                SweepSignal::fallback(&e)
            }
        }
    }

    fn try_detect(&self, candles: &CandleSet, imbalance_delta: Option<f64>) -> Result<SweepSignal> {
        let cfg = &self.config;
        let h1 = &candles.h1;
        if h1.len() < cfg.min_htf_candles {
            return Ok(SweepSignal::neutral(format!(
                "Insufficient 1h history ({} < {})",
                h1.len(),
                cfg.min_htf_candles
            )));
        }

        let Some(latest) = h1.last() else {
            bail!("1h series unexpectedly empty");
        };
        let session = Session::from_hour(latest.hour_utc());
        let mut notes = Vec::new();

        let levels = self.equal_levels(tail(h1, cfg.equal_lookback));
        if levels.equal_highs && levels.equal_lows {
            notes.push("Equal highs and lows both present; using highs".to_string());
        }
        let pool = levels.pool();

        let (sweep_5m, sweep_15m, breaker) = match pool {
            Some(pool) => {
                notes.push(format!("HTF pool {:?} at {}", pool.side, pool.level.round_dp(6)));
                let sweep_5m = self.detect_sweep(&candles.m5, pool);
                let sweep_15m = self.detect_sweep(&candles.m15, pool);
                let confirm = if candles.m15.is_empty() { &candles.m5 } else { &candles.m15 };
                let breaker = self.find_breaker(h1, confirm, pool)?;
                (sweep_5m, sweep_15m, breaker)
            }
            None => (false, false, PatternSide::None),
        };

        if sweep_5m {
            notes.push("5m sweep with displacement".to_string());
        }
        if sweep_15m {
            notes.push("15m sweep with displacement".to_string());
        }
        if breaker != PatternSide::None {
            notes.push(format!("{:?} breaker block confirmed", breaker));
        }

        let any_sweep = sweep_5m || sweep_15m;
        let mut strength = 0.0;
        if pool.is_some() {
            strength += cfg.pool_weight;
        }
        if any_sweep {
            strength += cfg.sweep_weight;
        }
        if breaker != PatternSide::None {
            strength += cfg.breaker_weight;
        }
        if any_sweep && session.is_london_or_ny() {
            strength += cfg.session_weight;
        }
        if let (Some(pool), Some(delta)) = (pool, imbalance_delta) {
            let agrees = match pool.side {
                PoolSide::Above => delta < 0.0,
                PoolSide::Below => delta > 0.0,
                PoolSide::None => false,
            };
            if agrees {
                strength += cfg.imbalance_weight;
                notes.push("Order-flow delta agrees with reversal".to_string());
            }
        }

        Ok(SweepSignal {
            session: Some(session),
            htf_pool: pool.map(|p| p.side).unwrap_or_default(),
            pool_level: pool.map(|p| to_f64(p.level)).transpose()?,
            equal_highs_1h: levels.equal_highs,
            equal_lows_1h: levels.equal_lows,
            sweep_5m,
            sweep_15m,
            breaker_block: breaker,
            strength: clamp_unit(strength),
            sufficient_history: true,
            notes,
        })
    }

    /// Counts candles whose high (low) sits within tolerance of the window's extreme.
    pub fn equal_levels(&self, window: &[Candle]) -> EqualLevels {
        let tolerance = dec(self.config.equal_tolerance);
        let high = window.iter().map(|c| c.high).max();
        let low = window.iter().map(|c| c.low).min();

        let touches = |extreme: Option<Decimal>, pick: fn(&Candle) -> Decimal| match extreme {
            Some(level) => window
                .iter()
                .filter(|c| within_tolerance(pick(c), level, level, tolerance))
                .count(),
            None => 0,
        };

        let min_touches = self.config.min_equal_touches;
        EqualLevels {
            equal_highs: touches(high, |c| c.high) >= min_touches,
            equal_lows: touches(low, |c| c.low) >= min_touches,
            high,
            low,
        }
    }

    /// Wick through the pool, close back inside, then a displacement close away from it.
    pub fn detect_sweep(&self, ltf: &[Candle], pool: LiquidityPool) -> bool {
        let window = tail(ltf, self.config.sweep_lookback);
        let level = pool.level;

        window.windows(2).any(|pair| {
            let (sweep, next) = (&pair[0], &pair[1]);
            match pool.side {
                PoolSide::Above => {
                    sweep.high > level
                        && sweep.close < level
                        && next.close < level
                        && next.close < sweep.close
                }
                PoolSide::Below => {
                    sweep.low < level
                        && sweep.close > level
                        && next.close > level
                        && next.close > sweep.close
                }
                PoolSide::None => false,
            }
        })
    }

    /// Most recent 1h candle closing into the pool band whose predecessor has the
    /// opposite colour; that predecessor's far edge must then be reclaimed on the LTF.
    pub fn find_breaker(&self, h1: &[Candle], confirm: &[Candle], pool: LiquidityPool) -> Result<PatternSide> {
        let tolerance = dec(self.config.equal_tolerance);
        let start = h1.len().saturating_sub(self.config.breaker_lookback).max(1);
        let recent_closes = tail(confirm, self.config.breaker_confirm_lookback);
        let band_edge = |factor: Decimal| {
            pool.level
                .checked_mul(factor)
                .context("pool band overflowed")
        };

        for i in (start..h1.len()).rev() {
            let (prev, candle) = (&h1[i - 1], &h1[i]);
            match pool.side {
                PoolSide::Above => {
                    let into_pool = candle.close >= band_edge(Decimal::ONE - tolerance)?;
                    if into_pool && candle.is_bullish() && prev.is_bearish() {
                        let breaker_level = prev.high;
                        let confirmed = recent_closes.iter().any(|c| c.close > breaker_level);
                        return Ok(if confirmed { PatternSide::Bullish } else { PatternSide::None });
                    }
                }
                PoolSide::Below => {
                    let into_pool = candle.close <= band_edge(Decimal::ONE + tolerance)?;
                    if into_pool && candle.is_bearish() && prev.is_bullish() {
                        let breaker_level = prev.low;
                        let confirmed = recent_closes.iter().any(|c| c.close < breaker_level);
                        return Ok(if confirmed { PatternSide::Bearish } else { PatternSide::None });
                    }
                }
                PoolSide::None => return Ok(PatternSide::None),
            }
        }

        Ok(PatternSide::None)
    }
}
