use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::types::Candle;

/// Threshold literals live in config as f64; detectors compare in Decimal.
pub fn dec(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

pub fn to_f64(value: Decimal) -> Result<f64> {
    value
        .to_f64()
        .with_context(|| format!("decimal {} does not fit in f64", value))
}

pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// `Ok(None)` for an empty slice; overflow is an error, never a panic.
pub fn mean(values: &[Decimal]) -> Result<Option<Decimal>> {
    if values.is_empty() {
        return Ok(None);
    }
    let total = values
        .iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(*v))
        .context("sum overflowed")?;
    let avg = total
        .checked_div(Decimal::from(values.len()))
        .context("mean division overflowed")?;
    Ok(Some(avg))
}

/// Last `n` candles (or all of them when shorter).
pub fn tail(candles: &[Candle], n: usize) -> &[Candle] {
    &candles[candles.len().saturating_sub(n)..]
}

/// `|a - b| / reference <= tolerance`; a zero reference only matches exact equality.
pub fn within_tolerance(a: Decimal, b: Decimal, reference: Decimal, tolerance: Decimal) -> bool {
    let reference = reference.abs();
    if reference.is_zero() {
        return a == b;
    }
    a.checked_sub(b)
        .and_then(|diff| diff.abs().checked_div(reference))
        .is_some_and(|ratio| ratio <= tolerance)
}

// Pivot detection. `span` bars on each side must be strictly lower (highs) or
// higher (lows) than the candidate; the newest `span` bars can never be pivots.

pub fn is_pivot_high(highs: &[Decimal], idx: usize, span: usize) -> bool {
    if span == 0 || idx < span || idx + span >= highs.len() {
        return false;
    }
    let current = highs[idx];
    let left = highs[idx - span..idx].iter().all(|&h| h < current);
    let right = highs[idx + 1..=idx + span].iter().all(|&h| h < current);

    left && right
}

pub fn is_pivot_low(lows: &[Decimal], idx: usize, span: usize) -> bool {
    if span == 0 || idx < span || idx + span >= lows.len() {
        return false;
    }
    let current = lows[idx];
    let left = lows[idx - span..idx].iter().all(|&l| l > current);
    let right = lows[idx + 1..=idx + span].iter().all(|&l| l > current);

    left && right
}

/// Confirmed swing highs and lows as `(index, level)` in chronological order.
pub fn swing_points(candles: &[Candle], span: usize) -> (Vec<(usize, Decimal)>, Vec<(usize, Decimal)>) {
    let highs: Vec<_> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<_> = candles.iter().map(|c| c.low).collect();

    let swing_highs = (0..candles.len())
        .filter(|&i| is_pivot_high(&highs, i, span))
        .map(|i| (i, highs[i]))
        .collect();
    let swing_lows = (0..candles.len())
        .filter(|&i| is_pivot_low(&lows, i, span))
        .map(|i| (i, lows[i]))
        .collect();

    (swing_highs, swing_lows)
}

/// True when any two adjacent levels (after sorting) sit within `tolerance` of each other.
pub fn has_adjacent_equal(levels: &[Decimal], tolerance: Decimal) -> bool {
    let mut sorted = levels.to_vec();
    sorted.sort();
    sorted
        .windows(2)
        .any(|w| within_tolerance(w[0], w[1], w[1], tolerance))
}
