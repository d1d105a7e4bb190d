use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::types::Candle;

pub fn make_test_candle(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
    make_candle_at(base_time(), open, high, low, close, volume)
}

pub fn make_candle_at(
    open_time: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
) -> Candle {
    Candle {
        open_time,
        open: Decimal::from_f64(open).unwrap(),
        high: Decimal::from_f64(high).unwrap(),
        low: Decimal::from_f64(low).unwrap(),
        close: Decimal::from_f64(close).unwrap(),
        volume: Decimal::from_f64(volume).unwrap(),
    }
}

/// 2024-03-04 00:00 UTC, a Monday.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
}

/// Series of `(open, high, low, close)` bars spaced `step_minutes` apart, ending at `last_hour` UTC.
pub fn series(bars: &[(f64, f64, f64, f64)], step_minutes: i64, last_hour: u32) -> Vec<Candle> {
    let end = base_time() + Duration::hours(last_hour as i64);
    let n = bars.len() as i64;
    bars.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| {
            let t = end - Duration::minutes(step_minutes * (n - 1 - i as i64));
            make_candle_at(t, o, h, l, c, 1000.0)
        })
        .collect()
}

/// Quiet bars around `mid`: one isolated spike high/low inside the trailing 20 so no
/// extreme is ever repeated, every other bar identical.
pub fn flat_bars(n: usize, mid: f64) -> Vec<(f64, f64, f64, f64)> {
    let spike = n.saturating_sub(20);
    (0..n)
        .map(|i| {
            if i == spike {
                (mid, mid + 2.0, mid - 2.0, mid + 0.05)
            } else {
                (mid, mid + 0.2, mid - 0.2, mid + 0.05)
            }
        })
        .collect()
}
