// =============================================================================
// INPUT LOADER
// Reads candle files and external telemetry feeds into one canonical shape
// =============================================================================

use anyhow::{anyhow, bail, Context, Result};
use chrono::DateTime;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::profiler::EdgeInputs;
use crate::types::{
    CapitalIntent, Candle, CandleSet, DriftStatus, ExecLabel, MicroRegime, Rotation, SampleCounts,
    SelfEval, Tier,
};

pub const TIMEFRAMES: [&str; 3] = ["5m", "15m", "1h"];

const METADATA_KEYS: [&str; 5] = ["generated_at", "timestamp", "updated_at", "version", "health"];
const LABEL_KEYS: [&str; 5] = ["status", "label", "value", "tier", "intent"];

/// One external feed, unwrapped to `symbol -> raw value`.
#[derive(Debug, Clone, Default)]
pub struct Feed(BTreeMap<String, Value>);

impl Feed {
    /// Accepts `{"symbols": {...}}` and bare `{...}` alike.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut root) = value else {
            warn!("⚠️ Feed is not a JSON object, ignoring");
            return Self::default();
        };
        let entries = match root.remove("symbols") {
            Some(Value::Object(inner)) => inner,
            Some(other) => {
                root.insert("symbols".to_string(), other);
                root
            }
            None => root,
        };
        Self(
            entries
                .into_iter()
                .filter(|(k, _)| !METADATA_KEYS.contains(&k.as_str()))
                .collect(),
        )
    }

    pub fn get(&self, symbol: &str) -> Option<&Value> {
        self.0.get(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn label(&self, symbol: &str) -> Option<String> {
        self.get(symbol).and_then(label_of)
    }

    /// Typed view of one symbol's entry; malformed entries read as `None`.
    pub fn typed<T: DeserializeOwned>(&self, symbol: &str) -> Option<T> {
        let value = self.get(symbol)?;
        match serde_json::from_value(value.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("⚠️ Malformed entry for {}: {}", symbol, e);
                None
            }
        }
    }
}

/// A bare string, or the first string under a well-known key of an object.
pub fn label_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => LABEL_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

/// Profit factor; placeholders like `"—"`, `"N/A"`, null and non-finite values read as `None`.
pub fn parse_pf(value: Option<&Value>) -> Option<f64> {
    let pf = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    pf.is_finite().then_some(pf)
}

fn first_of<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k))
}

/// Everything the pipeline needs for one batch.
#[derive(Debug, Clone, Default)]
pub struct InputSnapshot {
    pub symbols: Vec<String>,
    pub candles: BTreeMap<String, CandleSet>,
    pub inputs: BTreeMap<String, EdgeInputs>,
    pub capital: BTreeMap<String, CapitalIntent>,
}

/// Feeds read from the input directory.
#[derive(Debug, Clone, Default)]
pub struct Feeds {
    pub pf: Feed,
    pub drift: Feed,
    pub exec: Feed,
    pub quality: Feed,
    pub self_eval: Feed,
    pub rotation: Feed,
    pub trade_counts: Feed,
    pub capital: Feed,
    pub tiers: Feed,
    pub micro_regime: Feed,
}

impl Feeds {
    pub fn load(dir: &Path) -> Self {
        Self {
            pf: read_feed(&dir.join("pf_snapshot.json")),
            drift: read_feed(&dir.join("drift.json")),
            exec: read_feed(&dir.join("exec_quality.json")),
            quality: read_feed(&dir.join("quality_scores.json")),
            self_eval: read_feed(&dir.join("self_eval.json")),
            rotation: read_feed(&dir.join("rotation.json")),
            trade_counts: read_feed(&dir.join("trade_counts.json")),
            capital: read_feed(&dir.join("capital_intent.json")),
            tiers: read_feed(&dir.join("tiers.json")),
            micro_regime: read_feed(&dir.join("micro_regime.json")),
        }
    }

    /// Symbols any per-symbol feed knows about.
    pub fn known_symbols(&self) -> BTreeSet<String> {
        [&self.tiers, &self.pf, &self.trade_counts, &self.exec]
            .into_iter()
            .flat_map(|feed| feed.symbols().cloned())
            .collect()
    }

    pub fn edge_inputs(&self, symbol: &str) -> EdgeInputs {
        let pf_entry = self.pf.get(symbol).and_then(Value::as_object);
        let (short_pf, long_pf, exp_trades_count) = match pf_entry {
            Some(map) => (
                parse_pf(first_of(map, &["short_exp_pf", "short_pf"])),
                parse_pf(first_of(map, &["long_exp_pf", "long_pf"])),
                first_of(map, &["exp_trades_count"])
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok()),
            ),
            None => (None, None, None),
        };

        let quality_score = match self.quality.get(symbol) {
            Some(Value::Object(map)) => parse_pf(first_of(map, &["score", "quality_score", "value"])),
            other => parse_pf(other),
        };

        let inputs = EdgeInputs {
            tier: self.tiers.label(symbol).map(|l| Tier::from_label(&l)).unwrap_or_default(),
            short_pf,
            long_pf,
            exp_trades_count,
            drift: self
                .drift
                .label(symbol)
                .map(|l| DriftStatus::from_label(&l))
                .unwrap_or_default(),
            exec_label: self
                .exec
                .label(symbol)
                .map(|l| ExecLabel::from_label(&l))
                .unwrap_or_default(),
            quality_score,
            rotation: self
                .rotation
                .label(symbol)
                .map(|l| Rotation::from_label(&l))
                .unwrap_or_default(),
            self_eval: self.self_eval.typed::<SelfEval>(symbol).unwrap_or_default(),
            counts: self.trade_counts.typed::<SampleCounts>(symbol).unwrap_or_default(),
            micro_regime: self.micro_regime.label(symbol).map(|l| MicroRegime::from_label(&l)),
        };
        debug!(symbol, tier = ?inputs.tier, exec = ?inputs.exec_label, counts = %inputs.counts, "inputs normalized");
        inputs
    }
}

/// Reads and parses one JSON file. `Ok(None)` when the file does not exist.
fn read_json(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(value))
}

/// Missing, unreadable or corrupt file ⇒ empty feed.
pub fn read_feed(path: &Path) -> Feed {
    match read_json(path) {
        Ok(Some(value)) => Feed::from_value(value),
        Ok(None) => {
            debug!("Feed {} not found, treating as empty", path.display());
            Feed::default()
        }
        Err(e) => {
            warn!("⚠️ Ignoring feed: {:#}", e);
            Feed::default()
        }
    }
}

/// Loads the whole input directory for the requested symbols.
/// An empty symbol list means every symbol the feeds mention.
/// Only a missing input directory is an error; bad files degrade per symbol.
pub fn load_inputs(dir: &Path, requested: &[String]) -> Result<InputSnapshot> {
    if !dir.is_dir() {
        bail!("input directory {} does not exist", dir.display());
    }
    let feeds = Feeds::load(dir);
    let symbols: Vec<String> = if requested.is_empty() {
        feeds.known_symbols().into_iter().collect()
    } else {
        requested.to_vec()
    };

    let mut snapshot = InputSnapshot {
        symbols: symbols.clone(),
        ..Default::default()
    };
    let candle_dir = dir.join("candles");
    for symbol in &symbols {
        snapshot.candles.insert(symbol.clone(), load_candle_set(&candle_dir, symbol));
        snapshot.inputs.insert(symbol.clone(), feeds.edge_inputs(symbol));
        if let Some(intent) = feeds.capital.typed::<CapitalIntent>(symbol) {
            snapshot.capital.insert(symbol.clone(), intent);
        }
    }

    info!("📥 Loaded inputs for {} symbols from {}", symbols.len(), dir.display());
    Ok(snapshot)
}

pub fn load_candle_set(candle_dir: &Path, symbol: &str) -> CandleSet {
    let mut set = CandleSet::default();
    for tf in TIMEFRAMES {
        let path = candle_dir.join(format!("{}_{}.json", symbol, tf));
        let candles = load_candles(&path, symbol, tf);
        match tf {
            "5m" => set.m5 = candles,
            "15m" => set.m15 = candles,
            _ => set.h1 = candles,
        }
    }
    set
}

/// Missing or corrupt file ⇒ no candles. Bad rows are dropped, never fatal.
pub fn load_candles(path: &Path, symbol: &str, timeframe: &str) -> Vec<Candle> {
    let rows = match read_json(path) {
        Ok(Some(Value::Array(rows))) => rows,
        Ok(Some(_)) => {
            warn!("⚠️ {} is not a candle array, ignoring", path.display());
            return Vec::new();
        }
        Ok(None) => {
            debug!("No {} candles for {}", timeframe, symbol);
            return Vec::new();
        }
        Err(e) => {
            warn!("⚠️ No {} candles for {}: {:#}", timeframe, symbol, e);
            return Vec::new();
        }
    };

    let mut candles = Vec::with_capacity(rows.len());
    let mut dropped = 0usize;
    for row in &rows {
        match parse_candle(row).and_then(|c| validate_candle(&c).map(|_| c)) {
            Ok(candle) => candles.push(candle),
            Err(e) => {
                dropped += 1;
                debug!("Dropping {} {} candle: {:#}", symbol, timeframe, e);
            }
        }
    }
    if dropped > 0 {
        warn!("⚠️ Dropped {} malformed {} candles for {}", dropped, timeframe, symbol);
    }

    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);
    candles
}

/// Object form `{ts|open_time, open, high, low, close, volume}` or
/// exchange row `[open_time, "o", "h", "l", "c", "v", ...]`.
pub fn parse_candle(row: &Value) -> Result<Candle> {
    match row {
        Value::Object(_) => serde_json::from_value(row.clone()).context("invalid candle object"),
        Value::Array(fields) => {
            if fields.len() < 6 {
                bail!("candle row has {} fields, need 6", fields.len());
            }
            let open_time_ms = fields[0].as_i64().ok_or_else(|| anyhow!("invalid timestamp"))?;
            let open_time = DateTime::from_timestamp_millis(open_time_ms)
                .ok_or_else(|| anyhow!("timestamp {} out of range", open_time_ms))?;
            Ok(Candle {
                open_time,
                open: decimal_field(&fields[1])?,
                high: decimal_field(&fields[2])?,
                low: decimal_field(&fields[3])?,
                close: decimal_field(&fields[4])?,
                volume: decimal_field(&fields[5])?,
            })
        }
        other => bail!("unexpected candle shape: {}", other),
    }
}

fn decimal_field(value: &Value) -> Result<Decimal> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => bail!("non-numeric field {}", other),
    };
    text.trim()
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(text.trim()))
        .with_context(|| format!("unparsable number {:?}", text))
}

/// OHLC must be positive and consistent, volume non-negative.
pub fn validate_candle(candle: &Candle) -> Result<()> {
    if candle.open <= Decimal::ZERO
        || candle.high <= Decimal::ZERO
        || candle.low <= Decimal::ZERO
        || candle.close <= Decimal::ZERO
    {
        bail!("zero or negative price");
    }
    if candle.high < candle.open || candle.high < candle.close {
        bail!("high below open/close");
    }
    if candle.low > candle.open || candle.low > candle.close {
        bail!("low above open/close");
    }
    if candle.volume < Decimal::ZERO {
        bail!("negative volume");
    }
    Ok(())
}
