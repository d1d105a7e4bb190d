use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// CANDLES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(with = "chrono::serde::ts_milliseconds", alias = "ts")]
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn upper_wick(&self) -> Decimal {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> Decimal {
        self.open.min(self.close) - self.low
    }

    /// UTC hour of the candle open, used for session bucketing.
    pub fn hour_utc(&self) -> u32 {
        self.open_time.hour()
    }
}

/// Candle history for one symbol, one series per timeframe used by the detectors.
#[derive(Debug, Clone, Default)]
pub struct CandleSet {
    pub m5: Vec<Candle>,
    pub m15: Vec<Candle>,
    pub h1: Vec<Candle>,
}

impl CandleSet {
    pub fn is_empty(&self) -> bool {
        self.m5.is_empty() && self.m15.is_empty() && self.h1.is_empty()
    }

    pub fn series(&self, timeframe: &str) -> Option<&[Candle]> {
        match timeframe {
            "5m" => Some(&self.m5),
            "15m" => Some(&self.m15),
            "1h" => Some(&self.h1),
            _ => None,
        }
    }
}

// =============================================================================
// SESSIONS & DIRECTIONAL LABELS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Session {
    Asia,
    London,
    #[serde(rename = "NY_Open")]
    NyOpen,
    #[serde(rename = "NY_Close")]
    NyClose,
    Afterhours,
}

impl Session {
    /// Fixed UTC hour buckets.
    pub fn from_hour(hour_utc: u32) -> Self {
        match hour_utc {
            0..=6 => Session::Asia,
            7..=11 => Session::London,
            12..=15 => Session::NyOpen,
            16..=19 => Session::NyClose,
            _ => Session::Afterhours,
        }
    }

    pub fn is_london_or_ny(&self) -> bool {
        matches!(self, Session::London | Session::NyOpen | Session::NyClose)
    }
}

/// bullish / bearish / neutral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

/// Directional label where "no pattern" is `none` rather than `neutral`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternSide {
    Bullish,
    Bearish,
    #[default]
    None,
}

impl PatternSide {
    pub fn agrees_with(&self, trend: Trend) -> bool {
        matches!(
            (self, trend),
            (PatternSide::Bullish, Trend::Bullish) | (PatternSide::Bearish, Trend::Bearish)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolSide {
    Above,
    Below,
    #[default]
    None,
}

// =============================================================================
// EXTERNAL FEED LABELS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
    #[default]
    Unknown,
}

impl Tier {
    pub fn from_label(label: &str) -> Self {
        match normalize_label(label).as_str() {
            "tier1" | "1" => Tier::Tier1,
            "tier2" | "2" => Tier::Tier2,
            "tier3" | "3" => Tier::Tier3,
            _ => Tier::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    Improving,
    Stable,
    Degrading,
    #[default]
    InsufficientData,
}

impl DriftStatus {
    pub fn from_label(label: &str) -> Self {
        match normalize_label(label).as_str() {
            "improving" => DriftStatus::Improving,
            "stable" => DriftStatus::Stable,
            "degrading" => DriftStatus::Degrading,
            _ => DriftStatus::InsufficientData,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecLabel {
    Friendly,
    Neutral,
    Hostile,
    #[default]
    Unknown,
}

impl ExecLabel {
    pub fn from_label(label: &str) -> Self {
        match normalize_label(label).as_str() {
            "friendly" => ExecLabel::Friendly,
            "neutral" => ExecLabel::Neutral,
            "hostile" => ExecLabel::Hostile,
            _ => ExecLabel::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Overweight,
    Underweight,
    #[default]
    Hold,
}

impl Rotation {
    pub fn from_label(label: &str) -> Self {
        match normalize_label(label).as_str() {
            "overweight" => Rotation::Overweight,
            "underweight" => Rotation::Underweight,
            _ => Rotation::Hold,
        }
    }
}

/// Short-horizon microstructure regime of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicroRegime {
    Trending,
    SweepReversal,
    Indecision,
    ChopNoise,
    #[default]
    Unknown,
}

impl MicroRegime {
    pub fn from_label(label: &str) -> Self {
        match normalize_label(label).as_str() {
            "trending" | "trend" => MicroRegime::Trending,
            "sweep_reversal" => MicroRegime::SweepReversal,
            "indecision" => MicroRegime::Indecision,
            "chop_noise" | "chop" => MicroRegime::ChopNoise,
            _ => MicroRegime::Unknown,
        }
    }
}

fn normalize_label(label: &str) -> String {
    label.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

// =============================================================================
// COUNTERS & INTENT
// =============================================================================

/// Externally persisted self-evaluation counters, consumed read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelfEval {
    #[serde(default)]
    pub improved: u32,
    #[serde(default)]
    pub degraded: u32,
    #[serde(default)]
    pub inconclusive: u32,
}

impl SelfEval {
    /// degraded ≥ 2 with no improvement at all
    pub fn is_persistently_degraded(&self) -> bool {
        self.degraded >= 2 && self.improved == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SampleCounts {
    #[serde(default, alias = "exploration_closes")]
    pub exploration: u32,
    #[serde(default, alias = "normal_closes")]
    pub normal: u32,
    #[serde(default, alias = "total_closes")]
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CapitalIntent {
    #[serde(default)]
    pub lane_intent: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub policy_level: String,
    #[serde(default = "default_allow_entries")]
    pub allow_new_entries: bool,
}

fn default_allow_entries() -> bool {
    true
}

impl CapitalIntent {
    pub fn is_exploit(&self) -> bool {
        normalize_label(&self.lane_intent) == "exploit"
    }

    pub fn is_policy_blocked(&self) -> bool {
        !self.allow_new_entries
            || matches!(
                normalize_label(&self.policy_level).as_str(),
                "block" | "blocked" | "halt"
            )
    }
}

impl fmt::Display for SampleCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exp={} normal={} total={}",
            self.exploration, self.normal, self.total
        )
    }
}
