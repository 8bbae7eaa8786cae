use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A Bybit timeframe with a known millisecond span.
///
/// Canonical forms are the venue's own strings (`"1"`, `"60"`, `"D"`, ...).
/// Common aliases (`"1m"`, `"1h"`, `"4h"`, `"1d"`) are accepted on parse and
/// normalized once at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interval {
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Min60,
    Min120,
    Min240,
    Min360,
    Min720,
    Day,
    Week,
    /// Accepted on input, but excluded from the data path: the venue's
    /// monthly buckets have no fixed alignment. The ~30 day span is used
    /// only for sizing heuristics.
    Month,
}

pub const MS_PER_MINUTE: i64 = 60_000;
pub const MS_PER_DAY: i64 = 86_400_000;
pub const MS_PER_WEEK: i64 = 604_800_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown interval: {0}")]
pub struct ParseIntervalError(pub String);

impl Interval {
    /// All intervals supported in the data path, smallest first.
    pub const SUPPORTED: [Interval; 12] = [
        Interval::Min1,
        Interval::Min3,
        Interval::Min5,
        Interval::Min15,
        Interval::Min30,
        Interval::Min60,
        Interval::Min120,
        Interval::Min240,
        Interval::Min360,
        Interval::Min720,
        Interval::Day,
        Interval::Week,
    ];

    /// Canonical venue string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Min1 => "1",
            Interval::Min3 => "3",
            Interval::Min5 => "5",
            Interval::Min15 => "15",
            Interval::Min30 => "30",
            Interval::Min60 => "60",
            Interval::Min120 => "120",
            Interval::Min240 => "240",
            Interval::Min360 => "360",
            Interval::Min720 => "720",
            Interval::Day => "D",
            Interval::Week => "W",
            Interval::Month => "M",
        }
    }

    /// Millisecond span of one candle.
    pub fn ms(&self) -> i64 {
        match self {
            Interval::Min1 => MS_PER_MINUTE,
            Interval::Min3 => 3 * MS_PER_MINUTE,
            Interval::Min5 => 5 * MS_PER_MINUTE,
            Interval::Min15 => 15 * MS_PER_MINUTE,
            Interval::Min30 => 30 * MS_PER_MINUTE,
            Interval::Min60 => 60 * MS_PER_MINUTE,
            Interval::Min120 => 120 * MS_PER_MINUTE,
            Interval::Min240 => 240 * MS_PER_MINUTE,
            Interval::Min360 => 360 * MS_PER_MINUTE,
            Interval::Min720 => 720 * MS_PER_MINUTE,
            Interval::Day => MS_PER_DAY,
            Interval::Week => MS_PER_WEEK,
            Interval::Month => 30 * MS_PER_DAY,
        }
    }

    /// Whether this interval participates in loading, adjacency and
    /// monitoring. Monthly buckets do not.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Interval::Month)
    }
}

impl FromStr for Interval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Canonical forms first; D/W/M are case-sensitive on the venue.
        match s {
            "1" => return Ok(Interval::Min1),
            "3" => return Ok(Interval::Min3),
            "5" => return Ok(Interval::Min5),
            "15" => return Ok(Interval::Min15),
            "30" => return Ok(Interval::Min30),
            "60" => return Ok(Interval::Min60),
            "120" => return Ok(Interval::Min120),
            "240" => return Ok(Interval::Min240),
            "360" => return Ok(Interval::Min360),
            "720" => return Ok(Interval::Min720),
            "D" => return Ok(Interval::Day),
            "W" => return Ok(Interval::Week),
            "M" => return Ok(Interval::Month),
            _ => {}
        }
        match s.to_ascii_lowercase().as_str() {
            "1m" => Ok(Interval::Min1),
            "3m" => Ok(Interval::Min3),
            "5m" => Ok(Interval::Min5),
            "15m" => Ok(Interval::Min15),
            "30m" => Ok(Interval::Min30),
            "1h" => Ok(Interval::Min60),
            "2h" => Ok(Interval::Min120),
            "4h" => Ok(Interval::Min240),
            "6h" => Ok(Interval::Min360),
            "12h" => Ok(Interval::Min720),
            "d" | "1d" => Ok(Interval::Day),
            "w" | "1w" => Ok(Interval::Week),
            _ => Err(ParseIntervalError(s.to_string())),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
