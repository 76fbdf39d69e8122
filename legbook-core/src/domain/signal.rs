//! Entry signals: the instructions consumed from the external entry source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::bar::Bar;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// The bar extreme that moves against the position (low for long, high for short).
    pub fn adverse_extreme(self, bar: &Bar) -> f64 {
        match self {
            Direction::Long => bar.low,
            Direction::Short => bar.high,
        }
    }

    /// The bar extreme that moves in favor of the position.
    pub fn favorable_extreme(self, bar: &Bar) -> f64 {
        match self {
            Direction::Long => bar.high,
            Direction::Short => bar.low,
        }
    }

    /// True if `price` is at or beyond `level` in the adverse direction.
    pub fn reached_adverse(self, price: f64, level: f64) -> bool {
        match self {
            Direction::Long => price <= level,
            Direction::Short => price >= level,
        }
    }

    /// True if `price` is at or beyond `level` in the favorable direction.
    pub fn reached_favorable(self, price: f64, level: f64) -> bool {
        match self {
            Direction::Long => price >= level,
            Direction::Short => price <= level,
        }
    }

    /// Price moved `pct` percent away from `entry` in the favorable direction.
    pub fn target_price(self, entry: f64, pct: f64) -> f64 {
        entry * (1.0 + self.sign() * pct / 100.0)
    }

    /// Price moved `pct` percent away from `entry` in the adverse direction.
    pub fn stop_price(self, entry: f64, pct: f64) -> f64 {
        entry * (1.0 - self.sign() * pct / 100.0)
    }

    /// The better of two prices from this side's point of view.
    pub fn better_of(self, a: f64, b: f64) -> f64 {
        match self {
            Direction::Long => a.max(b),
            Direction::Short => a.min(b),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" | "BUY" => Ok(Direction::Long),
            "SHORT" | "SELL" => Ok(Direction::Short),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// A discrete entry instruction.
///
/// The engine consumes these; it never produces them. `variant_tag` names the
/// strategy profile that emitted the signal (e.g. `SAFE`, `FAST`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub timestamp: DateTime<Utc>,
    pub instrument: String,
    pub direction: Direction,
    pub risk_percent: f64,
    pub variant_tag: String,
}
