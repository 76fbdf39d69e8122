//! Position and leg types owned by the lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::PositionId;
use super::signal::Direction;

/// Coarse position status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Lifecycle state: `OpenNoPartial -> OpenTp1Filled -> Closed`.
///
/// `Closed` is terminal and reached only when the remaining quantity is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionPhase {
    OpenNoPartial,
    OpenTp1Filled,
    Closed,
}

impl PositionPhase {
    pub fn status(self) -> PositionStatus {
        match self {
            PositionPhase::Closed => PositionStatus::Closed,
            _ => PositionStatus::Open,
        }
    }
}

/// Name of an exit leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegName {
    #[serde(rename = "TP1")]
    Tp1,
    #[serde(rename = "TP2")]
    Tp2,
    #[serde(rename = "SL")]
    Sl,
    #[serde(rename = "TIME_EXIT")]
    TimeExit,
    #[serde(rename = "RESIDUAL")]
    Residual,
}

impl LegName {
    pub fn as_str(self) -> &'static str {
        match self {
            LegName::Tp1 => "TP1",
            LegName::Tp2 => "TP2",
            LegName::Sl => "SL",
            LegName::TimeExit => "TIME_EXIT",
            LegName::Residual => "RESIDUAL",
        }
    }
}

impl fmt::Display for LegName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a leg filled. Refines [`LegName`] with the disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Initial protective stop.
    StopLoss,
    /// Break-even stop after TP1 armed it.
    BreakEvenStop,
    TakeProfit1,
    TakeProfit2,
    /// Time exit with unrealized gain at or above the profit threshold.
    TimeProfit,
    /// Time exit floored at the entry price.
    TimeBreakEven,
    /// Time exit at the raw close.
    TimeClose,
    /// Closed at the end of the bar stream.
    Residual,
}

impl ExitReason {
    /// Stable label written to the output record. Time exits embed the horizon.
    pub fn label(self, horizon_minutes: i64) -> String {
        match self {
            ExitReason::StopLoss => "ExitA_SL".into(),
            ExitReason::BreakEvenStop => "ExitB_StopBE".into(),
            ExitReason::TakeProfit1 => "ExitB_TP1".into(),
            ExitReason::TakeProfit2 => "ExitB_TP2".into(),
            ExitReason::TimeProfit => format!("TimeMax_{horizon_minutes}m_Profit"),
            ExitReason::TimeBreakEven => format!("TimeMax_{horizon_minutes}m_BE"),
            ExitReason::TimeClose => format!("TimeMax_{horizon_minutes}m_Close"),
            ExitReason::Residual => "ExitZ_Residual".into(),
        }
    }

    pub fn is_time_exit(self) -> bool {
        matches!(
            self,
            ExitReason::TimeProfit | ExitReason::TimeBreakEven | ExitReason::TimeClose
        )
    }
}

/// One executed exit fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub name: LegName,
    pub reason: ExitReason,
    /// Filled quantity as a fraction of the position's initial quantity.
    pub fraction: f64,
    pub qty: f64,
    pub fill_price: f64,
    pub fill_time: DateTime<Utc>,
    /// Realized PnL of this leg in account currency.
    pub pnl: f64,
    /// Break-even state right after this leg filled.
    pub be_armed: bool,
    /// Unrealized percent at the close of the bar that triggered a time exit.
    pub unrealized_pct_at_exit: Option<f64>,
}

/// A live or archived position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub instrument: String,
    pub direction: Direction,
    pub variant_tag: String,
    pub risk_percent: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub initial_qty: f64,
    pub remaining_qty: f64,
    pub initial_stop_price: f64,
    pub stop_price: f64,
    pub tp1_price: f64,
    pub tp2_price: f64,
    pub be_armed: bool,
    pub phase: PositionPhase,
    pub legs: Vec<Leg>,
    /// Timestamp of the last bar this position was evaluated against.
    pub last_evaluated: Option<DateTime<Utc>>,
}

impl Position {
    pub fn status(&self) -> PositionStatus {
        self.phase.status()
    }

    pub fn is_open(&self) -> bool {
        self.status() == PositionStatus::Open
    }

    /// Per-unit PnL of exiting at `price`.
    pub fn pnl_per_unit(&self, price: f64) -> f64 {
        self.direction.sign() * (price - self.entry_price)
    }

    /// Unrealized return in percent at `price`.
    pub fn unrealized_pct(&self, price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        self.pnl_per_unit(price) / self.entry_price * 100.0
    }

    /// Initial risk in account currency: initial quantity times the stop distance.
    pub fn initial_risk_amount(&self) -> f64 {
        self.initial_qty * (self.entry_price - self.initial_stop_price).abs()
    }

    pub fn leg_fraction_sum(&self) -> f64 {
        self.legs.iter().map(|l| l.fraction).sum()
    }

    pub fn realized_pnl(&self) -> f64 {
        self.legs.iter().map(|l| l.pnl).sum()
    }

    /// Fraction-weighted average exit price over all legs so far.
    pub fn blended_exit_price(&self) -> Option<f64> {
        let total = self.leg_fraction_sum();
        if self.legs.is_empty() || total <= 0.0 {
            return None;
        }
        Some(self.legs.iter().map(|l| l.fraction * l.fill_price).sum::<f64>() / total)
    }

    /// Realized PnL as a multiple of the initial risk amount.
    pub fn r_multiple(&self) -> f64 {
        let risk = self.initial_risk_amount();
        if risk <= 0.0 {
            return 0.0;
        }
        self.realized_pnl() / risk
    }

    pub fn exit_time(&self) -> Option<DateTime<Utc>> {
        self.legs.last().map(|l| l.fill_time)
    }
}
