//! Exit rules and the fixed per-bar evaluation order.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Tolerance for leg fractions summing to one.
pub const FRACTION_TOLERANCE: f64 = 1e-6;

/// Stop, target and time-limit parameters shared by every position of a run.
///
/// Percentages are expressed in percent (6.0 = 6%), fractions of the initial
/// quantity in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitRules {
    pub stop_loss_pct: f64,
    pub tp1_pct: f64,
    pub tp1_fraction: f64,
    pub tp2_pct: f64,
    pub tp2_fraction: f64,
    pub time_limit_minutes: i64,
    /// Unrealized gain at the time limit at or above which the exit is labelled a profit exit.
    pub time_limit_profit_min_pct: f64,
    /// Close positions still open at the end of the bar stream.
    pub close_residual: bool,
}

impl Default for ExitRules {
    fn default() -> Self {
        Self {
            stop_loss_pct: 6.0,
            tp1_pct: 8.0,
            tp1_fraction: 0.33,
            tp2_pct: 12.0,
            tp2_fraction: 0.67,
            time_limit_minutes: 90,
            time_limit_profit_min_pct: 0.10,
            close_residual: true,
        }
    }
}

impl ExitRules {
    pub fn time_limit(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.time_limit_minutes)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 100.0) {
            return invalid(format!("stop_loss_pct must be in (0, 100), got {}", self.stop_loss_pct));
        }
        if self.tp1_pct <= 0.0 {
            return invalid(format!("tp1_pct must be positive, got {}", self.tp1_pct));
        }
        if self.tp2_pct <= self.tp1_pct {
            return invalid(format!(
                "tp2_pct ({}) must exceed tp1_pct ({})",
                self.tp2_pct, self.tp1_pct
            ));
        }
        if !(self.tp1_fraction > 0.0 && self.tp1_fraction < 1.0) {
            return invalid(format!("tp1_fraction must be in (0, 1), got {}", self.tp1_fraction));
        }
        if (self.tp1_fraction + self.tp2_fraction - 1.0).abs() > FRACTION_TOLERANCE {
            return invalid(format!(
                "tp1_fraction + tp2_fraction must equal 1, got {} + {}",
                self.tp1_fraction, self.tp2_fraction
            ));
        }
        if self.time_limit_minutes <= 0 {
            return invalid(format!(
                "time_limit_minutes must be positive, got {}",
                self.time_limit_minutes
            ));
        }
        Ok(())
    }
}

/// One exit condition checked on every executable bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCheck {
    StopLoss,
    TakeProfit1,
    TakeProfit2,
    TimeExit,
}

/// Checks run in this order; the first one that fires ends evaluation of the bar.
/// The stop comes first, so a bar touching both stop and target exits at the stop.
pub const EVALUATION_ORDER: [ExitCheck; 4] = [
    ExitCheck::StopLoss,
    ExitCheck::TakeProfit1,
    ExitCheck::TakeProfit2,
    ExitCheck::TimeExit,
];
