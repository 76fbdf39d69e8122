//! Ledger: turns committed legs into records and tracks account equity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{OutputRecord, RunMeta};
use crate::domain::{Leg, Position, PositionStatus};
use crate::engine::rules::FRACTION_TOLERANCE;
use crate::error::EngineError;

/// Account equity right after a leg fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Snapshot of a fully closed position with its summary numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position: Position,
    pub realized_pnl: f64,
    pub r_multiple: f64,
    pub blended_exit_price: f64,
    pub exit_time: DateTime<Utc>,
}

/// Per-run ledger. Equity changes only when a leg is recorded.
#[derive(Debug, Clone)]
pub struct Ledger {
    meta: RunMeta,
    initial_equity: f64,
    equity: f64,
    records: Vec<OutputRecord>,
    closed: Vec<ClosedPosition>,
    curve: Vec<EquityPoint>,
}

impl Ledger {
    pub fn new(meta: RunMeta, initial_equity: f64) -> Self {
        Self {
            meta,
            initial_equity,
            equity: initial_equity,
            records: Vec::new(),
            closed: Vec::new(),
            curve: Vec::new(),
        }
    }

    pub fn meta(&self) -> &RunMeta {
        &self.meta
    }

    pub fn initial_equity(&self) -> f64 {
        self.initial_equity
    }

    /// Current account equity.
    pub fn equity(&self) -> f64 {
        self.equity
    }

    /// Emit the record for `leg` (already appended to `position`) and book its PnL.
    pub fn record_leg(&mut self, position: &Position, leg: &Leg) -> Result<&OutputRecord, EngineError> {
        let record = OutputRecord::from_leg(position, leg, &self.meta, self.equity)?;
        self.equity = record.equity_after;
        self.curve.push(EquityPoint {
            timestamp: leg.fill_time,
            equity: self.equity,
        });
        self.records.push(record);
        Ok(&self.records[self.records.len() - 1])
    }

    /// Take ownership of a closed position after checking that its legs
    /// account for exactly the initial quantity.
    pub fn archive(&mut self, position: Position) -> Result<&ClosedPosition, EngineError> {
        let fraction_sum = position.leg_fraction_sum();
        let exit_time = position.exit_time();
        let balanced = (fraction_sum - 1.0).abs() <= FRACTION_TOLERANCE
            && position.remaining_qty.abs() <= FRACTION_TOLERANCE * position.initial_qty.max(1.0);

        let (Some(exit_time), true, PositionStatus::Closed) = (exit_time, balanced, position.status())
        else {
            return Err(EngineError::AccountingInvariant {
                position_id: position.id,
                instrument: position.instrument.clone(),
                timestamp: exit_time.unwrap_or(position.entry_time),
                fraction_sum,
                remaining_qty: position.remaining_qty,
            });
        };

        let snapshot = ClosedPosition {
            realized_pnl: position.realized_pnl(),
            r_multiple: position.r_multiple(),
            blended_exit_price: position.blended_exit_price().unwrap_or(position.entry_price),
            exit_time,
            position,
        };
        self.closed.push(snapshot);
        Ok(&self.closed[self.closed.len() - 1])
    }

    pub fn records(&self) -> &[OutputRecord] {
        &self.records
    }

    pub fn closed_positions(&self) -> &[ClosedPosition] {
        &self.closed
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.curve
    }

    pub fn into_parts(self) -> (Vec<OutputRecord>, Vec<ClosedPosition>, Vec<EquityPoint>) {
        (self.records, self.closed, self.curve)
    }

    pub fn into_records(self) -> Vec<OutputRecord> {
        self.records
    }
}
