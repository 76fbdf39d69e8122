//! Engine configuration, per-run mutable state, and run outcome types.

use serde::{Deserialize, Serialize};

use super::rules::ExitRules;
use crate::data::{GapConfig, GapReport};
use crate::domain::{Position, PositionId, PositionIdGen};
use crate::error::EngineError;
use crate::ledger::{ClosedPosition, EquityPoint, Ledger, OutputRecord, RunMeta};

/// Configuration for a single engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub rules: ExitRules,
    pub gaps: GapConfig,
    pub initial_equity: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rules: ExitRules::default(),
            gaps: GapConfig::default(),
            initial_equity: 10_000.0,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        self.rules.validate()?;
        self.gaps.validate()?;
        if !(self.initial_equity.is_finite() && self.initial_equity > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "initial equity must be positive, got {}",
                self.initial_equity
            )));
        }
        Ok(())
    }
}

/// Mutable state of one engine instance (one instrument × variant).
///
/// Everything a run touches lives here; nothing is shared between runs.
pub struct RunContext {
    pub instrument: String,
    pub ids: PositionIdGen,
    /// Live positions in id order.
    pub open: Vec<Position>,
    pub ledger: Ledger,
    pub rejected_entries: Vec<EngineError>,
    /// Unfilled gaps replay stepped over under the resume policy.
    pub resumed_gaps: Vec<GapReport>,
}

impl RunContext {
    pub fn new(instrument: &str, meta: RunMeta, initial_equity: f64) -> Self {
        Self {
            instrument: instrument.to_string(),
            ids: PositionIdGen::default(),
            open: Vec::new(),
            ledger: Ledger::new(meta, initial_equity),
            rejected_entries: Vec::new(),
            resumed_gaps: Vec::new(),
        }
    }

    pub fn open_ids(&self) -> Vec<PositionId> {
        self.open.iter().map(|p| p.id).collect()
    }

    pub fn into_outcome(self, gaps: Vec<GapReport>) -> RunOutcome {
        let initial_equity = self.ledger.initial_equity();
        let final_equity = self.ledger.equity();
        let (records, closed, equity_curve) = self.ledger.into_parts();
        RunOutcome {
            instrument: self.instrument,
            records,
            closed,
            open: self.open,
            rejected_entries: self.rejected_entries,
            gaps,
            resumed_gaps: self.resumed_gaps,
            initial_equity,
            final_equity,
            equity_curve,
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub instrument: String,
    /// One record per leg, in fill order.
    pub records: Vec<OutputRecord>,
    pub closed: Vec<ClosedPosition>,
    /// Positions still open at the end of data (only when residual close is off).
    pub open: Vec<Position>,
    /// Entries rejected without aborting the run.
    pub rejected_entries: Vec<EngineError>,
    /// Every gap detected by the normalizer.
    pub gaps: Vec<GapReport>,
    pub resumed_gaps: Vec<GapReport>,
    pub initial_equity: f64,
    pub final_equity: f64,
    pub equity_curve: Vec<EquityPoint>,
}
