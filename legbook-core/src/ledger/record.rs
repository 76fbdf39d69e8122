//! Output record: one row per executed leg, flattened with position context.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Direction, Leg, LegName, Position, PositionId};
use crate::engine::rules::FRACTION_TOLERANCE;
use crate::error::EngineError;

/// Current output schema version.
pub const SCHEMA_VERSION: &str = "v2";

/// Output schemas this crate can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordSchema {
    V2,
}

impl RecordSchema {
    pub const fn version(self) -> &'static str {
        match self {
            RecordSchema::V2 => SCHEMA_VERSION,
        }
    }

    /// Column order of the written file. Byte-stable across runs.
    pub const fn columns(self) -> &'static [&'static str] {
        match self {
            RecordSchema::V2 => &V2_COLUMNS,
        }
    }

    pub fn parse(version: &str) -> Option<Self> {
        match version {
            "v2" => Some(RecordSchema::V2),
            _ => None,
        }
    }
}

const V2_COLUMNS: [&str; 23] = [
    "position_id",
    "symbol",
    "side",
    "profile_run",
    "risk_perc_run",
    "time_entry",
    "time_exit",
    "entry_price",
    "exit_price",
    "leg",
    "leg_fraction",
    "qty",
    "notional_usd",
    "pnl_pct",
    "R_multiple",
    "account_pnl_usd",
    "account_pnl_pct",
    "equity_before",
    "equity_after",
    "time_limit_applied",
    "unrealized_pct_at_90m",
    "be_armed",
    "reason",
];

/// One executed leg with everything needed to audit it in isolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    // ── Identification ──
    pub position_id: PositionId,
    pub symbol: String,
    pub side: Direction,
    pub profile_run: String,
    pub risk_perc_run: f64,

    // ── Entry / exit ──
    pub time_entry: DateTime<Utc>,
    pub time_exit: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,

    // ── Leg ──
    pub leg: LegName,
    pub leg_fraction: f64,
    pub qty: f64,
    pub notional_usd: f64,

    // ── PnL ──
    /// Price return of the leg in percent, signed by direction.
    pub pnl_pct: f64,
    #[serde(rename = "R_multiple")]
    pub r_multiple: f64,
    pub account_pnl_usd: f64,
    pub account_pnl_pct: f64,
    pub equity_before: f64,
    pub equity_after: f64,

    // ── Exit context ──
    pub time_limit_applied: bool,
    /// Unrealized percent at the close that triggered the time exit.
    #[serde(rename = "unrealized_pct_at_90m")]
    pub unrealized_pct_at_limit: Option<f64>,
    pub be_armed: bool,
    pub reason: String,
}

/// Run-level fields stamped on every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    /// Human-readable variant label, e.g. `risk 1.0 safe`.
    pub profile_run: String,
    pub risk_perc_run: f64,
    /// Time-exit horizon embedded in time-exit reason labels.
    pub time_limit_minutes: i64,
}

impl OutputRecord {
    /// Build and validate the record for `leg` of `position`.
    pub fn from_leg(
        position: &Position,
        leg: &Leg,
        meta: &RunMeta,
        equity_before: f64,
    ) -> Result<Self, EngineError> {
        let initial_risk = position.initial_risk_amount();
        let record = Self {
            position_id: position.id,
            symbol: position.instrument.clone(),
            side: position.direction,
            profile_run: meta.profile_run.clone(),
            risk_perc_run: meta.risk_perc_run,
            time_entry: position.entry_time,
            time_exit: leg.fill_time,
            entry_price: position.entry_price,
            exit_price: leg.fill_price,
            leg: leg.name,
            leg_fraction: leg.fraction,
            qty: leg.qty,
            notional_usd: leg.qty * leg.fill_price,
            pnl_pct: position.unrealized_pct(leg.fill_price),
            r_multiple: if initial_risk > 0.0 { leg.pnl / initial_risk } else { 0.0 },
            account_pnl_usd: leg.pnl,
            account_pnl_pct: if equity_before != 0.0 {
                leg.pnl / equity_before * 100.0
            } else {
                0.0
            },
            equity_before,
            equity_after: equity_before + leg.pnl,
            time_limit_applied: leg.reason.is_time_exit(),
            unrealized_pct_at_limit: leg.unrealized_pct_at_exit,
            be_armed: leg.be_armed,
            reason: leg.reason.label(meta.time_limit_minutes),
        };
        record.validate()?;
        Ok(record)
    }

    /// Structural checks on a single record.
    pub fn validate(&self) -> Result<(), EngineError> {
        let fail = |reason: String| {
            Err(EngineError::InvalidRecord {
                position_id: self.position_id,
                instrument: self.symbol.clone(),
                timestamp: self.time_exit,
                reason,
            })
        };

        if !(self.leg_fraction > 0.0 && self.leg_fraction <= 1.0 + FRACTION_TOLERANCE) {
            return fail(format!("leg fraction {} outside (0, 1]", self.leg_fraction));
        }
        if !(self.qty.is_finite() && self.qty > 0.0) {
            return fail(format!("leg quantity {} is not positive", self.qty));
        }
        if !(self.entry_price.is_finite() && self.exit_price.is_finite()) {
            return fail("non-finite price".into());
        }
        if self.time_exit < self.time_entry {
            return fail(format!("exit {} precedes entry {}", self.time_exit, self.time_entry));
        }
        if self.time_limit_applied != (self.leg == LegName::TimeExit) {
            return fail(format!("time_limit_applied={} on a {} leg", self.time_limit_applied, self.leg));
        }
        if self.reason.is_empty() {
            return fail("empty reason".into());
        }
        Ok(())
    }

    /// True if this leg closed its position (nothing filled after it).
    pub fn is_terminal(&self) -> bool {
        self.leg != LegName::Tp1
    }

    /// Cells in [`RecordSchema::V2`] column order.
    ///
    /// Floats use fixed precision and timestamps RFC 3339 with second
    /// precision so identical runs produce identical bytes.
    pub fn csv_row(&self) -> Vec<String> {
        vec![
            self.position_id.0.to_string(),
            self.symbol.clone(),
            self.side.to_string(),
            self.profile_run.clone(),
            format!("{:.2}", self.risk_perc_run),
            format_time(self.time_entry),
            format_time(self.time_exit),
            format!("{:.8}", self.entry_price),
            format!("{:.8}", self.exit_price),
            self.leg.to_string(),
            format!("{:.6}", self.leg_fraction),
            format!("{:.8}", self.qty),
            format!("{:.6}", self.notional_usd),
            format!("{:.6}", self.pnl_pct),
            format!("{:.6}", self.r_multiple),
            format!("{:.6}", self.account_pnl_usd),
            format!("{:.6}", self.account_pnl_pct),
            format!("{:.6}", self.equity_before),
            format!("{:.6}", self.equity_after),
            self.time_limit_applied.to_string(),
            self.unrealized_pct_at_limit
                .map(|v| format!("{v:.6}"))
                .unwrap_or_default(),
            self.be_armed.to_string(),
            self.reason.clone(),
        ]
    }
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
