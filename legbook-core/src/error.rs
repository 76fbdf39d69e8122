//! Engine error taxonomy.
//!
//! Every variant carries enough context (instrument, timestamp, position) to be
//! reported without the caller re-deriving it. None of these are ever caught
//! and discarded inside the engine: `OrphanEntry` is collected per entry, the
//! rest abort the run.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::domain::PositionId;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// A gap longer than the forward-fill threshold was reached with no fallback.
    #[error(
        "data gap on {instrument}: {missing_bars} missing bar(s) between {gap_start} and {gap_end} \
         exceeds the {threshold_secs}s threshold (open positions: {open})",
        open = display_ids(.open_positions)
    )]
    DataGap {
        instrument: String,
        gap_start: DateTime<Utc>,
        gap_end: DateTime<Utc>,
        missing_bars: usize,
        threshold_secs: i64,
        open_positions: Vec<PositionId>,
    },

    /// Non-monotonic timestamp, missing OHLC field, or inconsistent range.
    #[error("malformed bar on {instrument} at index {index} ({timestamp}): {reason}")]
    MalformedBar {
        instrument: String,
        index: usize,
        timestamp: DateTime<Utc>,
        reason: String,
    },

    /// An entry signal with no executable bar at or right after its timestamp.
    #[error("orphan entry on {instrument} at {timestamp}: {reason}")]
    OrphanEntry {
        instrument: String,
        timestamp: DateTime<Utc>,
        reason: String,
    },

    /// Leg fractions of a closed position do not sum to one.
    #[error(
        "accounting invariant violated for position {position_id} on {instrument} at {timestamp}: \
         leg fractions sum to {fraction_sum:.9}, remaining qty {remaining_qty:.9}"
    )]
    AccountingInvariant {
        position_id: PositionId,
        instrument: String,
        timestamp: DateTime<Utc>,
        fraction_sum: f64,
        remaining_qty: f64,
    },

    /// A leg record failed its structural checks.
    #[error("invalid output record for position {position_id} on {instrument} at {timestamp}: {reason}")]
    InvalidRecord {
        position_id: PositionId,
        instrument: String,
        timestamp: DateTime<Utc>,
        reason: String,
    },

    /// Engine configuration rejected before replay.
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Short machine-readable kind, used in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::DataGap { .. } => "DataGapError",
            EngineError::MalformedBar { .. } => "MalformedBarError",
            EngineError::OrphanEntry { .. } => "OrphanEntryError",
            EngineError::AccountingInvariant { .. } => "AccountingInvariantError",
            EngineError::InvalidRecord { .. } => "InvalidRecordError",
            EngineError::InvalidConfig(_) => "InvalidConfig",
        }
    }

    /// Everything but an orphan entry aborts the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::OrphanEntry { .. })
    }

    /// Instrument the error refers to, if any.
    pub fn instrument(&self) -> Option<&str> {
        match self {
            EngineError::DataGap { instrument, .. }
            | EngineError::MalformedBar { instrument, .. }
            | EngineError::OrphanEntry { instrument, .. }
            | EngineError::AccountingInvariant { instrument, .. }
            | EngineError::InvalidRecord { instrument, .. } => Some(instrument),
            EngineError::InvalidConfig(_) => None,
        }
    }

    pub(crate) fn data_gap(
        instrument: &str,
        gap_start: DateTime<Utc>,
        gap_end: DateTime<Utc>,
        missing_bars: usize,
        threshold: Duration,
        open_positions: Vec<PositionId>,
    ) -> Self {
        EngineError::DataGap {
            instrument: instrument.to_string(),
            gap_start,
            gap_end,
            missing_bars,
            threshold_secs: threshold.num_seconds(),
            open_positions,
        }
    }
}

fn display_ids(ids: &[PositionId]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn kinds_match_taxonomy_names() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let err = EngineError::OrphanEntry {
            instrument: "BTCUSDT".into(),
            timestamp: ts,
            reason: "no bar".into(),
        };
        assert_eq!(err.kind(), "OrphanEntryError");
        assert!(err.to_string().contains("BTCUSDT"));

        let gap = EngineError::data_gap("BTCUSDT", ts, ts, 5, Duration::minutes(2), vec![PositionId(3)]);
        assert_eq!(gap.kind(), "DataGapError");
        assert!(gap.to_string().contains("120s"));
        assert!(gap.to_string().contains("(open positions: P00003)"));

        let idle = EngineError::data_gap("BTCUSDT", ts, ts, 5, Duration::minutes(2), Vec::new());
        assert!(idle.to_string().contains("(open positions: none)"));
        assert!(gap.to_string().contains("PositionId(3)"));
        assert!(gap.is_fatal());
        assert!(!err.is_fatal());
    }
}
