//! Ledger/recorder: per-leg output records, realized PnL, equity trajectory.

pub mod book;
pub mod record;

pub use book::{ClosedPosition, EquityPoint, Ledger};
pub use record::{OutputRecord, RecordSchema, RunMeta, SCHEMA_VERSION};
