//! Domain types for Legbook

pub mod bar;
pub mod ids;
pub mod position;
pub mod signal;

pub use bar::Bar;
pub use ids::{DatasetHash, PositionId, PositionIdGen, RunId};
pub use position::{ExitReason, Leg, LegName, Position, PositionPhase, PositionStatus};
pub use signal::{Direction, EntrySignal};

/// Symbol type alias
pub type Symbol = String;
