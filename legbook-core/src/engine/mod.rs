//! Backtest execution engine: entry acceptance, the position lifecycle
//! state machine, and the bar-by-bar replay loop.
//!
//! Per observed bar:
//!
//! 1. Gap check (fail or resume on an unfilled gap)
//! 2. Exit evaluation of open positions: stop, TP1, TP2, time exit
//! 3. Entry fills at the bar close

pub mod context;
pub mod entry;
pub mod lifecycle;
pub mod loop_runner;
pub mod rules;

pub use context::{EngineConfig, RunContext, RunOutcome};
pub use entry::{open_position, resolve_entry};
pub use lifecycle::{apply, evaluate_bar, BarOutcome, LegFill, SkipReason};
pub use loop_runner::{run_backtest, Engine};
pub use rules::{ExitCheck, ExitRules, EVALUATION_ORDER, FRACTION_TOLERANCE};
