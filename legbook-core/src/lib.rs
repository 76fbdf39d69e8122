//! Legbook Core: bars, gap normalizer, position lifecycle, leg ledger.
//!
//! This crate contains the backtest execution engine:
//! - Domain types (bars, entry signals, positions, legs)
//! - Gap normalizer: forward-fills short gaps, flags long ones
//! - Position lifecycle state machine with a fixed per-bar evaluation order
//! - Ledger producing one output record per executed leg
//!
//! Replay is single-threaded per run; independent runs share nothing mutable
//! and can be fanned out freely.

pub mod data;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;

pub use error::EngineError;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types handed across runner threads are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::EntrySignal>();
        require_sync::<domain::EntrySignal>();
        require_send::<domain::Position>();
        require_sync::<domain::Position>();
        require_send::<domain::RunId>();
        require_sync::<domain::RunId>();

        // Data
        require_send::<data::NormalizedSeries>();
        require_sync::<data::NormalizedSeries>();
        require_send::<data::GapReport>();
        require_sync::<data::GapReport>();

        // Engine
        require_send::<engine::Engine>();
        require_sync::<engine::Engine>();
        require_send::<engine::RunOutcome>();
        require_sync::<engine::RunOutcome>();
        require_send::<EngineError>();
        require_sync::<EngineError>();

        // Ledger
        require_send::<ledger::OutputRecord>();
        require_sync::<ledger::OutputRecord>();
    }

    /// Architecture contract: bar evaluation cannot see the ledger or other positions.
    #[test]
    fn evaluate_bar_is_a_function_of_position_bar_and_rules() {
        fn _check(
            position: &domain::Position,
            bar: &domain::Bar,
            rules: &engine::ExitRules,
        ) -> engine::BarOutcome {
            engine::evaluate_bar(position, bar, rules)
        }
    }
}
