//! Legbook Runner: variant orchestration on top of `legbook-core`.
//!
//! This crate provides:
//! - TOML configuration (`[exits]`, `[gaps]`, `[run]`, `[data]`)
//! - CSV adapters for minute bars, entry signals and symbol lists
//! - The variant matrix (SAFE/FAST × risk percent), run in parallel
//! - Atomic export of `v2` trade CSVs, failure reports and the run manifest
//! - Trailing-window summaries and best-variant selection

pub mod config;
pub mod data_loader;
pub mod export;
pub mod runner;
pub mod summary;
pub mod variant;

pub use config::{ConfigError, DataSection, LegbookConfig, RunSection};
pub use data_loader::{
    dataset_hash, load_bars_csv, load_entries_csv, load_symbol_bars, load_symbols, normalize_symbol,
    resolve_bar_file, LoadError,
};
pub use export::{
    export_records_csv, load_manifest, write_failure_report, write_matrix, write_run_atomically,
    MatrixManifest, RunManifest,
};
pub use runner::{
    entry_window, run_matrix, run_variant, select_entries, RunError, RunFailure, SymbolData, VariantRun,
};
pub use summary::{rank_variants, summarize_runs_dir, summarize_variant, write_summary, VariantSummary};
pub use variant::{Profile, Variant};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<LegbookConfig>();
        assert_sync::<LegbookConfig>();
        assert_send::<Variant>();
        assert_sync::<Variant>();
    }

    #[test]
    fn shared_run_inputs_are_send_sync() {
        assert_send::<SymbolData>();
        assert_sync::<SymbolData>();
    }

    #[test]
    fn run_results_are_send_sync() {
        assert_send::<VariantRun>();
        assert_sync::<VariantRun>();
        assert_send::<RunFailure>();
        assert_sync::<RunFailure>();
        assert_send::<RunError>();
        assert_sync::<RunError>();
    }

    #[test]
    fn summary_is_send_sync() {
        assert_send::<VariantSummary>();
        assert_sync::<VariantSummary>();
    }
}
