//! Variant runner: one engine instance per instrument × variant.
//!
//! Bars are loaded and normalized once per instrument and shared read-only by
//! every variant of that instrument. Variants run in parallel with rayon; each
//! result is either a finished [`VariantRun`] or a [`RunFailure`] describing
//! why that run was aborted. One failed run never stops the others.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use legbook_core::data::{normalize, normalize_window, GapConfig, NormalizedSeries};
use legbook_core::domain::{Bar, DatasetHash, EntrySignal, PositionId, RunId};
use legbook_core::engine::{Engine, EngineConfig, RunOutcome};
use legbook_core::EngineError;

use crate::config::{ConfigError, LegbookConfig};
use crate::data_loader::{dataset_hash, load_symbol_bars, normalize_symbol, LoadError};
use crate::variant::Variant;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

impl RunError {
    /// Short machine-readable kind, used in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Config(_) => "ConfigError",
            RunError::Data(LoadError::NoData { .. }) => "NoDataError",
            RunError::Data(_) => "LoadError",
            RunError::Engine(e) => e.kind(),
        }
    }
}

/// One instrument's bars, normalized once and shared by all its variants.
#[derive(Debug, Clone)]
pub struct SymbolData {
    pub symbol: String,
    pub series: NormalizedSeries,
    pub dataset_hash: DatasetHash,
}

impl SymbolData {
    /// Validate and normalize `bars`. With a `window`, missing bars at its
    /// edges are reported as leading/trailing gaps.
    ///
    /// # Errors
    /// `NoData` for an empty bar stream; engine errors from normalization.
    pub fn prepare(
        symbol: &str,
        bars: &[Bar],
        gaps: &GapConfig,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Self, RunError> {
        let symbol = normalize_symbol(symbol);
        if bars.is_empty() {
            return Err(LoadError::NoData { symbol }.into());
        }
        let series = match window {
            Some((start, end)) => normalize_window(bars, gaps, &symbol, start, end)?,
            None => normalize(bars, gaps)?,
        };
        Ok(Self {
            symbol,
            series,
            dataset_hash: dataset_hash(bars),
        })
    }

    /// Load the instrument's bar file from `data_dir` and normalize it.
    pub fn load(
        data_dir: &Path,
        symbol: &str,
        gaps: &GapConfig,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Self, RunError> {
        let bars = load_symbol_bars(data_dir, symbol)?;
        Self::prepare(symbol, &bars, gaps, window)
    }
}

/// Span the bars of `symbol` must cover: from its first entry to the time
/// limit after its last one, aligned down to the bar grid. `None` without entries.
pub fn entry_window(
    entries: &[EntrySignal],
    symbol: &str,
    gaps: &GapConfig,
    time_limit: Duration,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut times = entries.iter().filter(|e| e.instrument == symbol).map(|e| e.timestamp);
    let first = times.next()?;
    let (start, last) = times.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
    let step = gaps.bar_interval_secs;
    let align = |t: DateTime<Utc>| t - Duration::seconds(t.timestamp().rem_euclid(step));
    Some((align(start), align(last + time_limit)))
}

/// A finished run of one instrument × variant.
#[derive(Debug, Clone)]
pub struct VariantRun {
    pub symbol: String,
    pub variant: Variant,
    pub run_id: String,
    pub dataset_hash: DatasetHash,
    /// Entries selected for this variant before entry resolution.
    pub entries_considered: usize,
    pub outcome: RunOutcome,
}

/// Why one instrument × variant run produced no output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub symbol: String,
    pub variant: String,
    /// Output file stem the run would have written.
    pub file_stem: String,
    pub kind: String,
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub position_ids: Vec<PositionId>,
}

impl RunFailure {
    pub fn new(symbol: &str, variant: &Variant, error: &RunError) -> Self {
        let (timestamp, position_ids) = match error {
            RunError::Engine(e) => engine_context(e),
            _ => (None, Vec::new()),
        };
        Self {
            symbol: symbol.to_string(),
            variant: variant.to_string(),
            file_stem: variant.file_stem(symbol),
            kind: error.kind().to_string(),
            message: error.to_string(),
            timestamp,
            position_ids,
        }
    }
}

fn engine_context(error: &EngineError) -> (Option<DateTime<Utc>>, Vec<PositionId>) {
    match error {
        EngineError::DataGap {
            gap_start,
            open_positions,
            ..
        } => (Some(*gap_start), open_positions.clone()),
        EngineError::MalformedBar { timestamp, .. } | EngineError::OrphanEntry { timestamp, .. } => {
            (Some(*timestamp), Vec::new())
        }
        EngineError::AccountingInvariant {
            position_id,
            timestamp,
            ..
        }
        | EngineError::InvalidRecord {
            position_id,
            timestamp,
            ..
        } => (Some(*timestamp), vec![*position_id]),
        EngineError::InvalidConfig(_) => (None, Vec::new()),
    }
}

/// Entries of `symbol` emitted by the variant's profile, with the variant risk applied.
pub fn select_entries(entries: &[EntrySignal], symbol: &str, variant: &Variant) -> Vec<EntrySignal> {
    entries
        .iter()
        .filter(|e| e.instrument == symbol && variant.profile.matches(&e.variant_tag))
        .map(|e| EntrySignal {
            risk_percent: variant.risk_percent,
            ..e.clone()
        })
        .collect()
}

/// Replay one variant over a prepared instrument.
pub fn run_variant(
    data: &SymbolData,
    entries: &[EntrySignal],
    variant: &Variant,
    config: &EngineConfig,
    config_hash: &str,
) -> Result<VariantRun, EngineError> {
    let selected = select_entries(entries, &data.symbol, variant);
    let engine = Engine::new(config.clone())?;
    let meta = variant.run_meta(config.rules.time_limit_minutes);
    let outcome = engine.run(&data.series, &selected, meta)?;

    if !outcome.rejected_entries.is_empty() {
        warn!(
            symbol = %data.symbol,
            variant = %variant,
            rejected = outcome.rejected_entries.len(),
            "entries rejected"
        );
    }
    info!(
        symbol = %data.symbol,
        variant = %variant,
        records = outcome.records.len(),
        final_equity = outcome.final_equity,
        "variant finished"
    );

    let run_id = RunId::new(config_hash, data.dataset_hash.clone(), variant.to_string()).hash();
    Ok(VariantRun {
        symbol: data.symbol.clone(),
        variant: *variant,
        run_id,
        dataset_hash: data.dataset_hash.clone(),
        entries_considered: selected.len(),
        outcome,
    })
}

/// Run every configured symbol × variant in parallel.
///
/// Results come back in symbol-major, variant-minor order regardless of
/// scheduling. Only configuration problems fail the whole matrix.
pub fn run_matrix(
    config: &LegbookConfig,
    symbols: &[String],
    entries: &[EntrySignal],
) -> Result<Vec<Result<VariantRun, RunFailure>>, RunError> {
    let variants = config.variants()?;
    let engine_config = config.engine_config();
    let config_hash = config.config_hash()?;

    let time_limit = engine_config.rules.time_limit();
    let prepared: Vec<(String, Result<SymbolData, RunError>)> = symbols
        .par_iter()
        .map(|s| {
            let symbol = normalize_symbol(s);
            let window = entry_window(entries, &symbol, &config.gaps, time_limit);
            let data = SymbolData::load(&config.data.data_dir, &symbol, &config.gaps, window);
            (symbol, data)
        })
        .collect();

    let jobs: Vec<(&str, &Result<SymbolData, RunError>, &Variant)> = prepared
        .iter()
        .flat_map(|(symbol, data)| variants.iter().map(move |v| (symbol.as_str(), data, v)))
        .collect();

    let results = jobs
        .into_par_iter()
        .map(|(symbol, data, variant)| {
            let error = match data {
                Ok(data) => match run_variant(data, entries, variant, &engine_config, &config_hash) {
                    Ok(run) => return Ok(run),
                    Err(e) => RunError::from(e),
                },
                Err(e) => return Err(failed(symbol, variant, e)),
            };
            Err(failed(symbol, variant, &error))
        })
        .collect();
    Ok(results)
}

fn failed(symbol: &str, variant: &Variant, error: &RunError) -> RunFailure {
    warn!(symbol, variant = %variant, kind = error.kind(), error = %error, "run failed");
    RunFailure::new(symbol, variant, error)
}
