//! Trailing-window aggregation of variant runs and best-variant selection.
//!
//! Reads `trades_*.csv` files back, summarizes each over the last `days` days
//! (counted back from its latest exit), ranks the summaries under a drawdown
//! cap and writes `summary_{days}d.csv`, `summary_{days}d.json` and
//! `best_variant.txt`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use legbook_core::domain::LegName;
use legbook_core::ledger::OutputRecord;

use crate::export::write_run_atomically;

/// Combined file written by older tooling; never summarized.
const ALL_VARIANTS_FILE: &str = "trades_all_variants.csv";

/// Reason label of an initial stop-out.
const STOP_LOSS_REASON: &str = "ExitA_SL";

/// Aggregate statistics of one variant run over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSummary {
    pub symbol: String,
    pub variant: String,
    /// Closed positions (terminal legs) in the window.
    pub trades: usize,
    pub trades_per_day: f64,
    pub sum_pnl_usd: f64,
    pub sum_pnl_pct: f64,
    pub equity_start: f64,
    pub equity_end: f64,
    pub equity_change_pct: f64,
    /// Worst peak-to-trough drawdown in percent (zero or negative).
    pub max_dd_pct: f64,
    pub sl_rate: f64,
    pub tp2_rate: f64,
    #[serde(rename = "avg_R_terminal")]
    pub avg_r_terminal: f64,
}

impl VariantSummary {
    fn empty(symbol: &str, label: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            variant: label.to_string(),
            trades: 0,
            trades_per_day: 0.0,
            sum_pnl_usd: 0.0,
            sum_pnl_pct: 0.0,
            equity_start: 0.0,
            equity_end: 0.0,
            equity_change_pct: 0.0,
            max_dd_pct: 0.0,
            sl_rate: 0.0,
            tp2_rate: 0.0,
            avg_r_terminal: 0.0,
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Worst drawdown of an equity path, in percent, measured from `start`.
fn max_drawdown_pct(start: f64, path: impl IntoIterator<Item = f64>) -> f64 {
    let mut peak = start;
    let mut worst = 0.0_f64;
    for equity in path {
        peak = peak.max(equity);
        if peak > 0.0 {
            worst = worst.min((equity / peak - 1.0) * 100.0);
        }
    }
    worst
}

/// Summarize `records` of one variant run over the trailing `days` days.
pub fn summarize_variant(records: &[OutputRecord], label: &str, days: u32) -> VariantSummary {
    let symbol = records.first().map(|r| r.symbol.as_str()).unwrap_or("");
    let Some(last_exit) = records.iter().map(|r| r.time_exit).max() else {
        return VariantSummary::empty(symbol, label);
    };
    let cutoff = last_exit - Duration::days(i64::from(days));

    let mut window: Vec<&OutputRecord> = records.iter().filter(|r| r.time_exit >= cutoff).collect();
    window.sort_by_key(|r| r.time_exit);

    let terminal: Vec<&OutputRecord> = window.iter().copied().filter(|r| r.is_terminal()).collect();
    let trades = terminal.len();
    let active_days: BTreeSet<_> = terminal.iter().map(|r| r.time_exit.date_naive()).collect();
    let days_span = if terminal.is_empty() {
        days.max(1) as usize
    } else {
        active_days.len().max(1)
    };

    let equity_start = window.first().map(|r| r.equity_before).unwrap_or(0.0);
    let equity_end = window.last().map(|r| r.equity_after).unwrap_or(equity_start);
    let equity_change_pct = if equity_start != 0.0 {
        (equity_end / equity_start - 1.0) * 100.0
    } else {
        0.0
    };
    let max_dd_pct = max_drawdown_pct(equity_start, window.iter().map(|r| r.equity_after));

    let rate = |count: usize| if trades > 0 { count as f64 / trades as f64 } else { 0.0 };
    let sl_count = terminal.iter().filter(|r| r.reason == STOP_LOSS_REASON).count();
    let tp2_count = terminal.iter().filter(|r| r.leg == LegName::Tp2).count();
    let avg_r_terminal = if trades > 0 {
        terminal.iter().map(|r| r.r_multiple).sum::<f64>() / trades as f64
    } else {
        0.0
    };

    VariantSummary {
        symbol: symbol.to_string(),
        variant: label.to_string(),
        trades,
        trades_per_day: round_to(trades as f64 / days_span as f64, 3),
        sum_pnl_usd: round_to(window.iter().map(|r| r.account_pnl_usd).sum(), 2),
        sum_pnl_pct: round_to(window.iter().map(|r| r.account_pnl_pct).sum(), 3),
        equity_start: round_to(equity_start, 2),
        equity_end: round_to(equity_end, 2),
        equity_change_pct: round_to(equity_change_pct, 3),
        max_dd_pct: round_to(max_dd_pct, 3),
        sl_rate: round_to(rate(sl_count), 3),
        tp2_rate: round_to(rate(tp2_count), 3),
        avg_r_terminal: round_to(avg_r_terminal, 3),
    }
}

/// Rank by equity change (desc), then SL rate (asc).
///
/// Only variants whose drawdown is not worse than `-max_dd_cap_pct` are
/// ranked; if none qualifies, all are.
pub fn rank_variants(summaries: Vec<VariantSummary>, max_dd_cap_pct: f64) -> Vec<VariantSummary> {
    let (eligible, rest): (Vec<_>, Vec<_>) = summaries
        .into_iter()
        .partition(|s| s.max_dd_pct >= -max_dd_cap_pct);
    let mut ranked = if eligible.is_empty() { rest } else { eligible };
    ranked.sort_by(|a, b| {
        b.equity_change_pct
            .total_cmp(&a.equity_change_pct)
            .then(a.sl_rate.total_cmp(&b.sl_rate))
    });
    ranked
}

/// Paths written by [`write_summary`].
#[derive(Debug, Clone)]
pub struct SummaryFiles {
    pub csv: PathBuf,
    pub json: PathBuf,
    pub best: PathBuf,
}

/// Write the ranked table as CSV and JSON plus the winner's label.
pub fn write_summary(dir: &Path, days: u32, ranked: &[VariantSummary]) -> Result<SummaryFiles> {
    let Some(best) = ranked.first() else {
        bail!("no variant summaries to write");
    };

    let mut wtr = csv::Writer::from_writer(vec![]);
    for row in ranked {
        wtr.serialize(row)?;
    }
    let csv = wtr.into_inner().context("failed to flush CSV writer")?;
    let json = serde_json::to_string_pretty(ranked).context("failed to serialize summary")?;

    let files = SummaryFiles {
        csv: dir.join(format!("summary_{days}d.csv")),
        json: dir.join(format!("summary_{days}d.json")),
        best: dir.join("best_variant.txt"),
    };
    write_run_atomically(&files.csv, &csv)?;
    write_run_atomically(&files.json, json.as_bytes())?;
    write_run_atomically(&files.best, best.variant.as_bytes())?;
    info!(dir = %dir.display(), best = %best.variant, variants = ranked.len(), "summary written");
    Ok(files)
}

// ─── Reading runs back ──────────────────────────────────────────────

/// `trades_*.csv` files of a runs directory, sorted by name.
pub fn list_variant_files(runs_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(runs_dir)
        .with_context(|| format!("failed to list {}", runs_dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with("trades_") && name.ends_with(".csv") && name != ALL_VARIANTS_FILE {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read a trade CSV written by the exporter.
pub fn read_records(path: &Path) -> Result<Vec<OutputRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        let rec: OutputRecord = row.with_context(|| format!("bad record in {}", path.display()))?;
        records.push(rec);
    }
    Ok(records)
}

/// Label of a trade file: the `profile_run` of its first record, else the file stem.
fn label_of(path: &Path, records: &[OutputRecord]) -> String {
    records
        .first()
        .map(|r| r.profile_run.clone())
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default()
}

/// Summarize, rank and write every trade file of `runs_dir` into `out`.
pub fn summarize_runs_dir(
    runs_dir: &Path,
    out: &Path,
    days: u32,
    max_dd_cap_pct: f64,
) -> Result<Vec<VariantSummary>> {
    let files = list_variant_files(runs_dir)?;
    if files.is_empty() {
        bail!("no trades_*.csv files found in {}", runs_dir.display());
    }

    let mut summaries = Vec::new();
    for path in &files {
        let records = read_records(path)?;
        if records.is_empty() {
            debug!(path = %path.display(), "skipping empty trade file");
            continue;
        }
        summaries.push(summarize_variant(&records, &label_of(path, &records), days));
    }
    if summaries.is_empty() {
        bail!("no records in {} trade file(s)", files.len());
    }

    let ranked = rank_variants(summaries, max_dd_cap_pct);
    write_summary(out, days, &ranked)?;
    Ok(ranked)
}
