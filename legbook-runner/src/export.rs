//! Artifact export: trade CSVs, failure reports and the run manifest.
//!
//! Every file is written to a temporary sibling first and renamed into place,
//! so a reader never observes a half-written CSV. A failed run writes no CSV;
//! it writes `{stem}.failed.json` instead and removes any stale CSV left by an
//! earlier run of the same variant.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use legbook_core::data::GapReport;
use legbook_core::ledger::{OutputRecord, RecordSchema, SCHEMA_VERSION};

use crate::config::LegbookConfig;
use crate::runner::{RunFailure, VariantRun};

/// Name of the matrix-level manifest inside the runs directory.
pub const MANIFEST_FILE: &str = "manifest.json";

// ─── CSV export ─────────────────────────────────────────────────────

/// Render records as CSV with the fixed `v2` header.
pub fn export_records_csv(records: &[OutputRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(RecordSchema::V2.columns())?;
    for rec in records {
        wtr.write_record(rec.csv_row())?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Write `contents` to `path` through a temporary file and a rename.
pub fn write_run_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let name = path
        .file_name()
        .with_context(|| format!("not a file path: {}", path.display()))?;
    let tmp = dir.join(format!(".{}.tmp", name.to_string_lossy()));
    std::fs::write(&tmp, contents).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move {} into place", path.display()))?;
    debug!(path = %path.display(), bytes = contents.len(), "wrote artifact");
    Ok(())
}

/// Write a variant's records to `{runs_dir}/{stem}.csv`, removing any
/// failure report left by an earlier run of the same variant.
pub fn write_variant_csv(runs_dir: &Path, run: &VariantRun) -> Result<PathBuf> {
    let stem = run.variant.file_stem(&run.symbol);
    remove_stale(&runs_dir.join(format!("{stem}.failed.json")))?;
    let path = runs_dir.join(format!("{stem}.csv"));
    let csv = export_records_csv(&run.outcome.records)?;
    write_run_atomically(&path, csv.as_bytes())?;
    Ok(path)
}

/// Write a failed run's report to `{runs_dir}/{stem}.failed.json`.
pub fn write_failure_report(runs_dir: &Path, failure: &RunFailure) -> Result<PathBuf> {
    remove_stale(&runs_dir.join(format!("{}.csv", failure.file_stem)))?;
    let path = runs_dir.join(format!("{}.failed.json", failure.file_stem));
    let json = serde_json::to_string_pretty(failure).context("failed to serialize failure report")?;
    write_run_atomically(&path, json.as_bytes())?;
    Ok(path)
}

fn remove_stale(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove stale {}", path.display()))?;
        debug!(path = %path.display(), "removed stale artifact");
    }
    Ok(())
}

// ─── Manifest ───────────────────────────────────────────────────────

/// A rejected entry, flattened for the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedEntry {
    pub kind: String,
    pub message: String,
}

/// Reproducibility record of one finished variant run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub symbol: String,
    pub variant: String,
    pub profile_run: String,
    pub dataset_hash: String,
    pub file: String,
    pub entries_considered: usize,
    pub records: usize,
    pub closed_positions: usize,
    pub open_positions: usize,
    pub initial_equity: f64,
    pub final_equity: f64,
    pub gaps: Vec<GapReport>,
    pub resumed_gaps: Vec<GapReport>,
    pub rejected_entries: Vec<RejectedEntry>,
}

impl RunManifest {
    pub fn from_run(run: &VariantRun, file: &Path) -> Self {
        let outcome = &run.outcome;
        Self {
            run_id: run.run_id.clone(),
            symbol: run.symbol.clone(),
            variant: run.variant.to_string(),
            profile_run: run.variant.label(),
            dataset_hash: run.dataset_hash.to_string(),
            file: file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            entries_considered: run.entries_considered,
            records: outcome.records.len(),
            closed_positions: outcome.closed.len(),
            open_positions: outcome.open.len(),
            initial_equity: outcome.initial_equity,
            final_equity: outcome.final_equity,
            gaps: outcome.gaps.clone(),
            resumed_gaps: outcome.resumed_gaps.clone(),
            rejected_entries: outcome
                .rejected_entries
                .iter()
                .map(|e| RejectedEntry {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                })
                .collect(),
        }
    }
}

/// Everything written by one matrix invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixManifest {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub config_hash: String,
    pub config: LegbookConfig,
    pub runs: Vec<RunManifest>,
    pub failures: Vec<RunFailure>,
}

impl MatrixManifest {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Write every result of a matrix and its `manifest.json` into `runs_dir`.
pub fn write_matrix(
    runs_dir: &Path,
    config: &LegbookConfig,
    results: &[Result<VariantRun, RunFailure>],
) -> Result<MatrixManifest> {
    let mut runs = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(run) => {
                let path = write_variant_csv(runs_dir, run)?;
                runs.push(RunManifest::from_run(run, &path));
            }
            Err(failure) => {
                write_failure_report(runs_dir, failure)?;
                failures.push(failure.clone());
            }
        }
    }

    let manifest = MatrixManifest {
        schema_version: SCHEMA_VERSION.to_string(),
        generated_at: Utc::now(),
        config_hash: config.config_hash()?,
        config: config.clone(),
        runs,
        failures,
    };
    let json = serde_json::to_string_pretty(&manifest).context("failed to serialize manifest")?;
    write_run_atomically(&runs_dir.join(MANIFEST_FILE), json.as_bytes())?;
    info!(
        dir = %runs_dir.display(),
        runs = manifest.runs.len(),
        failures = manifest.failures.len(),
        "matrix written"
    );
    Ok(manifest)
}

/// Load a matrix manifest back from a runs directory.
pub fn load_manifest(runs_dir: &Path) -> Result<MatrixManifest> {
    let path = runs_dir.join(MANIFEST_FILE);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let manifest: MatrixManifest =
        serde_json::from_str(&json).context("failed to deserialize manifest")?;
    if RecordSchema::parse(&manifest.schema_version).is_none() {
        anyhow::bail!("unsupported record schema '{}'", manifest.schema_version);
    }
    Ok(manifest)
}
