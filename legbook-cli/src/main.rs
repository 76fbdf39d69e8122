//! Legbook CLI: run the variant matrix and summarize its results.
//!
//! Commands:
//! - `run`: replay entry signals over minute bars for every symbol × variant,
//!   writing one `v2` trade CSV per run plus `manifest.json`
//! - `summarize`: aggregate `trades_*.csv` over a trailing window and pick
//!   the best variant
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use legbook_core::data::GapPolicy;
use legbook_runner::{
    load_entries_csv, load_symbols, run_matrix, summarize_runs_dir, write_matrix, LegbookConfig,
    MatrixManifest, VariantSummary,
};

#[derive(Parser)]
#[command(name = "legbook", about = "Legbook CLI: minute-bar leg-exit backtester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum GapPolicyArg {
    Fail,
    Resume,
}

impl From<GapPolicyArg> for GapPolicy {
    fn from(arg: GapPolicyArg) -> Self {
        match arg {
            GapPolicyArg::Fail => GapPolicy::Fail,
            GapPolicyArg::Resume => GapPolicy::Resume,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run every symbol × variant and write trade CSVs.
    Run {
        /// Path to a TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Symbols to run (overrides [run].symbols).
        #[arg(long, num_args = 1..)]
        symbols: Vec<String>,

        /// File with one symbol per line (overrides [run].symbols).
        #[arg(long, conflicts_with = "symbols")]
        symbols_file: Option<PathBuf>,

        /// Entry signal CSV (overrides [data].entries).
        #[arg(long)]
        entries: Option<PathBuf>,

        /// Bar directory (overrides [data].data_dir).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Output directory (overrides [data].runs_dir).
        #[arg(long)]
        runs_dir: Option<PathBuf>,

        /// What to do on gaps too long to forward-fill (overrides [gaps].policy).
        #[arg(long, value_enum)]
        gap_policy: Option<GapPolicyArg>,

        /// Also write the trailing summary into the runs directory.
        #[arg(long, default_value_t = false)]
        summarize: bool,
    },
    /// Aggregate trade CSVs over a trailing window and rank the variants.
    Summarize {
        /// Directory containing trades_*.csv files.
        #[arg(long, default_value = "runs")]
        runs_dir: PathBuf,

        /// Where to write summary_{days}d.csv/.json and best_variant.txt.
        #[arg(long, default_value = "runs")]
        out: PathBuf,

        /// Trailing window in days.
        #[arg(long, default_value_t = 30)]
        days: u32,

        /// Drawdown cap in percent for ranking eligibility.
        #[arg(long, default_value_t = 5.0)]
        max_dd_cap: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            symbols,
            symbols_file,
            entries,
            data_dir,
            runs_dir,
            gap_policy,
            summarize,
        } => {
            let mut cfg = match config {
                Some(path) => LegbookConfig::from_file(&path)?,
                None => LegbookConfig::default(),
            };
            if let Some(path) = symbols_file {
                cfg.run.symbols = load_symbols(&path)?;
            } else if !symbols.is_empty() {
                cfg.run.symbols = symbols;
            }
            if let Some(path) = entries {
                cfg.data.entries = path;
            }
            if let Some(dir) = data_dir {
                cfg.data.data_dir = dir;
            }
            if let Some(dir) = runs_dir {
                cfg.data.runs_dir = dir;
            }
            if let Some(policy) = gap_policy {
                cfg.gaps.policy = policy.into();
            }
            cfg.validate()?;
            run_cmd(&cfg, summarize)
        }
        Commands::Summarize {
            runs_dir,
            out,
            days,
            max_dd_cap,
        } => summarize_cmd(&runs_dir, &out, days, max_dd_cap),
    }
}

fn run_cmd(cfg: &LegbookConfig, summarize: bool) -> Result<()> {
    if cfg.run.symbols.is_empty() {
        bail!("no symbols: set [run].symbols or pass --symbols / --symbols-file");
    }

    let entries = load_entries_csv(&cfg.data.entries)
        .with_context(|| format!("failed to load entries from {}", cfg.data.entries.display()))?;
    info!(
        symbols = cfg.run.symbols.len(),
        variants = cfg.run.variants.len(),
        entries = entries.len(),
        "starting variant matrix"
    );

    let results = run_matrix(cfg, &cfg.run.symbols, &entries)?;
    let manifest = write_matrix(&cfg.data.runs_dir, cfg, &results)?;
    print_matrix(&manifest);

    if summarize && !manifest.runs.is_empty() {
        let ranked = summarize_runs_dir(
            &cfg.data.runs_dir,
            &cfg.data.runs_dir,
            cfg.run.summary_days,
            cfg.run.max_dd_cap_pct,
        )?;
        print_ranking(&ranked, cfg.run.summary_days);
    }

    if !manifest.succeeded() {
        for f in &manifest.failures {
            warn!(symbol = %f.symbol, variant = %f.variant, kind = %f.kind, "{}", f.message);
        }
        bail!(
            "{} of {} run(s) failed; see *.failed.json in {}",
            manifest.failures.len(),
            manifest.failures.len() + manifest.runs.len(),
            cfg.data.runs_dir.display()
        );
    }
    Ok(())
}

fn summarize_cmd(runs_dir: &Path, out: &Path, days: u32, max_dd_cap: f64) -> Result<()> {
    if days == 0 {
        bail!("--days must be at least 1");
    }
    let ranked = summarize_runs_dir(runs_dir, out, days, max_dd_cap)?;
    print_ranking(&ranked, days);
    println!("Wrote summary_{days}d.csv, summary_{days}d.json, best_variant.txt to {}", out.display());
    Ok(())
}

fn print_matrix(manifest: &MatrixManifest) {
    println!();
    println!("=== Variant Matrix ===");
    println!("Config hash:    {}", manifest.config_hash);
    for run in &manifest.runs {
        println!(
            "{:<14} {:<10} legs {:>4}  rejected {:>3}  equity {:>12.2} -> {:>12.2}",
            run.symbol,
            run.variant,
            run.records,
            run.rejected_entries.len(),
            run.initial_equity,
            run.final_equity
        );
    }
    for failure in &manifest.failures {
        println!(
            "{:<14} {:<10} FAILED ({})",
            failure.symbol, failure.variant, failure.kind
        );
    }
}

fn print_ranking(ranked: &[VariantSummary], days: u32) {
    println!();
    println!("=== Top variants, last {days}d (MaxDD cap preferred) ===");
    for (i, s) in ranked.iter().enumerate() {
        println!(
            "{:>2}. {:<14} {:<16} trades {:>4}  equity {:>+8.3}%  maxDD {:>7.3}%  SL {:>5.3}  TP2 {:>5.3}",
            i + 1,
            s.symbol,
            s.variant,
            s.trades,
            s.equity_change_pct,
            s.max_dd_pct,
            s.sl_rate,
            s.tp2_rate
        );
    }
}
