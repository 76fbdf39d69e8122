//! CSV adapters for minute bars, entry signals and symbol lists.
//!
//! Bar files are looked up per instrument in a data directory under either
//! `{SYMBOL}_1m.csv` or `BINANCE_1m_{SYMBOL}.csv`. Column names are matched
//! case-insensitively with single-letter aliases (`t,o,h,l,c,v`). Times may be
//! RFC 3339, naive ISO (taken as UTC) or unix milliseconds.
//!
//! Empty OHLC cells are loaded as NaN so the gap normalizer rejects them as
//! malformed bars; cells that do not parse at all fail the load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use legbook_core::domain::{Bar, DatasetHash, Direction, EntrySignal};

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path}: missing column '{column}'")]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("{path} line {line}: {reason}")]
    BadCell {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("no data for '{symbol}': the bar stream is empty")]
    NoData { symbol: String },

    #[error("no bar file for '{symbol}' in {dir} (tried {tried:?})")]
    NoBarFile {
        symbol: String,
        dir: PathBuf,
        tried: Vec<String>,
    },
}

// ─── Symbols ────────────────────────────────────────────────────────

/// Map exchange notation to the flat file symbol: `CYBER/USDT:USDT` → `CYBERUSDT`.
pub fn normalize_symbol(symbol: &str) -> String {
    let trimmed = symbol.trim();
    let flat = match trimmed.split_once('/') {
        Some((base, quote)) => {
            let quote = quote.split(':').next().unwrap_or(quote);
            format!("{base}{quote}")
        }
        None => trimmed.to_string(),
    };
    flat.to_ascii_uppercase()
}

/// Read a symbol list: one per line, blank lines and `#` comments skipped.
pub fn load_symbols(path: &Path) -> Result<Vec<String>, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Find the bar file for `symbol` in `data_dir`.
pub fn resolve_bar_file(data_dir: &Path, symbol: &str) -> Result<PathBuf, LoadError> {
    let base = normalize_symbol(symbol);
    let candidates = [format!("{base}_1m.csv"), format!("BINANCE_1m_{base}.csv")];
    for name in &candidates {
        let path = data_dir.join(name);
        if path.is_file() {
            debug!(symbol, path = %path.display(), "resolved bar file");
            return Ok(path);
        }
    }
    Err(LoadError::NoBarFile {
        symbol: symbol.to_string(),
        dir: data_dir.to_path_buf(),
        tried: candidates.to_vec(),
    })
}

// ─── Cells ──────────────────────────────────────────────────────────

/// Parse a time cell: RFC 3339, naive ISO as UTC, or unix milliseconds.
pub fn parse_time(cell: &str) -> Option<DateTime<Utc>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(cell) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(cell, fmt) {
            return Some(naive.and_utc());
        }
    }
    let ms = cell.parse::<i64>().ok().or_else(|| {
        cell.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v as i64)
    })?;
    Utc.timestamp_millis_opt(ms).single()
}

fn parse_price(cell: &str) -> Result<f64, String> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(f64::NAN);
    }
    cell.parse::<f64>()
        .map_err(|_| format!("unparseable number '{cell}'"))
}

/// Column positions by canonical name, resolved once per file.
struct Columns {
    index: HashMap<&'static str, usize>,
}

impl Columns {
    fn resolve(
        path: &Path,
        headers: &csv::StringRecord,
        wanted: &[(&'static str, &[&str])],
        optional: &[&'static str],
    ) -> Result<Self, LoadError> {
        let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_ascii_lowercase()).collect();
        let mut index = HashMap::new();
        for (name, aliases) in wanted {
            let found = lowered
                .iter()
                .position(|h| h.as_str() == *name || aliases.contains(&h.as_str()));
            match found {
                Some(i) => {
                    index.insert(*name, i);
                }
                None if optional.contains(name) => {}
                None => {
                    return Err(LoadError::MissingColumn {
                        path: path.to_path_buf(),
                        column: *name,
                    })
                }
            }
        }
        Ok(Self { index })
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, name: &str) -> Option<&'r str> {
        self.index.get(name).and_then(|&i| record.get(i))
    }
}

fn open_reader(path: &Path) -> Result<csv::Reader<std::fs::File>, LoadError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

// ─── Bars ───────────────────────────────────────────────────────────

const BAR_COLUMNS: &[(&str, &[&str])] = &[
    ("time", &["t", "timestamp", "open_time"]),
    ("open", &["o"]),
    ("high", &["h"]),
    ("low", &["l"]),
    ("close", &["c"]),
    ("volume", &["v"]),
];

/// Load minute bars for `symbol` from a CSV file, in file order.
pub fn load_bars_csv(path: &Path, symbol: &str) -> Result<Vec<Bar>, LoadError> {
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .clone();
    let cols = Columns::resolve(path, &headers, BAR_COLUMNS, &["volume"])?;
    let symbol = normalize_symbol(symbol);

    let mut bars = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let bad = |reason: String| LoadError::BadCell {
            path: path.to_path_buf(),
            line,
            reason,
        };

        let time_cell = cols.get(&record, "time").unwrap_or("");
        let timestamp = parse_time(time_cell).ok_or_else(|| bad(format!("unparseable time '{time_cell}'")))?;
        let field = |name: &str| parse_price(cols.get(&record, name).unwrap_or("")).map_err(&bad);

        let volume = match cols.get(&record, "volume") {
            Some(cell) if !cell.trim().is_empty() => parse_price(cell).map_err(&bad)?,
            _ => 0.0,
        };
        bars.push(Bar {
            symbol: symbol.clone(),
            timestamp,
            open: field("open")?,
            high: field("high")?,
            low: field("low")?,
            close: field("close")?,
            volume,
        });
    }

    debug!(symbol = %symbol, bars = bars.len(), path = %path.display(), "loaded bars");
    Ok(bars)
}

/// Resolve and load the bar file of `symbol`.
pub fn load_symbol_bars(data_dir: &Path, symbol: &str) -> Result<Vec<Bar>, LoadError> {
    let path = resolve_bar_file(data_dir, symbol)?;
    load_bars_csv(&path, symbol)
}

// ─── Entries ────────────────────────────────────────────────────────

const ENTRY_COLUMNS: &[(&str, &[&str])] = &[
    ("time", &["t", "timestamp", "entry_time"]),
    ("symbol", &["instrument"]),
    ("direction", &["side"]),
    ("risk_percent", &["risk", "risk_perc"]),
    ("profile", &["variant", "variant_tag"]),
];

/// Load entry signals: `time, symbol, direction, risk_percent, profile`.
///
/// A missing risk cell defaults to zero and is overridden by the variant risk
/// at run time. Symbols are normalized to the flat file notation.
pub fn load_entries_csv(path: &Path) -> Result<Vec<EntrySignal>, LoadError> {
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .clone();
    let cols = Columns::resolve(path, &headers, ENTRY_COLUMNS, &["risk_percent"])?;

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let bad = |reason: String| LoadError::BadCell {
            path: path.to_path_buf(),
            line,
            reason,
        };

        let time_cell = cols.get(&record, "time").unwrap_or("");
        let timestamp = parse_time(time_cell).ok_or_else(|| bad(format!("unparseable time '{time_cell}'")))?;
        let direction: Direction = cols
            .get(&record, "direction")
            .unwrap_or("")
            .parse()
            .map_err(&bad)?;
        let symbol = cols.get(&record, "symbol").unwrap_or("");
        if symbol.is_empty() {
            return Err(bad("empty symbol".into()));
        }
        let risk_percent = match cols.get(&record, "risk_percent") {
            Some(cell) if !cell.is_empty() => cell
                .parse::<f64>()
                .map_err(|_| bad(format!("unparseable risk '{cell}'")))?,
            _ => 0.0,
        };
        let profile = cols.get(&record, "profile").unwrap_or("");
        if profile.is_empty() {
            warn!(line, symbol, "entry without profile tag matches no variant");
        }

        entries.push(EntrySignal {
            timestamp,
            instrument: normalize_symbol(symbol),
            direction,
            risk_percent,
            variant_tag: profile.to_ascii_uppercase(),
        });
    }

    entries.sort_by_key(|e| e.timestamp);
    debug!(entries = entries.len(), path = %path.display(), "loaded entries");
    Ok(entries)
}

/// BLAKE3 fingerprint of a bar series.
pub fn dataset_hash(bars: &[Bar]) -> DatasetHash {
    DatasetHash::of_bars(bars)
}
