//! Integration tests for the CSV adapters: bar files, entry files, symbol lists.

use std::fs;
use std::path::Path;

use chrono::{Duration, TimeZone, Utc};
use legbook_core::data::{GapConfig, GapKind};
use legbook_core::domain::{Direction, EntrySignal};
use legbook_core::engine::EngineConfig;
use legbook_runner::data_loader::{
    dataset_hash, load_bars_csv, load_entries_csv, load_symbol_bars, load_symbols, resolve_bar_file,
    LoadError,
};
use legbook_runner::runner::{entry_window, run_variant, RunError, SymbolData};
use legbook_runner::variant::{Profile, Variant};

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn loads_long_and_short_column_names() {
    let dir = tempfile::tempdir().unwrap();
    let long = write(
        dir.path(),
        "a.csv",
        "time,open,high,low,close,volume\n\
         2024-03-04T09:00:00Z,100,101,99,100.5,12\n\
         2024-03-04T09:01:00Z,100.5,102,100,101,8\n",
    );
    let short = write(
        dir.path(),
        "b.csv",
        "t,o,h,l,c,v\n\
         1709542800000,100,101,99,100.5,12\n\
         1709542860000,100.5,102,100,101,8\n",
    );

    let a = load_bars_csv(&long, "CYBER/USDT:USDT").unwrap();
    let b = load_bars_csv(&short, "CYBERUSDT").unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 2);
    assert_eq!(a[0].symbol, "CYBERUSDT");
    assert_eq!(a[0].timestamp, Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap());
    assert_eq!(a[1].close, 101.0);
    assert_eq!(dataset_hash(&a), dataset_hash(&b));
}

#[test]
fn naive_times_are_utc_and_volume_is_optional() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "bars.csv",
        "Time,Open,High,Low,Close\n2024-03-04 09:00:00,1,1,1,1\n",
    );
    let bars = load_bars_csv(&path, "X").unwrap();
    assert_eq!(bars[0].timestamp, Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap());
    assert_eq!(bars[0].volume, 0.0);
}

#[test]
fn missing_column_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "bars.csv", "time,open,high,close\n2024-03-04T09:00:00Z,1,1,1\n");
    match load_bars_csv(&path, "X") {
        Err(LoadError::MissingColumn { column, .. }) => assert_eq!(column, "low"),
        other => panic!("expected missing column, got {other:?}"),
    }
}

#[test]
fn unparseable_cell_reports_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "bars.csv",
        "time,open,high,low,close\n2024-03-04T09:00:00Z,1,1,1,1\n2024-03-04T09:01:00Z,1,one,1,1\n",
    );
    match load_bars_csv(&path, "X") {
        Err(LoadError::BadCell { line, reason, .. }) => {
            assert_eq!(line, 3);
            assert!(reason.contains("one"));
        }
        other => panic!("expected bad cell, got {other:?}"),
    }
}

#[test]
fn empty_price_cell_fails_normalization_not_loading() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "bars.csv",
        "time,open,high,low,close\n2024-03-04T09:00:00Z,1,1,1,1\n2024-03-04T09:01:00Z,1,,1,1\n",
    );
    let bars = load_bars_csv(&path, "X").unwrap();
    let err = SymbolData::prepare("X", &bars, &GapConfig::default(), None).unwrap_err();
    assert_eq!(err.kind(), "MalformedBarError");
}

#[test]
fn empty_bar_file_is_reported_as_no_data() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "CYBERUSDT_1m.csv", "time,open,high,low,close\n");

    let err = SymbolData::load(dir.path(), "CYBER/USDT:USDT", &GapConfig::default(), None).unwrap_err();
    assert!(matches!(err, RunError::Data(LoadError::NoData { ref symbol }) if symbol == "CYBERUSDT"));
    assert_eq!(err.kind(), "NoDataError");
}

#[test]
fn edge_gaps_around_the_entry_window_reach_the_run() {
    let dir = tempfile::tempdir().unwrap();
    // bars cover 09:05..09:59; the entry at 09:00 needs 09:00..10:30
    let mut csv = String::from("time,open,high,low,close\n");
    let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 5, 0).unwrap();
    for m in 0..55 {
        let ts = (start + Duration::minutes(m)).to_rfc3339();
        csv.push_str(&format!("{ts},100,100.5,99.5,100\n"));
    }
    let path = write(dir.path(), "CYBERUSDT_1m.csv", &csv);
    let bars = load_bars_csv(&path, "CYBERUSDT").unwrap();

    let entries = vec![EntrySignal {
        timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(),
        instrument: "CYBERUSDT".into(),
        direction: Direction::Long,
        risk_percent: 0.0,
        variant_tag: "SAFE".into(),
    }];
    let config = EngineConfig::default();
    let window = entry_window(&entries, "CYBERUSDT", &config.gaps, config.rules.time_limit());
    let data = SymbolData::prepare("CYBERUSDT", &bars, &config.gaps, window).unwrap();
    assert_eq!(data.series.instrument(), "CYBERUSDT");

    let run = run_variant(&data, &entries, &Variant::new(Profile::Safe, 1.0), &config, "cfg").unwrap();
    let kinds: Vec<GapKind> = run.outcome.gaps.iter().map(|g| g.kind).collect();
    assert_eq!(kinds, vec![GapKind::Leading, GapKind::Trailing]);
    assert_eq!(run.outcome.gaps[0].missing_bars, 5);
    assert_eq!(run.outcome.gaps[1].missing_bars, 31);
    // the entry falls in the leading gap
    assert_eq!(run.outcome.rejected_entries.len(), 1);
    assert!(run.outcome.records.is_empty());
}

#[test]
fn bar_file_resolution_tries_both_layouts() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "BINANCE_1m_ARBUSDT.csv", "time,open,high,low,close\n");
    write(dir.path(), "CYBERUSDT_1m.csv", "time,open,high,low,close\n");

    let arb = resolve_bar_file(dir.path(), "ARB/USDT:USDT").unwrap();
    assert!(arb.ends_with("BINANCE_1m_ARBUSDT.csv"));
    let cyber = resolve_bar_file(dir.path(), "CYBERUSDT").unwrap();
    assert!(cyber.ends_with("CYBERUSDT_1m.csv"));

    match resolve_bar_file(dir.path(), "DOGEUSDT") {
        Err(LoadError::NoBarFile { tried, .. }) => {
            assert_eq!(tried, vec!["DOGEUSDT_1m.csv", "BINANCE_1m_DOGEUSDT.csv"]);
        }
        other => panic!("expected no bar file, got {other:?}"),
    }
    assert!(load_symbol_bars(dir.path(), "CYBERUSDT").unwrap().is_empty());
}

#[test]
fn entries_are_sorted_and_normalized() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "entries.csv",
        "time,symbol,direction,risk_percent,profile\n\
         2024-03-04T09:05:00Z,CYBER/USDT:USDT,short,0.5,fast\n\
         2024-03-04T09:01:00Z,ARBUSDT,LONG,,SAFE\n",
    );
    let entries = load_entries_csv(&path).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].instrument, "ARBUSDT");
    assert_eq!(entries[0].risk_percent, 0.0);
    assert_eq!(entries[0].variant_tag, "SAFE");
    assert_eq!(entries[1].instrument, "CYBERUSDT");
    assert_eq!(entries[1].direction, Direction::Short);
    assert_eq!(entries[1].variant_tag, "FAST");
}

#[test]
fn bad_direction_fails_entry_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "entries.csv",
        "time,symbol,direction,risk_percent,profile\n2024-03-04T09:05:00Z,ARBUSDT,flat,1,SAFE\n",
    );
    assert!(matches!(load_entries_csv(&path), Err(LoadError::BadCell { .. })));
}

#[test]
fn symbol_list_skips_comments_and_blanks() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "symbols.txt", "# majors\nCYBER/USDT:USDT\n\n  ARBUSDT  \n");
    assert_eq!(load_symbols(&path).unwrap(), vec!["CYBER/USDT:USDT", "ARBUSDT"]);
}
