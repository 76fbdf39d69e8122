//! Property tests for engine invariants.
//!
//! Uses proptest to verify, over random minute paths and entry schedules:
//! 1. Leg fractions of every closed position sum to one
//! 2. After TP1, no later leg fills worse than entry
//! 3. At most one leg per position per bar (stop excludes targets)
//! 4. Equity chains record to record and changes only at leg fills
//! 5. Replay is deterministic down to the written row bytes

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use legbook_core::data::{GapConfig, GapPolicy};
use legbook_core::domain::{Bar, Direction, EntrySignal, LegName};
use legbook_core::engine::{run_backtest, EngineConfig, RunOutcome};
use legbook_core::ledger::RunMeta;

// ── Strategies (proptest) ────────────────────────────────────────────

fn t(min: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 0, 0, 0).unwrap() + Duration::minutes(min)
}

/// A random walk of minute bars. Roughly one bar in twenty is dropped to
/// exercise forward-filling.
fn arb_bars() -> impl Strategy<Value = Vec<Bar>> {
    prop::collection::vec((-1.2..1.2_f64, 0.0..1.5_f64, 0..20u8), 60..400).prop_map(|steps| {
        let mut price = 100.0_f64;
        let mut bars = Vec::with_capacity(steps.len());
        for (i, (step, range, drop)) in steps.into_iter().enumerate() {
            let open = price;
            price = (price + step).max(5.0);
            if drop == 0 && i > 0 {
                continue;
            }
            bars.push(Bar {
                symbol: "PROPUSDT".into(),
                timestamp: t(i as i64),
                open,
                high: open.max(price) + range,
                low: (open.min(price) - range).max(0.5),
                close: price,
                volume: 1.0,
            });
        }
        bars
    })
}

fn arb_entries() -> impl Strategy<Value = Vec<EntrySignal>> {
    prop::collection::vec((0..400i64, any::<bool>(), 0.25..2.0_f64), 0..12).prop_map(|raw| {
        raw.into_iter()
            .map(|(min, is_long, risk)| EntrySignal {
                timestamp: t(min),
                instrument: "PROPUSDT".into(),
                direction: if is_long { Direction::Long } else { Direction::Short },
                risk_percent: risk,
                variant_tag: "SAFE".into(),
            })
            .collect()
    })
}

fn config() -> EngineConfig {
    EngineConfig {
        gaps: GapConfig {
            policy: GapPolicy::Resume,
            ..GapConfig::default()
        },
        ..EngineConfig::default()
    }
}

fn meta() -> RunMeta {
    RunMeta {
        profile_run: "risk 1.0 safe".into(),
        risk_perc_run: 1.0,
        time_limit_minutes: 90,
    }
}

fn replay(bars: &[Bar], entries: &[EntrySignal]) -> RunOutcome {
    run_backtest(bars, entries, &config(), meta()).expect("replay should not fail on valid bars")
}

proptest! {
    // ── 1. Accounting invariant ──────────────────────────────────────

    #[test]
    fn closed_positions_account_for_full_quantity(bars in arb_bars(), entries in arb_entries()) {
        let out = replay(&bars, &entries);
        prop_assert!(out.open.is_empty());
        for closed in &out.closed {
            let sum = closed.position.leg_fraction_sum();
            prop_assert!((sum - 1.0).abs() <= 1e-6, "fractions sum to {}", sum);
            prop_assert_eq!(closed.position.remaining_qty, 0.0);
        }
        prop_assert_eq!(out.closed.len() + out.rejected_entries.len(), entries.len());
    }

    // ── 2. Break-even floor ──────────────────────────────────────────

    #[test]
    fn no_leg_after_tp1_fills_worse_than_entry(bars in arb_bars(), entries in arb_entries()) {
        let out = replay(&bars, &entries);
        for closed in &out.closed {
            let p = &closed.position;
            if let Some(tp1_at) = p.legs.iter().position(|l| l.name == LegName::Tp1) {
                for leg in &p.legs[tp1_at + 1..] {
                    if leg.name == LegName::Residual {
                        continue;
                    }
                    prop_assert!(
                        p.pnl_per_unit(leg.fill_price) >= -1e-9,
                        "{} leg at {} worse than entry {}", leg.name, leg.fill_price, p.entry_price
                    );
                }
                prop_assert!(p.be_armed);
                prop_assert_eq!(p.stop_price, p.entry_price);
            }
        }
    }

    // ── 3. One leg per bar ───────────────────────────────────────────

    #[test]
    fn at_most_one_leg_per_position_per_bar(bars in arb_bars(), entries in arb_entries()) {
        let out = replay(&bars, &entries);
        for closed in &out.closed {
            let times: Vec<_> = closed.position.legs.iter().map(|l| l.fill_time).collect();
            for pair in times.windows(2) {
                prop_assert!(pair[0] < pair[1] || closed.position.legs.last().map(|l| l.name) == Some(LegName::Residual));
            }
            if let Some(sl) = closed.position.legs.iter().find(|l| l.name == LegName::Sl) {
                prop_assert!(closed.position.legs.iter().all(|l| l.fill_time != sl.fill_time || l.name == LegName::Sl));
            }
        }
    }

    // ── 4. Equity chain ──────────────────────────────────────────────

    #[test]
    fn equity_changes_only_at_leg_fills(bars in arb_bars(), entries in arb_entries()) {
        let out = replay(&bars, &entries);
        let mut equity = out.initial_equity;
        for rec in &out.records {
            prop_assert!((rec.equity_before - equity).abs() < 1e-9);
            prop_assert!((rec.equity_after - rec.equity_before - rec.account_pnl_usd).abs() < 1e-9);
            equity = rec.equity_after;
        }
        prop_assert!((equity - out.final_equity).abs() < 1e-9);
        prop_assert_eq!(out.equity_curve.len(), out.records.len());
    }

    // ── 5. Determinism ───────────────────────────────────────────────

    #[test]
    fn identical_input_gives_identical_rows(bars in arb_bars(), entries in arb_entries()) {
        let a = replay(&bars, &entries);
        let b = replay(&bars, &entries);
        let rows_a: Vec<Vec<String>> = a.records.iter().map(|r| r.csv_row()).collect();
        let rows_b: Vec<Vec<String>> = b.records.iter().map(|r| r.csv_row()).collect();
        prop_assert_eq!(rows_a, rows_b);
    }
}
