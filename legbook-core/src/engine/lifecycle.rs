//! Position lifecycle state machine.
//!
//! `OpenNoPartial -> OpenTp1Filled -> Closed`. Each bar transition is split in
//! two steps:
//!
//! 1. [`evaluate_bar`] is pure: it looks at the position, the bar and the
//!    rules, and describes what happens (`BarOutcome`).
//! 2. [`apply`] commits that outcome to the position and returns the leg that
//!    filled, if any.
//!
//! At most one leg fills per bar: the stop closes everything, TP2 is only
//! reachable on a bar after TP1, and the time exit runs only if nothing else
//! fired.

use chrono::{DateTime, Utc};

use super::rules::{ExitCheck, ExitRules, EVALUATION_ORDER};
use crate::domain::{Bar, ExitReason, Leg, LegName, Position, PositionPhase};

/// Why a bar was not evaluated against a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The position is already closed.
    Closed,
    /// The bar is at or before the entry fill.
    NotAfterEntry,
    /// The position was already evaluated at or after this bar.
    AlreadyEvaluated,
    /// Forward-filled or otherwise void bar: no executable price.
    NoExecutablePrice,
}

/// A leg fill described by [`evaluate_bar`], not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct LegFill {
    pub name: LegName,
    pub reason: ExitReason,
    pub qty: f64,
    pub price: f64,
    pub time: DateTime<Utc>,
    /// Stop level after the fill (relocated to entry by TP1).
    pub stop_after: f64,
    pub be_armed_after: bool,
    pub phase_after: PositionPhase,
    /// Unrealized percent at the bar close, recorded for time exits.
    pub unrealized_pct: Option<f64>,
}

/// Result of evaluating one bar against one position.
#[derive(Debug, Clone, PartialEq)]
pub enum BarOutcome {
    Skipped(SkipReason),
    /// Evaluated, nothing fired.
    Hold,
    Fill(LegFill),
}

impl BarOutcome {
    pub fn fill(&self) -> Option<&LegFill> {
        match self {
            BarOutcome::Fill(f) => Some(f),
            _ => None,
        }
    }
}

/// Evaluate `bar` against `position` in [`EVALUATION_ORDER`]. Pure.
pub fn evaluate_bar(position: &Position, bar: &Bar, rules: &ExitRules) -> BarOutcome {
    if !position.is_open() {
        return BarOutcome::Skipped(SkipReason::Closed);
    }
    if bar.timestamp <= position.entry_time {
        return BarOutcome::Skipped(SkipReason::NotAfterEntry);
    }
    if position.last_evaluated.is_some_and(|t| bar.timestamp <= t) {
        return BarOutcome::Skipped(SkipReason::AlreadyEvaluated);
    }
    if bar.is_void() {
        return BarOutcome::Skipped(SkipReason::NoExecutablePrice);
    }

    for check in EVALUATION_ORDER {
        let fill = match check {
            ExitCheck::StopLoss => check_stop(position, bar, rules),
            ExitCheck::TakeProfit1 => check_tp1(position, bar, rules),
            ExitCheck::TakeProfit2 => check_tp2(position, bar),
            ExitCheck::TimeExit => check_time_exit(position, bar, rules),
        };
        if let Some(fill) = fill {
            return BarOutcome::Fill(fill);
        }
    }
    BarOutcome::Hold
}

/// Commit `outcome` (produced by [`evaluate_bar`] for the bar at `bar_time`).
///
/// Skipped outcomes leave the position untouched; evaluated ones advance
/// `last_evaluated`. Returns the leg appended to the position.
pub fn apply(position: &mut Position, bar_time: DateTime<Utc>, outcome: &BarOutcome) -> Option<Leg> {
    match outcome {
        BarOutcome::Skipped(_) => None,
        BarOutcome::Hold => {
            position.last_evaluated = Some(bar_time);
            None
        }
        BarOutcome::Fill(fill) => {
            position.last_evaluated = Some(bar_time);
            Some(commit_fill(position, fill))
        }
    }
}

/// Leg closing whatever is left of `position` at the last observed close.
pub fn residual_fill(position: &Position, last_bar: &Bar) -> Option<LegFill> {
    if !position.is_open() || last_bar.close.is_nan() {
        return None;
    }
    Some(LegFill {
        name: LegName::Residual,
        reason: ExitReason::Residual,
        qty: position.remaining_qty,
        price: last_bar.close,
        time: last_bar.timestamp,
        stop_after: position.stop_price,
        be_armed_after: position.be_armed,
        phase_after: PositionPhase::Closed,
        unrealized_pct: None,
    })
}

/// Append the leg described by `fill` and move the position to its next state.
pub fn commit_fill(position: &mut Position, fill: &LegFill) -> Leg {
    let qty = fill.qty.min(position.remaining_qty);
    let leg = Leg {
        name: fill.name,
        reason: fill.reason,
        fraction: if position.initial_qty > 0.0 {
            qty / position.initial_qty
        } else {
            0.0
        },
        qty,
        fill_price: fill.price,
        fill_time: fill.time,
        pnl: qty * position.pnl_per_unit(fill.price),
        be_armed: fill.be_armed_after,
        unrealized_pct_at_exit: fill.unrealized_pct,
    };

    position.remaining_qty = if fill.phase_after == PositionPhase::Closed {
        0.0
    } else {
        position.remaining_qty - qty
    };
    // Stops only tighten.
    position.stop_price = position.direction.better_of(position.stop_price, fill.stop_after);
    position.be_armed = fill.be_armed_after;
    position.phase = fill.phase_after;
    position.legs.push(leg.clone());

    tracing::debug!(
        position = %position.id,
        instrument = %position.instrument,
        leg = %leg.name,
        price = leg.fill_price,
        qty = leg.qty,
        time = %leg.fill_time,
        "leg filled"
    );
    leg
}

fn check_stop(position: &Position, bar: &Bar, rules: &ExitRules) -> Option<LegFill> {
    let dir = position.direction;
    if !dir.reached_adverse(dir.adverse_extreme(bar), position.stop_price) {
        return None;
    }
    // A break-even touch at or past the time limit that also closes at or
    // beyond entry is the time exit floored at entry. Same price either way.
    let at_limit = bar.timestamp - position.entry_time >= rules.time_limit();
    let floored = position.be_armed && at_limit && dir.reached_adverse(bar.close, position.entry_price);
    let (name, reason, unrealized) = match (position.be_armed, floored) {
        (true, true) => (
            LegName::TimeExit,
            ExitReason::TimeBreakEven,
            Some(position.unrealized_pct(bar.close)),
        ),
        (true, false) => (LegName::Sl, ExitReason::BreakEvenStop, None),
        (false, _) => (LegName::Sl, ExitReason::StopLoss, None),
    };
    Some(LegFill {
        name,
        reason,
        qty: position.remaining_qty,
        price: position.stop_price,
        time: bar.timestamp,
        stop_after: position.stop_price,
        be_armed_after: position.be_armed,
        phase_after: PositionPhase::Closed,
        unrealized_pct: unrealized,
    })
}

fn check_tp1(position: &Position, bar: &Bar, rules: &ExitRules) -> Option<LegFill> {
    let dir = position.direction;
    if position.phase != PositionPhase::OpenNoPartial
        || !dir.reached_favorable(dir.favorable_extreme(bar), position.tp1_price)
    {
        return None;
    }
    Some(LegFill {
        name: LegName::Tp1,
        reason: ExitReason::TakeProfit1,
        qty: position.initial_qty * rules.tp1_fraction,
        price: position.tp1_price,
        time: bar.timestamp,
        stop_after: position.entry_price,
        be_armed_after: true,
        phase_after: PositionPhase::OpenTp1Filled,
        unrealized_pct: None,
    })
}

fn check_tp2(position: &Position, bar: &Bar) -> Option<LegFill> {
    let dir = position.direction;
    if position.phase != PositionPhase::OpenTp1Filled
        || !dir.reached_favorable(dir.favorable_extreme(bar), position.tp2_price)
    {
        return None;
    }
    Some(LegFill {
        name: LegName::Tp2,
        reason: ExitReason::TakeProfit2,
        qty: position.remaining_qty,
        price: position.tp2_price,
        time: bar.timestamp,
        stop_after: position.stop_price,
        be_armed_after: position.be_armed,
        phase_after: PositionPhase::Closed,
        unrealized_pct: None,
    })
}

fn check_time_exit(position: &Position, bar: &Bar, rules: &ExitRules) -> Option<LegFill> {
    if bar.timestamp - position.entry_time < rules.time_limit() {
        return None;
    }
    let dir = position.direction;
    let unrealized = position.unrealized_pct(bar.close);
    let floored = position.be_armed && dir.reached_adverse(bar.close, position.entry_price)
        && bar.close != position.entry_price;
    let (price, reason) = if floored {
        (position.entry_price, ExitReason::TimeBreakEven)
    } else if unrealized >= rules.time_limit_profit_min_pct {
        (bar.close, ExitReason::TimeProfit)
    } else {
        (bar.close, ExitReason::TimeClose)
    };
    Some(LegFill {
        name: LegName::TimeExit,
        reason,
        qty: position.remaining_qty,
        price,
        time: bar.timestamp,
        stop_after: position.stop_price,
        be_armed_after: position.be_armed,
        phase_after: PositionPhase::Closed,
        unrealized_pct: Some(unrealized),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, PositionId};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap()
    }

    fn bar(min: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            symbol: "BTCUSDT".into(),
            timestamp: t0() + Duration::minutes(min),
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    fn flat(min: i64, price: f64) -> Bar {
        bar(min, price, price, price, price)
    }

    fn open_position(direction: Direction) -> Position {
        let entry = 100.0;
        Position {
            id: PositionId(1),
            instrument: "BTCUSDT".into(),
            direction,
            variant_tag: "SAFE".into(),
            risk_percent: 1.0,
            entry_price: entry,
            entry_time: t0(),
            initial_qty: 10.0,
            remaining_qty: 10.0,
            initial_stop_price: direction.stop_price(entry, 6.0),
            stop_price: direction.stop_price(entry, 6.0),
            tp1_price: direction.target_price(entry, 8.0),
            tp2_price: direction.target_price(entry, 12.0),
            be_armed: false,
            phase: PositionPhase::OpenNoPartial,
            legs: Vec::new(),
            last_evaluated: None,
        }
    }

    fn step(p: &mut Position, b: &Bar) -> Option<Leg> {
        let outcome = evaluate_bar(p, b, &ExitRules::default());
        apply(p, b.timestamp, &outcome)
    }

    #[test]
    fn stop_wins_over_target_on_same_bar() {
        let p = open_position(Direction::Long);
        let b = bar(5, 100.0, 113.0, 93.0, 100.0);
        let fill = evaluate_bar(&p, &b, &ExitRules::default());
        let fill = fill.fill().unwrap();
        assert_eq!(fill.name, LegName::Sl);
        assert_eq!(fill.reason, ExitReason::StopLoss);
        assert!((fill.price - 94.0).abs() < 1e-9);
        assert_eq!(fill.phase_after, PositionPhase::Closed);
    }

    #[test]
    fn tp1_arms_break_even_and_moves_stop() {
        let mut p = open_position(Direction::Long);
        let leg = step(&mut p, &bar(10, 104.0, 108.5, 103.0, 107.0)).unwrap();
        assert_eq!(leg.name, LegName::Tp1);
        assert!((leg.fraction - 0.33).abs() < 1e-12);
        assert!(p.be_armed);
        assert_eq!(p.stop_price, 100.0);
        assert_eq!(p.phase, PositionPhase::OpenTp1Filled);
        assert!((p.remaining_qty - 6.7).abs() < 1e-9);
    }

    #[test]
    fn tp2_not_on_same_bar_as_tp1() {
        let mut p = open_position(Direction::Long);
        let leg = step(&mut p, &bar(10, 101.0, 113.0, 101.0, 112.5)).unwrap();
        assert_eq!(leg.name, LegName::Tp1);
        assert!(p.is_open());

        let leg = step(&mut p, &bar(11, 112.0, 112.5, 111.0, 112.0)).unwrap();
        assert_eq!(leg.name, LegName::Tp2);
        assert!((leg.fill_price - 112.0).abs() < 1e-9);
        assert!(!p.is_open());
        assert!((p.leg_fraction_sum() - 1.0).abs() < 1e-9);
        assert_eq!(p.remaining_qty, 0.0);
    }

    #[test]
    fn break_even_stop_after_tp1() {
        let mut p = open_position(Direction::Long);
        step(&mut p, &bar(3, 105.0, 108.5, 104.0, 107.0)).unwrap();
        let leg = step(&mut p, &bar(4, 103.0, 103.0, 99.0, 100.5)).unwrap();
        assert_eq!(leg.name, LegName::Sl);
        assert_eq!(leg.reason, ExitReason::BreakEvenStop);
        assert_eq!(leg.fill_price, 100.0);
        assert_eq!(leg.pnl, 0.0);
    }

    #[test]
    fn time_exit_without_tp1_uses_raw_close() {
        let mut p = open_position(Direction::Long);
        assert!(step(&mut p, &flat(89, 98.0)).is_none());
        let leg = step(&mut p, &flat(90, 97.0)).unwrap();
        assert_eq!(leg.name, LegName::TimeExit);
        assert_eq!(leg.reason, ExitReason::TimeClose);
        assert_eq!(leg.fill_price, 97.0);
        assert!(!leg.be_armed);
        assert!((leg.unrealized_pct_at_exit.unwrap() + 3.0).abs() < 1e-9);
    }

    #[test]
    fn break_even_touch_at_time_limit_is_floored_time_exit() {
        let mut p = open_position(Direction::Long);
        step(&mut p, &bar(10, 104.0, 108.5, 104.0, 107.0)).unwrap();
        let leg = step(&mut p, &bar(90, 101.0, 101.0, 95.0, 95.0)).unwrap();
        assert_eq!(leg.name, LegName::TimeExit);
        assert_eq!(leg.reason, ExitReason::TimeBreakEven);
        assert_eq!(leg.fill_price, 100.0);
        assert!(leg.be_armed);
        assert!((leg.unrealized_pct_at_exit.unwrap() + 5.0).abs() < 1e-9);

        let mut p = open_position(Direction::Long);
        step(&mut p, &bar(10, 104.0, 108.5, 104.0, 107.0)).unwrap();
        let leg = step(&mut p, &bar(90, 101.0, 101.0, 100.5, 100.5)).unwrap();
        assert_eq!(leg.reason, ExitReason::TimeProfit);
    }

    #[test]
    fn break_even_touch_at_time_limit_closing_above_entry_is_stop() {
        let mut p = open_position(Direction::Long);
        step(&mut p, &bar(10, 104.0, 108.5, 104.0, 107.0)).unwrap();
        let leg = step(&mut p, &bar(90, 101.0, 105.5, 99.5, 105.0)).unwrap();
        assert_eq!(leg.name, LegName::Sl);
        assert_eq!(leg.reason, ExitReason::BreakEvenStop);
        assert_eq!(leg.fill_price, 100.0);
        assert!(leg.unrealized_pct_at_exit.is_none());

        let mut p = open_position(Direction::Short);
        step(&mut p, &bar(10, 93.0, 93.0, 91.5, 92.0)).unwrap();
        let leg = step(&mut p, &bar(95, 99.0, 100.5, 95.0, 96.0)).unwrap();
        assert_eq!(leg.name, LegName::Sl);
        assert_eq!(leg.reason, ExitReason::BreakEvenStop);
    }

    #[test]
    fn floored_time_exit_without_stop_touch() {
        // stop placed below the bar so only the time check can fire
        let mut p = open_position(Direction::Long);
        p.be_armed = true;
        p.phase = PositionPhase::OpenTp1Filled;
        p.stop_price = 90.0;
        let leg = step(&mut p, &flat(90, 95.0)).unwrap();
        assert_eq!(leg.reason, ExitReason::TimeBreakEven);
        assert_eq!(leg.fill_price, 100.0);
        assert!((leg.unrealized_pct_at_exit.unwrap() + 5.0).abs() < 1e-9);
    }

    #[test]
    fn short_mirrors_long() {
        let mut p = open_position(Direction::Short);
        let leg = step(&mut p, &bar(5, 95.0, 96.0, 91.5, 92.0)).unwrap();
        assert_eq!(leg.name, LegName::Tp1);
        assert_eq!(p.stop_price, 100.0);
        let leg = step(&mut p, &bar(6, 92.0, 100.0, 91.0, 99.0)).unwrap();
        assert_eq!(leg.reason, ExitReason::BreakEvenStop);
    }

    #[test]
    fn bars_are_evaluated_once() {
        let mut p = open_position(Direction::Long);
        let b = flat(5, 101.0);
        assert_eq!(evaluate_bar(&p, &b, &ExitRules::default()), BarOutcome::Hold);
        step(&mut p, &b);
        assert_eq!(
            evaluate_bar(&p, &b, &ExitRules::default()),
            BarOutcome::Skipped(SkipReason::AlreadyEvaluated)
        );
    }

    #[test]
    fn entry_bar_and_void_bars_are_skipped() {
        let p = open_position(Direction::Long);
        assert_eq!(
            evaluate_bar(&p, &flat(0, 50.0), &ExitRules::default()),
            BarOutcome::Skipped(SkipReason::NotAfterEntry)
        );
        let mut void = flat(3, 101.0);
        void.open = f64::NAN;
        void.high = f64::NAN;
        void.low = f64::NAN;
        assert_eq!(
            evaluate_bar(&p, &void, &ExitRules::default()),
            BarOutcome::Skipped(SkipReason::NoExecutablePrice)
        );
    }

    #[test]
    fn residual_closes_remaining_quantity() {
        let mut p = open_position(Direction::Long);
        step(&mut p, &bar(10, 104.0, 108.5, 104.0, 107.0)).unwrap();
        let fill = residual_fill(&p, &flat(20, 103.0)).unwrap();
        let leg = commit_fill(&mut p, &fill);
        assert_eq!(leg.name, LegName::Residual);
        assert!((leg.fraction - 0.67).abs() < 1e-9);
        assert!(!p.is_open());
        assert!(residual_fill(&p, &flat(21, 103.0)).is_none());
    }
}
