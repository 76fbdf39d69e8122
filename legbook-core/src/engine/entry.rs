//! Entry acceptance: locating the entry bar and sizing the new position.

use crate::data::{NormalizedSeries, SeriesBar};
use crate::domain::{Bar, EntrySignal, Position, PositionId, PositionPhase};
use crate::error::EngineError;

use super::rules::ExitRules;

/// Index into `series.bars()` of the bar that fills `signal`.
///
/// The entry bar is the first slot at or after the signal timestamp, at most
/// one sampling interval later. A signal that lands in a forward-filled slot,
/// past the end of the data, or before a hole in the data is an orphan.
pub fn resolve_entry(signal: &EntrySignal, series: &NormalizedSeries) -> Result<usize, EngineError> {
    let orphan = |reason: String| EngineError::OrphanEntry {
        instrument: signal.instrument.clone(),
        timestamp: signal.timestamp,
        reason,
    };

    if signal.instrument != series.instrument() {
        return Err(orphan(format!(
            "signal instrument does not match bar stream '{}'",
            series.instrument()
        )));
    }

    let bars = series.bars();
    let idx = bars.partition_point(|b| b.bar.timestamp < signal.timestamp);
    let Some(slot) = bars.get(idx) else {
        return Err(orphan("no bar at or after the signal time".into()));
    };

    let tolerance = series.config().bar_interval();
    if slot.bar.timestamp - signal.timestamp > tolerance {
        return Err(orphan(format!(
            "next bar at {} is more than one interval after the signal",
            slot.bar.timestamp
        )));
    }
    if !slot.is_observed() {
        return Err(orphan(format!(
            "signal lands in a forward-filled slot at {}",
            slot.bar.timestamp
        )));
    }
    Ok(idx)
}

/// Open a position filled at the close of `entry_bar`, sized so that hitting
/// the initial stop loses `risk_percent` of `equity`.
pub fn open_position(
    id: PositionId,
    signal: &EntrySignal,
    entry_bar: &SeriesBar,
    rules: &ExitRules,
    equity: f64,
) -> Result<Position, EngineError> {
    let reject = |reason: String| EngineError::OrphanEntry {
        instrument: signal.instrument.clone(),
        timestamp: signal.timestamp,
        reason,
    };

    let bar: &Bar = &entry_bar.bar;
    let entry_price = bar.close;
    if !(entry_price.is_finite() && entry_price > 0.0) {
        return Err(reject(format!("entry bar close {entry_price} is not a valid price")));
    }
    if !(signal.risk_percent.is_finite() && signal.risk_percent > 0.0) {
        return Err(reject(format!("risk percent {} is not positive", signal.risk_percent)));
    }
    if equity <= 0.0 {
        return Err(reject(format!("account equity {equity:.2} leaves nothing to risk")));
    }

    let dir = signal.direction;
    let stop = dir.stop_price(entry_price, rules.stop_loss_pct);
    let risk_per_unit = (entry_price - stop).abs();
    let risk_amount = equity * signal.risk_percent / 100.0;
    let qty = risk_amount / risk_per_unit;

    Ok(Position {
        id,
        instrument: signal.instrument.clone(),
        direction: dir,
        variant_tag: signal.variant_tag.clone(),
        risk_percent: signal.risk_percent,
        entry_price,
        entry_time: bar.timestamp,
        initial_qty: qty,
        remaining_qty: qty,
        initial_stop_price: stop,
        stop_price: stop,
        tp1_price: dir.target_price(entry_price, rules.tp1_pct),
        tp2_price: dir.target_price(entry_price, rules.tp2_pct),
        be_armed: false,
        phase: PositionPhase::OpenNoPartial,
        legs: Vec::new(),
        last_evaluated: None,
    })
}
