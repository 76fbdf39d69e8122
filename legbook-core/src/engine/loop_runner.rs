//! Bar-by-bar replay: the heart of the engine.
//!
//! For every observed bar, in order:
//! 1. Gap check: an unfilled gap right before the bar either aborts the run
//!    (`fail`) or is stepped over (`resume`).
//! 2. Exits: every open position, in id order, is evaluated against the bar.
//! 3. Entries: signals resolved to this bar open new positions at its close.
//!
//! Forward-filled slots are never evaluated. After the last bar, remaining
//! positions are closed as residual legs when configured.

use std::collections::BTreeMap;

use crate::data::{normalize, GapPolicy, NormalizedSeries};
use crate::domain::{Bar, EntrySignal, Position};
use crate::error::EngineError;
use crate::ledger::RunMeta;

use super::context::{EngineConfig, RunContext, RunOutcome};
use super::entry::{open_position, resolve_entry};
use super::lifecycle::{apply, commit_fill, evaluate_bar, residual_fill};

/// A configured replay engine. Cheap to share across threads.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Replay `entries` against a normalized series.
    ///
    /// # Errors
    /// Fatal errors abort the run: `DataGap` (fail policy),
    /// `AccountingInvariant`, `InvalidRecord`. Orphan entries are collected in
    /// [`RunOutcome::rejected_entries`].
    pub fn run(
        &self,
        series: &NormalizedSeries,
        entries: &[EntrySignal],
        meta: RunMeta,
    ) -> Result<RunOutcome, EngineError> {
        let rules = &self.config.rules;
        let mut ctx = RunContext::new(series.instrument(), meta, self.config.initial_equity);
        let pending = self.schedule_entries(series, entries, &mut ctx);

        let bars = series.bars();
        let mut last_observed: Option<&Bar> = None;

        for (idx, slot) in bars.iter().enumerate() {
            if !slot.is_observed() {
                continue;
            }
            let bar = &slot.bar;

            // ─── Gap check ───
            if let Some(gap) = slot.gap_before.and_then(|g| series.gaps().get(g)) {
                match self.config.gaps.policy {
                    GapPolicy::Fail => {
                        return Err(EngineError::data_gap(
                            series.instrument(),
                            gap.start,
                            gap.end,
                            gap.missing_bars,
                            self.config.gaps.fill_threshold(),
                            ctx.open_ids(),
                        ));
                    }
                    GapPolicy::Resume => {
                        tracing::warn!(
                            instrument = %series.instrument(),
                            start = %gap.start,
                            end = %gap.end,
                            open_positions = ctx.open.len(),
                            "resuming after unfilled gap"
                        );
                        ctx.resumed_gaps.push(gap.clone());
                    }
                }
            }

            // ─── Exits ───
            let mut still_open = Vec::with_capacity(ctx.open.len());
            for mut position in std::mem::take(&mut ctx.open) {
                let outcome = evaluate_bar(&position, bar, rules);
                if let Some(leg) = apply(&mut position, bar.timestamp, &outcome) {
                    ctx.ledger.record_leg(&position, &leg)?;
                }
                if position.is_open() {
                    still_open.push(position);
                } else {
                    ctx.ledger.archive(position)?;
                }
            }
            ctx.open = still_open;

            // ─── Entries ───
            if let Some(signals) = pending.get(&idx) {
                for signal in signals {
                    self.enter(&mut ctx, signal, slot);
                }
            }

            last_observed = Some(bar);
        }

        // ─── End of data ───
        if let Some(last) = last_observed {
            if rules.close_residual {
                for mut position in std::mem::take(&mut ctx.open) {
                    close_residual(&mut ctx, &mut position, last)?;
                    ctx.ledger.archive(position)?;
                }
            } else if !ctx.open.is_empty() {
                tracing::info!(
                    instrument = %series.instrument(),
                    open = ctx.open.len(),
                    "positions left open at end of data"
                );
            }
        }

        let outcome = ctx.into_outcome(series.gaps().to_vec());
        tracing::info!(
            instrument = %outcome.instrument,
            legs = outcome.records.len(),
            closed = outcome.closed.len(),
            rejected = outcome.rejected_entries.len(),
            final_equity = outcome.final_equity,
            "replay finished"
        );
        Ok(outcome)
    }

    /// Resolve every signal to its entry bar. Orphans go straight to the context.
    fn schedule_entries<'a>(
        &self,
        series: &NormalizedSeries,
        entries: &'a [EntrySignal],
        ctx: &mut RunContext,
    ) -> BTreeMap<usize, Vec<&'a EntrySignal>> {
        let mut sorted: Vec<&EntrySignal> = entries.iter().collect();
        sorted.sort_by_key(|s| s.timestamp);

        let mut pending: BTreeMap<usize, Vec<&EntrySignal>> = BTreeMap::new();
        for signal in sorted {
            match resolve_entry(signal, series) {
                Ok(idx) => pending.entry(idx).or_default().push(signal),
                Err(err) => reject(ctx, err),
            }
        }
        pending
    }

    fn enter(&self, ctx: &mut RunContext, signal: &EntrySignal, slot: &crate::data::SeriesBar) {
        let equity = ctx.ledger.equity();
        let id = ctx.ids.next_id();
        match open_position(id, signal, slot, &self.config.rules, equity) {
            Ok(position) => {
                tracing::debug!(
                    position = %position.id,
                    instrument = %position.instrument,
                    direction = %position.direction,
                    entry = position.entry_price,
                    qty = position.initial_qty,
                    time = %position.entry_time,
                    "position opened"
                );
                ctx.open.push(position);
            }
            Err(err) => reject(ctx, err),
        }
    }
}

fn reject(ctx: &mut RunContext, err: EngineError) {
    tracing::warn!(instrument = %ctx.instrument, error = %err, "entry rejected");
    ctx.rejected_entries.push(err);
}

fn close_residual(ctx: &mut RunContext, position: &mut Position, last: &Bar) -> Result<(), EngineError> {
    if let Some(fill) = residual_fill(position, last) {
        let leg = commit_fill(position, &fill);
        ctx.ledger.record_leg(position, &leg)?;
    }
    Ok(())
}

/// Normalize `bars` and replay `entries` in one call.
pub fn run_backtest(
    bars: &[Bar],
    entries: &[EntrySignal],
    config: &EngineConfig,
    meta: RunMeta,
) -> Result<RunOutcome, EngineError> {
    let engine = Engine::new(config.clone())?;
    let series = normalize(bars, &config.gaps)?;
    engine.run(&series, entries, meta)
}
