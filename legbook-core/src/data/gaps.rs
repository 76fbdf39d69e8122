//! Gap normalizer: validates a raw bar stream and repairs short gaps for
//! indicator continuity without inventing tradable events.
//!
//! - Gaps whose duration (missing bars × interval) is within the threshold are
//!   forward-filled: the close is carried, open/high/low stay NaN so the slot
//!   can never produce a fill, an entry or an exit.
//! - Longer gaps are passed through unmodified and flagged. The engine decides
//!   what to do with them ([`GapPolicy`]).
//! - Gaps at the edges of an expected window cannot be forward-filled and are
//!   reported as leading/trailing gaps.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Bar;
use crate::error::EngineError;

/// What the engine does when replay reaches a gap longer than the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Abort the run with `DataGap`.
    #[default]
    Fail,
    /// Skip the missing interval and resume at the next observed bar.
    Resume,
}

/// Gap handling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapConfig {
    /// Expected sampling interval in seconds.
    pub bar_interval_secs: i64,
    /// Longest gap (in seconds of missing data) that is forward-filled.
    pub fill_threshold_secs: i64,
    pub policy: GapPolicy,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            bar_interval_secs: 60,
            fill_threshold_secs: 120,
            policy: GapPolicy::Fail,
        }
    }
}

impl GapConfig {
    pub fn bar_interval(&self) -> Duration {
        Duration::seconds(self.bar_interval_secs)
    }

    pub fn fill_threshold(&self) -> Duration {
        Duration::seconds(self.fill_threshold_secs)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.bar_interval_secs <= 0 {
            return Err(EngineError::InvalidConfig(format!(
                "bar interval must be positive, got {}s",
                self.bar_interval_secs
            )));
        }
        if self.fill_threshold_secs < 0 {
            return Err(EngineError::InvalidConfig(format!(
                "gap fill threshold must be non-negative, got {}s",
                self.fill_threshold_secs
            )));
        }
        Ok(())
    }
}

/// Where a slot in the normalized series came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarOrigin {
    Observed,
    ForwardFilled,
}

/// Classification of a detected gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// Within the threshold; close forward-filled.
    Filled,
    /// Beyond the threshold; passed through and flagged.
    Unfilled,
    /// Missing bars before the first observed bar of an expected window.
    Leading,
    /// Missing bars after the last observed bar of an expected window.
    Trailing,
}

/// One detected gap. `start`/`end` are the first and last missing slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapReport {
    pub instrument: String,
    pub kind: GapKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub missing_bars: usize,
    pub duration_secs: i64,
}

/// A slot in the normalized series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesBar {
    pub bar: Bar,
    pub origin: BarOrigin,
    /// Index into [`NormalizedSeries::gaps`] of an unfilled gap that ends right before this bar.
    pub gap_before: Option<usize>,
}

impl SeriesBar {
    pub fn is_observed(&self) -> bool {
        self.origin == BarOrigin::Observed
    }
}

/// Validated, gap-normalized bar series for one instrument.
#[derive(Debug, Clone)]
pub struct NormalizedSeries {
    instrument: String,
    bars: Vec<SeriesBar>,
    gaps: Vec<GapReport>,
    config: GapConfig,
}

impl NormalizedSeries {
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn bars(&self) -> &[SeriesBar] {
        &self.bars
    }

    pub fn gaps(&self) -> &[GapReport] {
        &self.gaps
    }

    pub fn config(&self) -> &GapConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Continuous close series (observed and forward-filled) for indicators.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.bar.close).collect()
    }

    pub fn filled_count(&self) -> usize {
        self.bars.iter().filter(|b| !b.is_observed()).count()
    }

    pub fn unfilled_gaps(&self) -> impl Iterator<Item = &GapReport> {
        self.gaps.iter().filter(|g| g.kind == GapKind::Unfilled)
    }
}

/// Validate a raw bar stream and normalize its gaps.
///
/// # Errors
/// - `MalformedBar` for a missing OHLC field, an inconsistent range, a symbol
///   mismatch, or a timestamp that does not strictly increase.
/// - `InvalidConfig` for a non-positive interval.
pub fn normalize(bars: &[Bar], config: &GapConfig) -> Result<NormalizedSeries, EngineError> {
    config.validate()?;

    let instrument = bars.first().map(|b| b.symbol.clone()).unwrap_or_default();
    let interval = config.bar_interval();
    let threshold = config.fill_threshold();

    let mut out: Vec<SeriesBar> = Vec::with_capacity(bars.len());
    let mut gaps: Vec<GapReport> = Vec::new();
    let mut prev: Option<&Bar> = None;

    for (index, bar) in bars.iter().enumerate() {
        validate_bar(&instrument, index, bar, prev)?;

        let mut gap_before = None;
        if let Some(p) = prev {
            let missing = missing_slots(p.timestamp, bar.timestamp, interval);
            if missing > 0 {
                let duration = interval * missing as i32;
                let start = p.timestamp + interval;
                let end = p.timestamp + interval * missing as i32;
                if duration <= threshold {
                    for k in 1..=missing {
                        out.push(SeriesBar {
                            bar: forward_filled(p, p.timestamp + interval * k as i32),
                            origin: BarOrigin::ForwardFilled,
                            gap_before: None,
                        });
                    }
                    gaps.push(GapReport {
                        instrument: instrument.clone(),
                        kind: GapKind::Filled,
                        start,
                        end,
                        missing_bars: missing,
                        duration_secs: duration.num_seconds(),
                    });
                } else {
                    tracing::warn!(
                        instrument = %instrument,
                        %start,
                        %end,
                        missing_bars = missing,
                        "gap exceeds forward-fill threshold; flagged, not filled"
                    );
                    gap_before = Some(gaps.len());
                    gaps.push(GapReport {
                        instrument: instrument.clone(),
                        kind: GapKind::Unfilled,
                        start,
                        end,
                        missing_bars: missing,
                        duration_secs: duration.num_seconds(),
                    });
                }
            }
        }

        out.push(SeriesBar {
            bar: bar.clone(),
            origin: BarOrigin::Observed,
            gap_before,
        });
        prev = Some(bar);
    }

    tracing::debug!(
        instrument = %instrument,
        observed = bars.len(),
        filled = out.len() - bars.len(),
        gaps = gaps.len(),
        "normalized bar series"
    );

    Ok(NormalizedSeries {
        instrument,
        bars: out,
        gaps,
        config: *config,
    })
}

/// Like [`normalize`], and also reports missing bars at the edges of the
/// expected window `[window_start, window_end]`. Edge gaps are never filled:
/// there is no prior close to carry at the start, and nothing to bound the
/// fill at the end.
pub fn normalize_window(
    bars: &[Bar],
    config: &GapConfig,
    instrument: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<NormalizedSeries, EngineError> {
    let mut series = normalize(bars, config)?;
    if series.instrument.is_empty() {
        series.instrument = instrument.to_string();
    }
    let interval = config.bar_interval();

    let edges = match (bars.first(), bars.last()) {
        (Some(first), Some(last)) => {
            let mut edges = Vec::new();
            if first.timestamp > window_start {
                let missing = missing_slots(window_start - interval, first.timestamp, interval);
                if missing > 0 {
                    edges.push(edge_gap(instrument, GapKind::Leading, window_start, missing, interval));
                }
            }
            if last.timestamp < window_end {
                let missing = missing_slots(last.timestamp, window_end + interval, interval);
                if missing > 0 {
                    edges.push(edge_gap(
                        instrument,
                        GapKind::Trailing,
                        last.timestamp + interval,
                        missing,
                        interval,
                    ));
                }
            }
            edges
        }
        _ => {
            let missing = missing_slots(window_start - interval, window_end + interval, interval);
            vec![edge_gap(instrument, GapKind::Leading, window_start, missing, interval)]
        }
    };

    for gap in edges {
        tracing::warn!(
            instrument = %instrument,
            kind = ?gap.kind,
            start = %gap.start,
            missing_bars = gap.missing_bars,
            "edge gap cannot be forward-filled"
        );
        series.gaps.push(gap);
    }
    Ok(series)
}

fn validate_bar(
    instrument: &str,
    index: usize,
    bar: &Bar,
    prev: Option<&Bar>,
) -> Result<(), EngineError> {
    let malformed = |reason: String| EngineError::MalformedBar {
        instrument: instrument.to_string(),
        index,
        timestamp: bar.timestamp,
        reason,
    };

    if bar.symbol != instrument {
        return Err(malformed(format!("symbol '{}' in a '{instrument}' stream", bar.symbol)));
    }
    if let Some(field) = bar.missing_field() {
        return Err(malformed(format!("missing {field}")));
    }
    if !bar.is_sane() {
        return Err(malformed(format!(
            "inconsistent OHLC o={} h={} l={} c={}",
            bar.open, bar.high, bar.low, bar.close
        )));
    }
    if let Some(p) = prev {
        if bar.timestamp <= p.timestamp {
            return Err(malformed(format!(
                "non-monotonic timestamp (previous bar at {})",
                p.timestamp
            )));
        }
    }
    Ok(())
}

/// Number of whole expected slots strictly between `from` and `to`.
fn missing_slots(from: DateTime<Utc>, to: DateTime<Utc>, interval: Duration) -> usize {
    let step = interval.num_seconds();
    let delta = (to - from).num_seconds();
    if step <= 0 || delta <= step {
        return 0;
    }
    let whole = delta / step;
    let missing = if delta % step == 0 { whole - 1 } else { whole };
    usize::try_from(missing).unwrap_or(0)
}

fn forward_filled(prev: &Bar, timestamp: DateTime<Utc>) -> Bar {
    Bar {
        symbol: prev.symbol.clone(),
        timestamp,
        open: f64::NAN,
        high: f64::NAN,
        low: f64::NAN,
        close: prev.close,
        volume: 0.0,
    }
}

fn edge_gap(
    instrument: &str,
    kind: GapKind,
    start: DateTime<Utc>,
    missing: usize,
    interval: Duration,
) -> GapReport {
    GapReport {
        instrument: instrument.to_string(),
        kind,
        start,
        end: start + interval * (missing as i32 - 1).max(0),
        missing_bars: missing,
        duration_secs: interval.num_seconds() * missing as i64,
    }
}
