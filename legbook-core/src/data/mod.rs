//! Bar stream preparation: validation and gap normalization.

pub mod gaps;

pub use gaps::{
    normalize, normalize_window, BarOrigin, GapConfig, GapKind, GapPolicy, GapReport,
    NormalizedSeries, SeriesBar,
};
