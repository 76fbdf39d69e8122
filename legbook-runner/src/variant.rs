//! Variants: a strategy profile paired with a per-trade risk percent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use legbook_core::ledger::RunMeta;

use crate::config::ConfigError;

/// Entry profile that emitted a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Profile {
    Safe,
    Fast,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Safe => "SAFE",
            Profile::Fast => "FAST",
        }
    }

    /// True if an entry's variant tag names this profile.
    pub fn matches(self, tag: &str) -> bool {
        tag.trim().eq_ignore_ascii_case(self.as_str())
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SAFE" => Ok(Profile::Safe),
            "FAST" => Ok(Profile::Fast),
            _ => Err(ConfigError::Variant(s.to_string())),
        }
    }
}

/// One cell of the variant matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub profile: Profile,
    pub risk_percent: f64,
}

impl Variant {
    pub fn new(profile: Profile, risk_percent: f64) -> Self {
        Self {
            profile,
            risk_percent,
        }
    }

    /// SAFE/FAST × 0.5/1.0.
    pub fn default_matrix() -> Vec<Variant> {
        vec![
            Variant::new(Profile::Safe, 0.5),
            Variant::new(Profile::Safe, 1.0),
            Variant::new(Profile::Fast, 0.5),
            Variant::new(Profile::Fast, 1.0),
        ]
    }

    /// Risk as written in labels and file names: one decimal unless more are needed.
    pub fn risk_tag(&self) -> String {
        format_risk(self.risk_percent)
    }

    /// Human label written to `profile_run`, e.g. `risk 1.0 safe`.
    pub fn label(&self) -> String {
        format!(
            "risk {} {}",
            self.risk_tag(),
            self.profile.as_str().to_ascii_lowercase()
        )
    }

    /// Output file stem, e.g. `trades_CYBERUSDT_SAFE_1.0`.
    pub fn file_stem(&self, symbol: &str) -> String {
        format!("trades_{symbol}_{}_{}", self.profile, self.risk_tag())
    }

    /// Per-run metadata stamped on every record of this variant.
    pub fn run_meta(&self, time_limit_minutes: i64) -> RunMeta {
        RunMeta {
            profile_run: self.label(),
            risk_perc_run: self.risk_percent,
            time_limit_minutes,
        }
    }
}

fn format_risk(risk: f64) -> String {
    let one_decimal = format!("{risk:.1}");
    match one_decimal.parse::<f64>() {
        Ok(v) if (v - risk).abs() < 1e-12 => one_decimal,
        _ => format!("{risk}"),
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.profile, self.risk_tag())
    }
}

impl FromStr for Variant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (profile, risk) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::Variant(s.to_string()))?;
        let profile: Profile = profile.parse().map_err(|_| ConfigError::Variant(s.to_string()))?;
        let risk_percent: f64 = risk
            .trim()
            .parse()
            .map_err(|_| ConfigError::Variant(s.to_string()))?;
        if !(risk_percent.is_finite() && risk_percent > 0.0) {
            return Err(ConfigError::Variant(s.to_string()));
        }
        Ok(Variant::new(profile, risk_percent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_profile_and_risk() {
        let v: Variant = "SAFE:1.0".parse().unwrap();
        assert_eq!(v, Variant::new(Profile::Safe, 1.0));
        let v: Variant = " fast : 0.5 ".parse().unwrap();
        assert_eq!(v, Variant::new(Profile::Fast, 0.5));
    }

    #[test]
    fn rejects_malformed_variants() {
        for bad in ["SAFE", "SLOW:1.0", "SAFE:abc", "FAST:0", "FAST:-1", "FAST:NaN"] {
            assert!(bad.parse::<Variant>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn label_and_file_stem() {
        let v = Variant::new(Profile::Safe, 1.0);
        assert_eq!(v.label(), "risk 1.0 safe");
        assert_eq!(v.file_stem("CYBERUSDT"), "trades_CYBERUSDT_SAFE_1.0");
        assert_eq!(v.to_string(), "SAFE:1.0");

        let v = Variant::new(Profile::Fast, 0.25);
        assert_eq!(v.label(), "risk 0.25 fast");
        assert_eq!(v.file_stem("ARBUSDT"), "trades_ARBUSDT_FAST_0.25");
    }

    #[test]
    fn profile_matches_tags_loosely() {
        assert!(Profile::Safe.matches("safe"));
        assert!(Profile::Fast.matches(" FAST "));
        assert!(!Profile::Fast.matches("SAFE"));
    }

    #[test]
    fn run_meta_carries_label_and_horizon() {
        let meta = Variant::new(Profile::Fast, 0.5).run_meta(90);
        assert_eq!(meta.profile_run, "risk 0.5 fast");
        assert_eq!(meta.risk_perc_run, 0.5);
        assert_eq!(meta.time_limit_minutes, 90);
    }
}
