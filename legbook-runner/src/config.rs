//! TOML run configuration.
//!
//! One file drives a whole variant matrix:
//!
//! ```toml
//! [exits]
//! stop_loss_pct = 6.0
//! tp1_pct = 8.0
//!
//! [gaps]
//! policy = "fail"
//!
//! [run]
//! initial_equity = 10000.0
//! variants = ["SAFE:0.5", "SAFE:1.0", "FAST:0.5", "FAST:1.0"]
//! symbols = ["CYBER/USDT:USDT", "ARBUSDT"]
//!
//! [data]
//! data_dir = "data"
//! entries = "entries.csv"
//! runs_dir = "runs"
//! ```
//!
//! Every section and every key is optional; missing keys take the defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use legbook_core::data::GapConfig;
use legbook_core::engine::{EngineConfig, ExitRules};

use crate::variant::Variant;

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid variant '{0}': expected PROFILE:RISK, e.g. SAFE:1.0")]
    Variant(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// `[run]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub initial_equity: f64,
    /// Variant matrix as `PROFILE:RISK` strings.
    pub variants: Vec<String>,
    /// Instruments to run. Exchange notation is accepted and normalized.
    pub symbols: Vec<String>,
    /// Trailing window of the summary, in days.
    pub summary_days: u32,
    /// Variants whose max drawdown is worse than minus this cap are not ranked.
    pub max_dd_cap_pct: f64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            initial_equity: 10_000.0,
            variants: Variant::default_matrix().iter().map(Variant::to_string).collect(),
            symbols: Vec::new(),
            summary_days: 30,
            max_dd_cap_pct: 5.0,
        }
    }
}

/// `[data]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    /// Directory holding `{SYMBOL}_1m.csv` / `BINANCE_1m_{SYMBOL}.csv` files.
    pub data_dir: PathBuf,
    /// Entry signal CSV.
    pub entries: PathBuf,
    /// Output directory for trade CSVs, manifests and failure reports.
    pub runs_dir: PathBuf,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            entries: PathBuf::from("entries.csv"),
            runs_dir: PathBuf::from("runs"),
        }
    }
}

/// Full configuration of a legbook run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegbookConfig {
    pub exits: ExitRules,
    pub gaps: GapConfig,
    pub run: RunSection,
    pub data: DataSection,
}

impl LegbookConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: LegbookConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let variants = self.variants()?;
        if variants.is_empty() {
            return Err(ConfigError::Invalid("run.variants is empty".into()));
        }
        for (i, v) in variants.iter().enumerate() {
            if variants[..i].contains(v) {
                return Err(ConfigError::Invalid(format!("duplicate variant {v}")));
            }
        }
        if self.run.summary_days == 0 {
            return Err(ConfigError::Invalid("run.summary_days must be at least 1".into()));
        }
        if !(self.run.max_dd_cap_pct.is_finite() && self.run.max_dd_cap_pct >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "run.max_dd_cap_pct must be non-negative, got {}",
                self.run.max_dd_cap_pct
            )));
        }
        Ok(())
    }

    /// Engine parameters shared by every variant.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            rules: self.exits.clone(),
            gaps: self.gaps,
            initial_equity: self.run.initial_equity,
        }
    }

    /// Parsed variant matrix, in configured order.
    pub fn variants(&self) -> Result<Vec<Variant>, ConfigError> {
        self.run.variants.iter().map(|s| s.parse()).collect()
    }

    /// BLAKE3 over the canonical JSON form of the config.
    pub fn config_hash(&self) -> Result<String, ConfigError> {
        let json = serde_json::to_string(self)
            .map_err(|e| ConfigError::Invalid(format!("config is not serializable: {e}")))?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}
