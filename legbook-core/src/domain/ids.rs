use serde::{Deserialize, Serialize};
use std::fmt;

use super::bar::Bar;

/// Position identifier, unique within one engine run (assigned in entry order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{:05}", self.0)
    }
}

/// Monotonic position id generator owned by one engine instance.
#[derive(Debug, Default)]
pub struct PositionIdGen {
    next: u64,
}

impl PositionIdGen {
    pub fn next_id(&mut self) -> PositionId {
        self.next += 1;
        PositionId(self.next)
    }
}

/// Deterministic dataset hash (content hash of the bar series)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetHash(pub String);

impl DatasetHash {
    pub fn from_hash(hash: &str) -> Self {
        Self(hash.to_string())
    }

    /// BLAKE3 over the canonical text form of every bar, in order.
    pub fn of_bars(bars: &[Bar]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for bar in bars {
            let line = format!(
                "{}|{}|{}|{}|{}|{}|{}\n",
                bar.symbol,
                bar.timestamp.timestamp_millis(),
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.volume
            );
            hasher.update(line.as_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }
}

impl fmt::Display for DatasetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic run ID (config + dataset + variant)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId {
    pub config_hash: String,
    pub dataset_hash: DatasetHash,
    pub variant: String,
}

impl RunId {
    pub fn new(config_hash: impl Into<String>, dataset_hash: DatasetHash, variant: impl Into<String>) -> Self {
        Self {
            config_hash: config_hash.into(),
            dataset_hash,
            variant: variant.into(),
        }
    }

    /// Generate deterministic run hash
    pub fn hash(&self) -> String {
        use serde_json::json;

        // Canonical serialization (sorted keys)
        let canonical = json!({
            "config_hash": &self.config_hash,
            "dataset_hash": &self.dataset_hash.0,
            "variant": &self.variant,
        });

        blake3::hash(canonical.to_string().as_bytes()).to_hex().to_string()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.config_hash, self.dataset_hash, self.variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(close: f64) -> Bar {
        Bar {
            symbol: "ETHUSDT".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn position_ids_are_sequential() {
        let mut ids = PositionIdGen::default();
        assert_eq!(ids.next_id(), PositionId(1));
        assert_eq!(ids.next_id(), PositionId(2));
        assert_eq!(PositionId(7).to_string(), "P00007");
    }

    #[test]
    fn dataset_hash_is_content_addressed() {
        let a = DatasetHash::of_bars(&[bar(100.0), bar(101.0)]);
        let b = DatasetHash::of_bars(&[bar(100.0), bar(101.0)]);
        let c = DatasetHash::of_bars(&[bar(100.0), bar(101.5)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn run_id_deterministic() {
        let run1 = RunId::new("cfg", DatasetHash::from_hash("def456"), "SAFE:1.0");
        let run2 = RunId::new("cfg", DatasetHash::from_hash("def456"), "SAFE:1.0");
        assert_eq!(run1.hash(), run2.hash());
    }

    #[test]
    fn run_id_different_variant_different_hash() {
        let run1 = RunId::new("cfg", DatasetHash::from_hash("def456"), "SAFE:1.0");
        let run2 = RunId::new("cfg", DatasetHash::from_hash("def456"), "FAST:1.0");
        assert_ne!(run1.hash(), run2.hash());
    }
}
