// Miner configuration

use crate::consensus::{
    NaivePow, PowProtocol, ReferencePow, TargetPow, DEFAULT_CONSENSUS_INTERVAL_END,
    DEFAULT_CONSENSUS_INTERVAL_START, DEFAULT_DIFFICULTY,
};
use crate::mesh::DEFAULT_TMIN;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Proof-of-work variant to mine with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowKind {
    /// Every attempt succeeds; for exercising protocol logic
    Reference,
    /// Fixed number of attempts
    Naive,
    /// Leading-zero-bits hash puzzle with difficulty retargeting
    Target,
}

impl std::str::FromStr for PowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reference" => Ok(PowKind::Reference),
            "naive" => Ok(PowKind::Naive),
            "target" => Ok(PowKind::Target),
            other => Err(format!("Unknown proof-of-work kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Minimum number of blocks per layer
    pub tmin: usize,
    /// Early-block window after a layer starts
    pub delta_seconds: u64,
    /// Weak coin window after a layer starts
    pub delta_coin_seconds: u64,
    pub pow: PowKind,
    /// Attempts for `naive`; floor and starting zero bits for `target`
    pub difficulty: u64,
    /// Layer duration the `target` protocol aims for
    pub target_layer_seconds: u64,
    pub consensus_interval_start: u64,
    pub consensus_interval_end: u64,
    /// Checkpoint directory; no persistence when unset
    pub data_dir: Option<PathBuf>,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            tmin: DEFAULT_TMIN,
            delta_seconds: 30,
            delta_coin_seconds: 120,
            pow: PowKind::Naive,
            difficulty: DEFAULT_DIFFICULTY,
            target_layer_seconds: 60,
            consensus_interval_start: DEFAULT_CONSENSUS_INTERVAL_START,
            consensus_interval_end: DEFAULT_CONSENSUS_INTERVAL_END,
            data_dir: None,
        }
    }
}

impl MinerConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let json = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: Self = serde_json::from_str(&json)
            .map_err(|e| format!("Failed to parse config: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.tmin == 0 {
            return Err("tmin must be at least 1".to_string());
        }
        if self.consensus_interval_end > self.consensus_interval_start {
            return Err(format!(
                "consensus interval end ({}) lies before its start ({})",
                self.consensus_interval_end, self.consensus_interval_start
            ));
        }
        if self.pow == PowKind::Target && self.difficulty > TargetPow::MAX_ZERO_BITS as u64 {
            return Err(format!(
                "target difficulty {} exceeds {} zero bits",
                self.difficulty,
                TargetPow::MAX_ZERO_BITS
            ));
        }
        Ok(())
    }

    pub fn delta(&self) -> Duration {
        Duration::from_secs(self.delta_seconds)
    }

    pub fn delta_coin(&self) -> Duration {
        Duration::from_secs(self.delta_coin_seconds)
    }

    /// Instantiate the configured proof-of-work protocol
    pub fn build_pow(&self) -> Box<dyn PowProtocol> {
        match self.pow {
            PowKind::Reference => Box::new(ReferencePow::new()),
            PowKind::Naive => Box::new(NaivePow::new(self.difficulty)),
            PowKind::Target => Box::new(TargetPow::new(
                self.difficulty as u32,
                self.target_layer_seconds,
            )),
        }
    }
}
