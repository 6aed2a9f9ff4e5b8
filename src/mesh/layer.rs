// Layer: a bucket of blocks sharing a claimed layer id

use crate::core::{BlockId, LayerId};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in unix milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    /// Zero-based, sequential
    pub id: LayerId,
    /// Unix millis at which the layer was opened
    pub start_timestamp: u64,
    /// Member blocks, insertion order is not significant
    pub blocks: Vec<BlockId>,
}

impl Layer {
    pub fn new(id: LayerId, start_timestamp: u64) -> Self {
        Self {
            id,
            start_timestamp,
            blocks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
