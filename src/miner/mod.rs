// Miner: the block-arrival state machine and its async runtime

mod deadline;
mod node;
mod state;

pub use deadline::{DeadlineKind, Deadlines};
pub use node::{MinerHandle, MinerNode};
pub use state::{Arrival, MineStep, MinerState, Phase, RejectReason, TxArrival};

use crate::consensus::CoinError;
use crate::mesh::MeshError;

/// Miner error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MinerError {
    /// Mesh rejected an operation
    Mesh(MeshError),
    /// Weak coin could not be computed; mining halts until a fresh block arrives
    Coin(CoinError),
    /// Block arrived before the miner was bootstrapped
    NotBootstrapped,
}

impl std::fmt::Display for MinerError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MinerError::Mesh(e) => write!(f, "Mesh error: {}", e),
            MinerError::Coin(e) => write!(f, "Weak coin error: {}", e),
            MinerError::NotBootstrapped => write!(f, "Miner is not bootstrapped"),
        }
    }
}

impl std::error::Error for MinerError {}

impl From<MeshError> for MinerError {
    fn from(e: MeshError) -> Self {
        MinerError::Mesh(e)
    }
}

impl From<CoinError> for MinerError {
    fn from(e: CoinError) -> Self {
        MinerError::Coin(e)
    }
}
