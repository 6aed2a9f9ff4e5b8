// Meshcash miner
// Layered block-DAG consensus core: mesh, proof-of-work, weak coin, Hare and the miner

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod mesh;
pub mod miner;
pub mod network;
pub mod storage;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use cli::{Cli, CliHandler};
pub use config::{MinerConfig, PowKind};
pub use consensus::{
    CoinError, HareProtocol, MeshcashWeakCoin, NaivePow, PowProtocol, ReferencePow, TargetPow,
    TrivialHare, WeakCoinProtocol,
};
pub use crate::core::{Block, BlockId, LayerId, ProofOfWork, Transaction};
pub use mesh::{Layer, Mesh, MeshError};
pub use miner::{Arrival, MineStep, MinerError, MinerHandle, MinerNode, MinerState, Phase};
pub use network::{BlockGossip, Feed, TransactionListener};
pub use storage::MeshDB;
pub use wallet::MinerIdentity;
