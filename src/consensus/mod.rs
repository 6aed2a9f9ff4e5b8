// Consensus building blocks: proof-of-work, weak coin and Hare

pub mod hare;
pub mod pow;
pub mod weak_coin;

pub use hare::{
    HareProtocol, TrivialHare, DEFAULT_CONSENSUS_INTERVAL_END, DEFAULT_CONSENSUS_INTERVAL_START,
};
pub use pow::{NaivePow, NonceAttempt, PowProtocol, ReferencePow, TargetPow, DEFAULT_DIFFICULTY};
pub use weak_coin::{CoinError, MeshcashWeakCoin, WeakCoinProtocol};
