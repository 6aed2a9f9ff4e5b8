// Miner identity management

mod identity;

pub use identity::MinerIdentity;
