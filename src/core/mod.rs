// Core mesh data structures

mod types;
mod transaction;
mod block;
mod serialize;
mod hash;

pub use types::*;
pub use transaction::*;
pub use block::*;
pub use serialize::*;
pub use hash::*;
