// Weak coin: a shared pseudorandom bit derived from freshly mined blocks

use crate::core::Block;

/// Weak coin error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinError {
    /// No fresh blocks to derive the coin from
    EmptyInput,
}

impl std::fmt::Display for CoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CoinError::EmptyInput => {
                write!(f, "No fresh blocks, cannot compute the value of the weak coin")
            }
        }
    }
}

impl std::error::Error for CoinError {}

/// Interchangeable weak coin protocol.
///
/// Honest miners observing the same set of fresh blocks must agree on the
/// output regardless of arrival order.
pub trait WeakCoinProtocol: Send {
    fn output_coin(&self, fresh_blocks: &[Block]) -> Result<bool, CoinError>;
}

/// Least-significant bit of the numerically smallest fresh proof-of-work
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshcashWeakCoin;

impl MeshcashWeakCoin {
    pub fn new() -> Self {
        Self
    }
}

impl WeakCoinProtocol for MeshcashWeakCoin {
    fn output_coin(&self, fresh_blocks: &[Block]) -> Result<bool, CoinError> {
        fresh_blocks
            .iter()
            .filter_map(|block| block.pow.map(|proof| proof.digest))
            .min()
            .map(|digest| digest.is_odd())
            .ok_or(CoinError::EmptyInput)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Hash256, ProofOfWork};

    fn block_with_digest(last_byte: u8, first_byte: u8) -> Block {
        let mut digest = [0x55u8; 32];
        digest[0] = first_byte;
        digest[31] = last_byte;
        let mut block = Block::new(1, vec![last_byte]);
        block.seal(ProofOfWork { nonce: 1, digest: Hash256::new(digest) });
        block
    }

    #[test]
    fn test_empty_input_fails() {
        let coin = MeshcashWeakCoin::new();
        assert_eq!(coin.output_coin(&[]), Err(CoinError::EmptyInput));
    }

    #[test]
    fn test_unsealed_blocks_count_as_empty() {
        let coin = MeshcashWeakCoin::new();
        assert_eq!(coin.output_coin(&[Block::new(1, vec![])]), Err(CoinError::EmptyInput));
    }

    #[test]
    fn test_minimal_proof_decides() {
        let coin = MeshcashWeakCoin::new();
        // Smallest digest (first byte 0x01) ends in an odd byte
        let blocks = vec![
            block_with_digest(0x02, 0x90),
            block_with_digest(0x03, 0x01),
            block_with_digest(0x04, 0x40),
        ];
        assert_eq!(coin.output_coin(&blocks), Ok(true));

        let blocks = vec![block_with_digest(0x03, 0x90), block_with_digest(0x08, 0x01)];
        assert_eq!(coin.output_coin(&blocks), Ok(false));
    }

    #[test]
    fn test_order_independent() {
        let coin = MeshcashWeakCoin::new();
        let mut blocks: Vec<Block> = (0u8..10)
            .map(|i| block_with_digest(i, i.wrapping_mul(37)))
            .collect();

        let expected = coin.output_coin(&blocks).unwrap();
        for _ in 0..5 {
            blocks.rotate_left(3);
            blocks.reverse();
            assert_eq!(coin.output_coin(&blocks), Ok(expected));
        }
    }
}
