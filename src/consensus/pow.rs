// Proof-of-work protocols
//
// A stateful challenge/response interface. The miner keys the search with a
// block challenge, tries one nonce at a time, and restarts only when the
// challenge actually changes.

use crate::core::{pow_digest, Hash256, ProofOfWork};
use crate::mesh::{Layer, Mesh};

/// Default number of attempts for the naive protocol
pub const DEFAULT_DIFFICULTY: u64 = 5000;

/// Outcome of a single nonce attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceAttempt {
    pub success: bool,
    pub proof: ProofOfWork,
}

/// Interchangeable proof-of-work protocol
pub trait PowProtocol: Send {
    /// Key the search. Resets progress only if the challenge differs.
    fn set_challenge(&mut self, challenge: Hash256);

    /// Try the next nonce
    fn try_single_nonce(&mut self) -> NonceAttempt;

    /// Check a proof against a block challenge
    fn verify_pow(&self, challenge: &Hash256, proof: &ProofOfWork) -> bool;

    /// Retune difficulty from mesh layer timing; called on every block arrival
    fn adjust_difficulty(&mut self, mesh: &Mesh);

    fn difficulty(&self) -> u64;
}

/// Challenge and attempt counter shared by all protocols
#[derive(Debug, Clone, Default)]
struct SearchState {
    challenge: Hash256,
    last_nonce: u64,
}

impl SearchState {
    fn set_challenge(&mut self, challenge: Hash256) {
        if challenge != self.challenge {
            self.challenge = challenge;
            self.last_nonce = 0;
        }
    }

    fn next(&mut self) -> ProofOfWork {
        self.last_nonce += 1;
        ProofOfWork {
            nonce: self.last_nonce,
            digest: pow_digest(&self.challenge, self.last_nonce),
        }
    }
}

/// Reference protocol: every attempt succeeds and every proof verifies.
/// For exercising protocol logic only.
#[derive(Debug, Clone, Default)]
pub struct ReferencePow {
    search: SearchState,
}

impl ReferencePow {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PowProtocol for ReferencePow {
    fn set_challenge(&mut self, challenge: Hash256) {
        self.search.set_challenge(challenge);
    }

    fn try_single_nonce(&mut self) -> NonceAttempt {
        NonceAttempt {
            success: true,
            proof: self.search.next(),
        }
    }

    fn verify_pow(&self, _challenge: &Hash256, _proof: &ProofOfWork) -> bool {
        true
    }

    fn adjust_difficulty(&mut self, _mesh: &Mesh) {}

    fn difficulty(&self) -> u64 {
        1
    }
}

/// Naive fixed-difficulty protocol: a solution is exactly the
/// `difficulty`-th attempt since the challenge was last set.
#[derive(Debug, Clone)]
pub struct NaivePow {
    search: SearchState,
    difficulty: u64,
}

impl NaivePow {
    pub fn new(difficulty: u64) -> Self {
        Self {
            search: SearchState::default(),
            difficulty,
        }
    }
}

impl Default for NaivePow {
    fn default() -> Self {
        Self::new(DEFAULT_DIFFICULTY)
    }
}

impl PowProtocol for NaivePow {
    fn set_challenge(&mut self, challenge: Hash256) {
        self.search.set_challenge(challenge);
    }

    fn try_single_nonce(&mut self) -> NonceAttempt {
        let proof = self.search.next();
        NonceAttempt {
            success: proof.nonce == self.difficulty,
            proof,
        }
    }

    fn verify_pow(&self, challenge: &Hash256, proof: &ProofOfWork) -> bool {
        proof.nonce == self.difficulty && proof.digest == pow_digest(challenge, proof.nonce)
    }

    fn adjust_difficulty(&mut self, _mesh: &Mesh) {}

    fn difficulty(&self) -> u64 {
        self.difficulty
    }
}

/// Hash-puzzle protocol: the proof digest must carry leading zero bits.
///
/// Layer start times are local observations, so no two nodes agree on a
/// time-derived difficulty. Verification therefore checks the configured
/// floor only, which every node shares. Retargeting moves the local search
/// target between that floor and `MAX_ZERO_BITS` and never affects which
/// blocks are accepted.
#[derive(Debug, Clone)]
pub struct TargetPow {
    search: SearchState,
    /// Minimum zero bits a valid proof carries
    min_zero_bits: u32,
    /// Zero bits the local search aims for
    zero_bits: u32,
    target_layer_millis: u64,
    /// Settled layers seen at the last retarget
    retargeted_at: usize,
}

impl TargetPow {
    pub const MIN_ZERO_BITS: u32 = 1;
    pub const MAX_ZERO_BITS: u32 = 64;
    /// Settled layers averaged per adjustment
    const WINDOW: usize = 8;

    /// `zero_bits` is both the starting search target and the floor every
    /// proof is verified against
    pub fn new(zero_bits: u32, target_layer_secs: u64) -> Self {
        let floor = zero_bits.clamp(Self::MIN_ZERO_BITS, Self::MAX_ZERO_BITS);
        Self {
            search: SearchState::default(),
            min_zero_bits: floor,
            zero_bits: floor,
            target_layer_millis: target_layer_secs * 1000,
            retargeted_at: 0,
        }
    }

    /// Mean duration between consecutive settled layer starts
    fn mean_layer_millis(settled: &[Layer]) -> Option<u64> {
        if settled.len() < 2 {
            return None;
        }
        let recent = &settled[settled.len().saturating_sub(Self::WINDOW + 1)..];
        let spans: Vec<u64> = recent
            .windows(2)
            .map(|w| w[1].start_timestamp.saturating_sub(w[0].start_timestamp))
            .collect();
        Some(spans.iter().sum::<u64>() / spans.len() as u64)
    }
}

impl PowProtocol for TargetPow {
    fn set_challenge(&mut self, challenge: Hash256) {
        self.search.set_challenge(challenge);
    }

    fn try_single_nonce(&mut self) -> NonceAttempt {
        let proof = self.search.next();
        NonceAttempt {
            success: proof.digest.leading_zero_bits() >= self.zero_bits,
            proof,
        }
    }

    fn verify_pow(&self, challenge: &Hash256, proof: &ProofOfWork) -> bool {
        proof.digest.leading_zero_bits() >= self.min_zero_bits
            && proof.digest == pow_digest(challenge, proof.nonce)
    }

    /// Retunes at most once per newly settled layer
    fn adjust_difficulty(&mut self, mesh: &Mesh) {
        let settled = mesh.get_last_valid_layer();
        if settled.len() <= self.retargeted_at {
            return;
        }
        self.retargeted_at = settled.len();

        let Some(mean) = Self::mean_layer_millis(settled) else {
            return;
        };

        let previous = self.zero_bits;
        if mean < self.target_layer_millis / 2 {
            self.zero_bits = (self.zero_bits + 1).min(Self::MAX_ZERO_BITS);
        } else if mean > self.target_layer_millis * 2 {
            self.zero_bits = self.zero_bits.saturating_sub(1).max(self.min_zero_bits);
        }

        if previous != self.zero_bits {
            log::info!(
                "Adjusted search difficulty {} -> {} zero bits (mean layer {} ms, target {} ms)",
                previous,
                self.zero_bits,
                mean,
                self.target_layer_millis
            );
        }
    }

    fn difficulty(&self) -> u64 {
        self.zero_bits as u64
    }
}
