// Block data structures

use crate::core::{hash256, BlockId, Hash256, LayerId, Serializable, Transaction};
use super::serialize::{
    read_bool, read_hash, read_u64, read_var_bytes, read_varint, write_bool, write_hash,
    write_u64, write_var_bytes, write_varint,
};
use std::collections::BTreeSet;
use std::io::{Cursor, Read, Write};

/// Proof-of-work solution attached to a finished block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProofOfWork {
    /// Attempt counter value at which the search succeeded
    pub nonce: u64,
    /// Digest binding the nonce to the block's challenge
    pub digest: Hash256,
}

/// A block is the smallest unit of data in the mesh.
///
/// It carries the transactions its miner included plus the miner's view of
/// the DAG: in-degree-zero blocks (`view_heads`) and the recent blocks the
/// Hare protocol approved (`valid_recent_blocks`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Layer this block claims membership in
    pub layer_id: LayerId,
    /// Public key of the producing miner
    pub miner_key: Vec<u8>,
    /// Weak coin output observed when the block was built; `false` while no
    /// fresh block of the layer exists
    pub weak_coin_value: bool,
    /// Blocks not pointed to by any other block in the miner's view
    pub view_heads: BTreeSet<BlockId>,
    /// Recent blocks accepted as votable by the Hare protocol
    pub valid_recent_blocks: BTreeSet<BlockId>,
    /// Built before the layer's coin deadline (abstains from coin votes)
    pub before_coin: bool,
    /// Built before the layer's early-block deadline (abstains from block votes)
    pub early_block: bool,
    /// Included transactions, in inclusion order
    pub txs: Vec<Transaction>,
    /// Proof-of-work; also the block identity
    pub pow: Option<ProofOfWork>,
}

impl Block {
    /// Create an empty block for the given layer
    pub fn new(layer_id: LayerId, miner_key: Vec<u8>) -> Self {
        Self {
            layer_id,
            miner_key,
            weak_coin_value: false,
            view_heads: BTreeSet::new(),
            valid_recent_blocks: BTreeSet::new(),
            before_coin: false,
            early_block: false,
            txs: Vec::new(),
            pow: None,
        }
    }

    /// Genesis placeholder: layer 0, no edges, no proof
    pub fn genesis() -> Self {
        Self::new(0, Vec::new())
    }

    /// Block identity. `None` until a proof is attached.
    pub fn id(&self) -> Option<BlockId> {
        self.pow.map(|proof| BlockId(proof.digest))
    }

    pub fn is_genesis(&self) -> bool {
        self.layer_id == 0
    }

    /// Every block this one points to
    pub fn edges(&self) -> impl Iterator<Item = &BlockId> {
        self.view_heads.union(&self.valid_recent_blocks)
    }

    /// Proof-of-work challenge: digest of all content except the proof
    pub fn challenge(&self) -> Hash256 {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_content(&mut buf);
        hash256(&buf)
    }

    /// Attach a proof, freezing the block's identity
    pub fn seal(&mut self, proof: ProofOfWork) -> BlockId {
        self.pow = Some(proof);
        BlockId(proof.digest)
    }

    fn write_content<W: Write>(&self, buf: &mut W) -> std::io::Result<()> {
        write_u64(buf, self.layer_id)?;
        write_var_bytes(buf, &self.miner_key)?;
        write_bool(buf, self.weak_coin_value)?;

        write_varint(buf, self.view_heads.len() as u64)?;
        for id in &self.view_heads {
            write_hash(buf, &id.0)?;
        }

        write_varint(buf, self.valid_recent_blocks.len() as u64)?;
        for id in &self.valid_recent_blocks {
            write_hash(buf, &id.0)?;
        }

        write_bool(buf, self.before_coin)?;
        write_bool(buf, self.early_block)?;

        write_varint(buf, self.txs.len() as u64)?;
        for tx in &self.txs {
            tx.write_to(buf)?;
        }
        Ok(())
    }
}

fn read_id_set<R: Read>(cursor: &mut R) -> Result<BTreeSet<BlockId>, String> {
    let count = read_varint(cursor).map_err(|e| e.to_string())?;
    let mut ids = BTreeSet::new();
    for _ in 0..count {
        let hash = read_hash(cursor).map_err(|e| e.to_string())?;
        ids.insert(BlockId(hash));
    }
    Ok(ids)
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let _ = self.write_content(&mut buf);

        match &self.pow {
            Some(proof) => {
                buf.push(1);
                let _ = write_u64(&mut buf, proof.nonce);
                let _ = write_hash(&mut buf, &proof.digest);
            }
            None => buf.push(0),
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor::new(data);

        let layer_id = read_u64(&mut cursor).map_err(|e| e.to_string())?;
        let miner_key = read_var_bytes(&mut cursor).map_err(|e| e.to_string())?;
        let weak_coin_value = read_bool(&mut cursor).map_err(|e| e.to_string())?;
        let view_heads = read_id_set(&mut cursor)?;
        let valid_recent_blocks = read_id_set(&mut cursor)?;
        let before_coin = read_bool(&mut cursor).map_err(|e| e.to_string())?;
        let early_block = read_bool(&mut cursor).map_err(|e| e.to_string())?;

        let tx_count = read_varint(&mut cursor).map_err(|e| e.to_string())?;
        let mut txs = Vec::new();
        for _ in 0..tx_count {
            txs.push(Transaction::read_from(&mut cursor)?);
        }

        let pow = if read_bool(&mut cursor).map_err(|e| e.to_string())? {
            let nonce = read_u64(&mut cursor).map_err(|e| e.to_string())?;
            let digest = read_hash(&mut cursor).map_err(|e| e.to_string())?;
            Some(ProofOfWork { nonce, digest })
        } else {
            None
        };

        if (cursor.position() as usize) != data.len() {
            return Err(format!(
                "Trailing bytes after block: {}",
                data.len() - cursor.position() as usize
            ));
        }

        Ok(Self {
            layer_id,
            miner_key,
            weak_coin_value,
            view_heads,
            valid_recent_blocks,
            before_coin,
            early_block,
            txs,
            pow,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        let mut block = Block::new(3, vec![7; 33]);
        block.view_heads.insert(BlockId(hash256(b"a")));
        block.valid_recent_blocks.insert(BlockId(hash256(b"b")));
        block.txs.push(Transaction::new(b"tx".to_vec(), 1));
        block.early_block = true;
        block
    }

    #[test]
    fn test_challenge_ignores_pow() {
        let mut block = sample_block();
        let before = block.challenge();
        block.seal(ProofOfWork { nonce: 5, digest: hash256(b"proof") });
        assert_eq!(block.challenge(), before);
    }

    #[test]
    fn test_challenge_tracks_content() {
        let mut block = sample_block();
        let before = block.challenge();
        block.before_coin = true;
        assert_ne!(block.challenge(), before);
    }

    #[test]
    fn test_id_is_pow_digest() {
        let mut block = sample_block();
        assert_eq!(block.id(), None);

        let digest = hash256(b"proof");
        let id = block.seal(ProofOfWork { nonce: 1, digest });
        assert_eq!(id, BlockId(digest));
        assert_eq!(block.id(), Some(id));
    }

    #[test]
    fn test_block_serialization() {
        let mut block = sample_block();
        block.seal(ProofOfWork { nonce: 42, digest: hash256(b"proof") });

        let decoded = Block::deserialize(&block.serialize()).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_deserialize_rejects_trailing_bytes() {
        let mut bytes = sample_block().serialize();
        bytes.push(0);
        assert!(Block::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_edges_union() {
        let mut block = sample_block();
        let shared = BlockId(hash256(b"a"));
        block.valid_recent_blocks.insert(shared);
        assert_eq!(block.edges().count(), 2);
    }
}
