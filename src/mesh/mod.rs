// The mesh: a layered block DAG
//
// Blocks live in an arena keyed by `BlockId`; layers and block edges refer to
// blocks by id only. Stored blocks are never mutated.

mod layer;
mod traversal;

pub use layer::{unix_millis, Layer};

use crate::core::{hash256, Block, BlockId, LayerId};
use crate::network::{BlockGossip, Subscription};
use crate::storage::MeshDB;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Default minimum number of blocks per layer
pub const DEFAULT_TMIN: usize = 200;

/// Mesh error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// Block has no proof-of-work and therefore no identity
    MissingProof,
    /// Block claims a layer beyond the next one to open
    LayerGap { layer: LayerId, layers: usize },
    /// Layer 0 only holds the genesis placeholders
    GenesisLayer,
    /// Block is already stored
    DuplicateBlock(BlockId),
    /// Checkpoint store failure
    Storage(String),
}

impl std::fmt::Display for MeshError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MeshError::MissingProof => write!(f, "Block has no proof of work"),
            MeshError::LayerGap { layer, layers } => {
                write!(f, "Block claims layer {} but mesh has {} layers", layer, layers)
            }
            MeshError::GenesisLayer => write!(f, "Genesis layer is closed"),
            MeshError::DuplicateBlock(id) => write!(f, "Duplicate block {}", id),
            MeshError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for MeshError {}

/// Layered DAG store
#[derive(Debug)]
pub struct Mesh {
    /// Minimal number of blocks in a layer
    tmin: usize,
    layers: Vec<Layer>,
    blocks: HashMap<BlockId, Block>,
    /// Cached syntactic-validity verdicts of stored blocks
    verdicts: HashMap<BlockId, bool>,
}

impl Mesh {
    /// Create a mesh holding the genesis layer with `tmin` placeholder blocks
    pub fn new(tmin: usize) -> Self {
        let mut genesis_layer = Layer::new(0, unix_millis());
        let mut blocks = HashMap::with_capacity(tmin);

        for index in 0..tmin {
            let id = Self::genesis_id(index);
            genesis_layer.blocks.push(id);
            blocks.insert(id, Block::genesis());
        }

        Self {
            tmin,
            layers: vec![genesis_layer],
            blocks,
            verdicts: HashMap::new(),
        }
    }

    /// Synthetic id of the `index`-th genesis placeholder
    pub fn genesis_id(index: usize) -> BlockId {
        let mut seed = b"meshcash-genesis".to_vec();
        seed.extend_from_slice(&(index as u64).to_le_bytes());
        BlockId(hash256(&seed))
    }

    pub fn tmin(&self) -> usize {
        self.tmin
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id as usize)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// All layers except the most recent one, which is still being built
    pub fn get_last_valid_layer(&self) -> &[Layer] {
        &self.layers[..self.layers.len().saturating_sub(1)]
    }

    /// Id of the most recent settled layer, or 0 when only genesis exists
    pub fn last_settled_layer_id(&self) -> LayerId {
        self.get_last_valid_layer().last().map(|l| l.id).unwrap_or(0)
    }

    pub fn get_block(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn block_count(&self, layer: LayerId) -> usize {
        self.layer(layer).map(Layer::len).unwrap_or(0)
    }

    pub fn total_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Blocks of one layer
    pub fn blocks_in(&self, layer: LayerId) -> impl Iterator<Item = (&BlockId, &Block)> {
        self.layer(layer)
            .into_iter()
            .flat_map(|l| l.blocks.iter())
            .filter_map(move |id| self.blocks.get(id).map(|b| (id, b)))
    }

    /// Store a sealed block in the layer matching its `layer_id`.
    ///
    /// Opens a new layer when the block claims the next layer id.
    pub fn add_block(&mut self, block: Block) -> Result<BlockId, MeshError> {
        let id = block.id().ok_or(MeshError::MissingProof)?;
        if block.layer_id == 0 {
            return Err(MeshError::GenesisLayer);
        }
        if self.blocks.contains_key(&id) {
            return Err(MeshError::DuplicateBlock(id));
        }

        let layer = block.layer_id as usize;
        if layer > self.layers.len() {
            return Err(MeshError::LayerGap {
                layer: block.layer_id,
                layers: self.layers.len(),
            });
        }
        if layer == self.layers.len() {
            log::debug!("Opening layer {}", block.layer_id);
            self.layers.push(Layer::new(block.layer_id, unix_millis()));
        }

        self.layers[layer].blocks.push(id);
        self.blocks.insert(id, block);
        Ok(id)
    }

    /// Blocks below `layer` that no block below `layer` points to
    pub fn heads_below(&self, layer: LayerId) -> BTreeSet<BlockId> {
        let eligible: Vec<(&BlockId, &Block)> = self
            .blocks
            .iter()
            .filter(|(_, b)| b.layer_id < layer)
            .collect();

        let pointed: HashSet<&BlockId> = eligible
            .iter()
            .flat_map(|&(_, b)| b.edges())
            .collect();

        eligible
            .into_iter()
            .filter(|(id, _)| !pointed.contains(id))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Hydrate from a checkpoint store. Returns the number of blocks loaded.
    ///
    /// Checkpointed blocks are trusted and recorded as valid. Recorded layer
    /// start times replace the load-time timestamps.
    pub fn initialize(&mut self, store: &MeshDB) -> Result<usize, MeshError> {
        match store.get_tmin().map_err(MeshError::Storage)? {
            Some(stored) if stored != self.tmin => {
                return Err(MeshError::Storage(format!(
                    "Checkpoint tmin {} does not match {}",
                    stored, self.tmin
                )));
            }
            Some(_) => {}
            None => store.store_tmin(self.tmin).map_err(MeshError::Storage)?,
        }

        let mut loaded = 0;
        for block in store.load_blocks().map_err(MeshError::Storage)? {
            let id = block.id().ok_or(MeshError::MissingProof)?;
            if self.contains(&id) {
                continue;
            }
            self.add_block(block)?;
            self.verdicts.insert(id, true);
            loaded += 1;
        }

        for (layer, start) in store.load_layer_starts().map_err(MeshError::Storage)? {
            if let Some(layer) = self.layers.get_mut(layer as usize) {
                layer.start_timestamp = start;
            }
        }

        log::info!(
            "Mesh initialized from checkpoint: {} blocks, {} layers",
            loaded,
            self.layers.len()
        );
        Ok(loaded)
    }

    #[cfg(test)]
    pub(crate) fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    /// Subscribe to newly arriving blocks on the gossip feed
    pub fn register_for_new_arriving_blocks(&self, gossip: &BlockGossip) -> Subscription<Block> {
        gossip.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{layer_block, mesh_with_layers};

    #[test]
    fn test_genesis_layer() {
        let mesh = Mesh::new(200);

        assert_eq!(mesh.layer_count(), 1);
        assert_eq!(mesh.block_count(0), 200);
        assert_eq!(mesh.total_blocks(), 200);
        assert!(mesh.get_last_valid_layer().is_empty());
        assert_eq!(mesh.last_settled_layer_id(), 0);
    }

    #[test]
    fn test_genesis_ids_are_distinct() {
        let mesh = Mesh::new(50);
        let ids: HashSet<_> = mesh.layer(0).unwrap().blocks.iter().collect();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn test_add_block_opens_next_layer() {
        let mut mesh = Mesh::new(3);
        let parents: Vec<_> = mesh.layer(0).unwrap().blocks.clone();
        let block = layer_block(1, 1, &parents);

        let id = mesh.add_block(block).unwrap();
        assert_eq!(mesh.layer_count(), 2);
        assert_eq!(mesh.layer(1).unwrap().blocks, vec![id]);
        assert_eq!(mesh.get_last_valid_layer().len(), 1);
    }

    #[test]
    fn test_add_block_rejects_gap_and_duplicates() {
        let mut mesh = Mesh::new(3);
        let parents: Vec<_> = mesh.layer(0).unwrap().blocks.clone();

        let far = layer_block(3, 1, &parents);
        assert_eq!(
            mesh.add_block(far),
            Err(MeshError::LayerGap { layer: 3, layers: 1 })
        );

        let block = layer_block(1, 1, &parents);
        let id = mesh.add_block(block.clone()).unwrap();
        assert_eq!(mesh.add_block(block), Err(MeshError::DuplicateBlock(id)));
    }

    #[test]
    fn test_add_block_requires_proof() {
        let mut mesh = Mesh::new(1);
        assert_eq!(mesh.add_block(Block::new(1, vec![1])), Err(MeshError::MissingProof));
    }

    #[test]
    fn test_heads_below() {
        let (mesh, ids) = mesh_with_layers(2, 2);

        // Layer 2 blocks are the in-degree-zero blocks below layer 3
        let heads = mesh.heads_below(3);
        assert_eq!(heads, ids[2].iter().copied().collect::<BTreeSet<_>>());

        // Below layer 2 only layer 1 blocks are heads
        let heads = mesh.heads_below(2);
        assert_eq!(heads, ids[1].iter().copied().collect::<BTreeSet<_>>());

        // Below layer 1 the genesis placeholders are heads
        assert_eq!(mesh.heads_below(1).len(), 2);
    }

    #[test]
    fn test_initialize_from_checkpoint() {
        let (source, ids) = mesh_with_layers(2, 2);
        let store = MeshDB::memory().unwrap();
        for layer in &ids[1..] {
            for id in layer {
                store.store_block(source.get_block(id).unwrap()).unwrap();
            }
        }

        let mut mesh = Mesh::new(2);
        assert_eq!(mesh.initialize(&store).unwrap(), 4);
        assert_eq!(mesh.layer_count(), 3);
        assert_eq!(mesh.last_settled_layer_id(), 1);

        // Loading again is a no-op
        assert_eq!(mesh.initialize(&store).unwrap(), 0);
    }

    #[test]
    fn test_initialize_restores_layer_starts() {
        let (source, ids) = mesh_with_layers(2, 2);
        let store = MeshDB::memory().unwrap();
        for id in ids[1..].iter().flatten() {
            store.store_block(source.get_block(id).unwrap()).unwrap();
        }
        store.store_layer_start(1, 10_000).unwrap();
        store.store_layer_start(2, 70_000).unwrap();

        let mut mesh = Mesh::new(2);
        mesh.initialize(&store).unwrap();
        assert_eq!(mesh.layer(1).unwrap().start_timestamp, 10_000);
        assert_eq!(mesh.layer(2).unwrap().start_timestamp, 70_000);
    }

    #[test]
    fn test_initialize_rejects_tmin_mismatch() {
        let store = MeshDB::memory().unwrap();
        store.store_tmin(5).unwrap();

        let mut mesh = Mesh::new(2);
        assert!(matches!(mesh.initialize(&store), Err(MeshError::Storage(_))));
    }
}
