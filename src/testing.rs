// Shared fixtures for unit tests

use crate::consensus::{PowProtocol, ReferencePow};
use crate::core::{Block, BlockId, LayerId};
use crate::mesh::Mesh;

/// Run `pow` until it succeeds and attach the proof
pub(crate) fn seal_with(block: &mut Block, pow: &mut dyn PowProtocol) -> BlockId {
    pow.set_challenge(block.challenge());
    loop {
        let attempt = pow.try_single_nonce();
        if attempt.success {
            return block.seal(attempt.proof);
        }
    }
}

/// A sealed block at `layer` whose view heads are `parents`.
/// `seed` distinguishes otherwise identical blocks.
pub(crate) fn layer_block(layer: LayerId, seed: u64, parents: &[BlockId]) -> Block {
    let mut block = Block::new(layer, seed.to_le_bytes().to_vec());
    block.view_heads = parents.iter().copied().collect();
    seal_with(&mut block, &mut ReferencePow::new());
    block
}

/// Mesh with `layers` layers above genesis, `tmin` blocks each, every block
/// pointing at the whole previous layer. `ids[0]` holds the genesis ids.
pub(crate) fn mesh_with_layers(tmin: usize, layers: u64) -> (Mesh, Vec<Vec<BlockId>>) {
    let mut mesh = Mesh::new(tmin);
    let mut ids = vec![mesh.layer(0).map(|l| l.blocks.clone()).unwrap_or_default()];

    for layer in 1..=layers {
        let mut current = Vec::with_capacity(tmin);
        for index in 0..tmin {
            let seed = layer * 1_000 + index as u64;
            let block = layer_block(layer, seed, &ids[layer as usize - 1]);
            current.push(mesh.add_block(block).expect("fixture block"));
        }
        ids.push(current);
    }

    (mesh, ids)
}

/// Overwrite layer start timestamps
pub(crate) fn set_layer_starts(mesh: &mut Mesh, start: impl Fn(LayerId) -> u64) {
    for layer in mesh.layers_mut() {
        layer.start_timestamp = start(layer.id);
    }
}
