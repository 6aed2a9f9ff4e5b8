// DAG queries: reachability and recursive syntactic validity
//
// Every edge strictly decreases the layer id, so traversals terminate and a
// search for a target can prune any block at or below the target's layer.

use super::Mesh;
use crate::consensus::PowProtocol;
use crate::core::{Block, BlockId, LayerId};
use std::collections::HashSet;

impl Mesh {
    /// True iff `other` is reachable from `block` through view-head and
    /// valid-recent edges.
    pub fn has_in_view(&self, block: &Block, other: &BlockId) -> bool {
        let target_layer = match self.blocks.get(other) {
            Some(b) => b.layer_id,
            None => return false,
        };
        if target_layer >= block.layer_id {
            return false;
        }

        let mut visited: HashSet<BlockId> = HashSet::new();
        let mut stack: Vec<BlockId> = block.edges().copied().collect();

        while let Some(id) = stack.pop() {
            if id == *other {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            let Some(next) = self.blocks.get(&id) else {
                continue;
            };
            // Nothing at or below the target's layer can lead back up to it
            if next.layer_id <= target_layer {
                continue;
            }
            stack.extend(next.edges().filter(|e| !visited.contains(*e)).copied());
        }

        false
    }

    /// Every stored block reachable from `block` whose layer is at least `floor`
    pub fn view_of(&self, block: &Block, floor: LayerId) -> HashSet<BlockId> {
        let mut view = HashSet::new();
        let mut stack: Vec<BlockId> = block.edges().copied().collect();

        while let Some(id) = stack.pop() {
            let Some(next) = self.blocks.get(&id) else {
                continue;
            };
            if next.layer_id < floor || next.layer_id >= block.layer_id {
                continue;
            }
            if view.insert(id) {
                stack.extend(next.edges().filter(|e| !view.contains(*e)).copied());
            }
        }

        view
    }

    /// Syntactic validity:
    /// 1. genesis-layer blocks are always valid
    /// 2. the proof-of-work verifies against the block's challenge
    /// 3. no edge points at the block's own or a later layer
    /// 4. at least `tmin` view heads sit in the previous layer and are
    ///    themselves syntactically valid
    ///
    /// Verdicts for stored blocks are cached; stored blocks never change.
    pub fn is_syntactically_valid(
        &mut self,
        block: &Block,
        pow: &dyn PowProtocol,
        tmin: usize,
    ) -> bool {
        if block.is_genesis() {
            return true;
        }
        if !self.local_checks(block, pow) {
            return false;
        }

        let parents: Vec<BlockId> = self.previous_layer_heads(block);
        if parents.len() < tmin {
            return false;
        }

        let mut valid_parents = 0;
        for parent in parents {
            if self.stored_verdict(parent, pow, tmin) {
                valid_parents += 1;
                if valid_parents >= tmin {
                    return true;
                }
            }
        }
        false
    }

    /// Checks that need no recursion: proof and edge direction
    fn local_checks(&self, block: &Block, pow: &dyn PowProtocol) -> bool {
        let Some(proof) = block.pow.as_ref() else {
            return false;
        };
        if !pow.verify_pow(&block.challenge(), proof) {
            return false;
        }
        block.edges().all(|id| {
            self.blocks
                .get(id)
                .map(|target| target.layer_id < block.layer_id)
                .unwrap_or(true)
        })
    }

    /// Known view heads of `block` lying exactly one layer below it
    fn previous_layer_heads(&self, block: &Block) -> Vec<BlockId> {
        block
            .view_heads
            .iter()
            .filter(|id| {
                self.blocks
                    .get(*id)
                    .map(|b| b.layer_id + 1 == block.layer_id)
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }

    /// Validity of a stored block, evaluated bottom-up with an explicit stack
    fn stored_verdict(&mut self, root: BlockId, pow: &dyn PowProtocol, tmin: usize) -> bool {
        let mut stack: Vec<(BlockId, bool)> = vec![(root, false)];

        while let Some((id, expanded)) = stack.pop() {
            if self.verdicts.contains_key(&id) {
                continue;
            }
            let Some(block) = self.blocks.get(&id) else {
                self.verdicts.insert(id, false);
                continue;
            };
            if block.is_genesis() {
                self.verdicts.insert(id, true);
                continue;
            }

            let parents = self.previous_layer_heads(block);
            if !expanded {
                stack.push((id, true));
                for parent in parents {
                    if !self.verdicts.contains_key(&parent) {
                        stack.push((parent, false));
                    }
                }
                continue;
            }

            let valid_parents = parents
                .iter()
                .filter(|p| self.verdicts.get(*p).copied().unwrap_or(false))
                .count();
            let verdict = valid_parents >= tmin && self.local_checks(block, pow);
            self.verdicts.insert(id, verdict);
        }

        self.verdicts.get(&root).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{NaivePow, ReferencePow};
    use crate::core::{hash256, pow_digest, ProofOfWork};
    use crate::testing::{layer_block, mesh_with_layers, seal_with};

    #[test]
    fn test_genesis_always_valid() {
        let mut mesh = Mesh::new(5);
        let pow = NaivePow::new(10);
        assert!(mesh.is_syntactically_valid(&Block::genesis(), &pow, 5));
        assert!(mesh.is_syntactically_valid(&Block::genesis(), &pow, 1000));
    }

    #[test]
    fn test_valid_block_needs_tmin_parents() {
        let mut mesh = Mesh::new(4);
        let genesis = mesh.layer(0).unwrap().blocks.clone();
        let pow = ReferencePow::new();

        let enough = layer_block(1, 1, &genesis);
        assert!(mesh.is_syntactically_valid(&enough, &pow, 4));

        let too_few = layer_block(1, 2, &genesis[..3]);
        assert!(!mesh.is_syntactically_valid(&too_few, &pow, 4));
    }

    #[test]
    fn test_unknown_parents_do_not_count() {
        let mut mesh = Mesh::new(2);
        let genesis = mesh.layer(0).unwrap().blocks.clone();
        let pow = ReferencePow::new();

        let strangers = vec![BlockId(hash256(b"x")), BlockId(hash256(b"y"))];
        let block = layer_block(1, 1, &[genesis[0], strangers[0], strangers[1]]);
        assert!(!mesh.is_syntactically_valid(&block, &pow, 2));
    }

    #[test]
    fn test_invalid_proof_rejected() {
        let mut mesh = Mesh::new(2);
        let genesis = mesh.layer(0).unwrap().blocks.clone();

        let mut naive = NaivePow::new(3);
        let mut block = layer_block(1, 1, &genesis);
        let challenge = block.challenge();
        block.pow = Some(ProofOfWork { nonce: 1, digest: pow_digest(&challenge, 1) });
        assert!(!mesh.is_syntactically_valid(&block, &naive, 2));

        seal_with(&mut block, &mut naive);
        assert!(mesh.is_syntactically_valid(&block, &naive, 2));
    }

    #[test]
    fn test_recursive_validity_through_layers() {
        let (mut mesh, ids) = mesh_with_layers(3, 3);
        let pow = ReferencePow::new();

        let top = layer_block(4, 9, &ids[3]);
        assert!(mesh.is_syntactically_valid(&top, &pow, 3));
    }

    #[test]
    fn test_invalid_ancestor_poisons_descendants() {
        let mut mesh = Mesh::new(2);
        let genesis = mesh.layer(0).unwrap().blocks.clone();
        let pow = ReferencePow::new();

        // Layer-1 blocks that only point at one genesis block are invalid
        let weak_a = layer_block(1, 1, &genesis[..1]);
        let weak_b = layer_block(1, 2, &genesis[..1]);
        let a = mesh.add_block(weak_a).unwrap();
        let b = mesh.add_block(weak_b).unwrap();

        let child = layer_block(2, 3, &[a, b]);
        assert!(!mesh.is_syntactically_valid(&child, &pow, 2));
    }

    #[test]
    fn test_forward_edge_rejected() {
        let (mut mesh, ids) = mesh_with_layers(2, 2);
        let pow = ReferencePow::new();

        let mut parents = ids[1].clone();
        parents.push(ids[2][0]);
        let block = layer_block(2, 7, &parents);
        assert!(!mesh.is_syntactically_valid(&block, &pow, 2));
    }

    #[test]
    fn test_has_in_view_direct_and_transitive() {
        let (mesh, ids) = mesh_with_layers(2, 3);
        let top = mesh.get_block(&ids[3][0]).unwrap();

        assert!(mesh.has_in_view(top, &ids[2][0]));
        assert!(mesh.has_in_view(top, &ids[1][1]));
        assert!(mesh.has_in_view(top, &ids[0][0]));
    }

    #[test]
    fn test_has_in_view_rejects_same_and_later_layers() {
        let (mesh, ids) = mesh_with_layers(2, 3);
        let mid = mesh.get_block(&ids[2][0]).unwrap();

        assert!(!mesh.has_in_view(mid, &ids[2][1]));
        assert!(!mesh.has_in_view(mid, &ids[2][0]));
        assert!(!mesh.has_in_view(mid, &ids[3][0]));
    }

    #[test]
    fn test_has_in_view_is_transitive() {
        let (mesh, ids) = mesh_with_layers(2, 3);
        let all: Vec<BlockId> = ids.iter().flatten().copied().collect();

        for a in &all {
            let block_a = mesh.get_block(a).unwrap();
            for b in &all {
                if !mesh.has_in_view(block_a, b) {
                    continue;
                }
                let block_b = mesh.get_block(b).unwrap();
                for c in &all {
                    if mesh.has_in_view(block_b, c) {
                        assert!(mesh.has_in_view(block_a, c));
                    }
                }
            }
        }
    }

    #[test]
    fn test_has_in_view_follows_valid_recent_edges() {
        let mut mesh = Mesh::new(2);
        let genesis = mesh.layer(0).unwrap().blocks.clone();

        let a = mesh.add_block(layer_block(1, 1, &genesis[..1])).unwrap();
        let mut block = layer_block(2, 2, &[]);
        block.valid_recent_blocks.insert(a);

        assert!(mesh.has_in_view(&block, &a));
        assert!(mesh.has_in_view(&block, &genesis[0]));
        assert!(!mesh.has_in_view(&block, &genesis[1]));
    }

    #[test]
    fn test_view_of_respects_floor() {
        let (mesh, ids) = mesh_with_layers(2, 3);
        let top = mesh.get_block(&ids[3][0]).unwrap();

        let view = mesh.view_of(top, 2);
        assert_eq!(view.len(), 2);
        assert!(ids[2].iter().all(|id| view.contains(id)));

        let full = mesh.view_of(top, 0);
        assert_eq!(full.len(), 6);
    }
}
