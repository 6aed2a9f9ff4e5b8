// Hare protocol: fast, possibly faulty agreement on recent blocks
//
// Each tracked block carries a margin: +1 for every arriving block that has
// it in view, -1 for every arriving block that does not. Blocks with a
// positive margin are votable.

use crate::core::{Block, BlockId, LayerId};
use crate::mesh::Mesh;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

/// Layers back from the mined layer where the consensus window starts
pub const DEFAULT_CONSENSUS_INTERVAL_START: u64 = 2;
/// Layers back from the mined layer where the consensus window ends
pub const DEFAULT_CONSENSUS_INTERVAL_END: u64 = 1;

/// Interchangeable Hare protocol.
///
/// `current_layer` is always the miner's last settled layer; the layer being
/// mined is `current_layer + 1`.
pub trait HareProtocol: Send {
    /// Vote with `new_block`'s view and return the majority-approved blocks
    fn get_valid_blocks(&mut self, new_block: &Block, mesh: &Mesh) -> Vec<BlockId>;

    /// (Re)build opinions from the mesh. Idempotent; existing margins survive.
    fn set_block_opinions(&mut self, mesh: &Mesh, current_layer: LayerId);

    /// Drop the layer that just slid out of the window
    fn remove_oldest_layer_from_opinions(&mut self, current_layer: LayerId);

    /// Start tracking a late block if it falls inside the window
    fn track_block(&mut self, id: BlockId, layer_id: LayerId, current_layer: LayerId) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Opinion {
    layer_id: LayerId,
    margin: i64,
}

/// Majority-vote Hare
#[derive(Debug, Clone)]
pub struct TrivialHare {
    opinions: BTreeMap<BlockId, Opinion>,
    consensus_interval_start: u64,
    consensus_interval_end: u64,
}

impl Default for TrivialHare {
    fn default() -> Self {
        Self::new()
    }
}

impl TrivialHare {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_CONSENSUS_INTERVAL_START, DEFAULT_CONSENSUS_INTERVAL_END)
    }

    pub fn with_interval(start: u64, end: u64) -> Self {
        Self {
            opinions: BTreeMap::new(),
            consensus_interval_start: start.max(end),
            consensus_interval_end: end,
        }
    }

    /// Tracked layers, measured back from the mined layer
    pub fn window(&self, current_layer: LayerId) -> RangeInclusive<LayerId> {
        let mined = current_layer + 1;
        mined.saturating_sub(self.consensus_interval_start)
            ..=mined.saturating_sub(self.consensus_interval_end)
    }
}

impl HareProtocol for TrivialHare {
    fn get_valid_blocks(&mut self, new_block: &Block, mesh: &Mesh) -> Vec<BlockId> {
        let floor = self
            .opinions
            .values()
            .map(|o| o.layer_id)
            .min()
            .unwrap_or(new_block.layer_id);
        let view = mesh.view_of(new_block, floor);

        for (id, opinion) in self.opinions.iter_mut() {
            if view.contains(id) {
                opinion.margin += 1;
            } else {
                opinion.margin -= 1;
            }
        }

        self.opinions
            .iter()
            .filter(|(_, o)| o.margin > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    fn set_block_opinions(&mut self, mesh: &Mesh, current_layer: LayerId) {
        let window = self.window(current_layer);
        self.opinions.retain(|_, o| window.contains(&o.layer_id));

        for layer in window {
            for (id, block) in mesh.blocks_in(layer) {
                self.opinions.entry(*id).or_insert(Opinion {
                    layer_id: block.layer_id,
                    margin: 0,
                });
            }
        }

        log::debug!(
            "Hare tracking {} blocks for layer {}",
            self.opinions.len(),
            current_layer
        );
    }

    fn remove_oldest_layer_from_opinions(&mut self, current_layer: LayerId) {
        let Some(oldest) = current_layer.checked_sub(self.consensus_interval_start) else {
            return;
        };
        self.opinions.retain(|_, o| o.layer_id != oldest);
    }

    fn track_block(&mut self, id: BlockId, layer_id: LayerId, current_layer: LayerId) -> bool {
        if !self.window(current_layer).contains(&layer_id) {
            return false;
        }
        self.opinions.entry(id).or_insert(Opinion { layer_id, margin: 0 });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{layer_block, mesh_with_layers};

    fn margin(hare: &TrivialHare, id: &BlockId) -> Option<i64> {
        hare.opinions.get(id).map(|o| o.margin)
    }

    #[test]
    fn test_window_defaults() {
        let hare = TrivialHare::new();
        assert_eq!(hare.window(5), 4..=5);
        assert_eq!(hare.window(0), 0..=0);
    }

    #[test]
    fn test_set_block_opinions_tracks_window() {
        let (mesh, ids) = mesh_with_layers(2, 3);
        let mut hare = TrivialHare::new();
        hare.set_block_opinions(&mesh, 3);

        assert_eq!(hare.opinions.len(), 4);
        for id in ids[2].iter().chain(ids[3].iter()) {
            assert_eq!(margin(&hare, id), Some(0));
        }
    }

    #[test]
    fn test_margins_move_by_one() {
        let (mesh, ids) = mesh_with_layers(2, 3);
        let mut hare = TrivialHare::new();
        hare.set_block_opinions(&mesh, 3);

        // Sees only the first layer-3 block (and layer 2 through it)
        let voter = layer_block(4, 77, &ids[3][..1]);
        let approved = hare.get_valid_blocks(&voter, &mesh);

        assert_eq!(margin(&hare, &ids[3][0]), Some(1));
        assert_eq!(margin(&hare, &ids[3][1]), Some(-1));
        assert_eq!(margin(&hare, &ids[2][0]), Some(1));
        assert_eq!(margin(&hare, &ids[2][1]), Some(1));

        let mut expected = vec![ids[3][0], ids[2][0], ids[2][1]];
        expected.sort();
        assert_eq!(approved, expected);
    }

    #[test]
    fn test_majority_over_several_votes() {
        let (mesh, ids) = mesh_with_layers(2, 2);
        let mut hare = TrivialHare::new();
        hare.set_block_opinions(&mesh, 2);

        let sees_both = layer_block(3, 1, &ids[2]);
        let sees_first = layer_block(3, 2, &ids[2][..1]);
        let sees_first_again = layer_block(3, 3, &ids[2][..1]);

        hare.get_valid_blocks(&sees_both, &mesh);
        hare.get_valid_blocks(&sees_first, &mesh);
        let approved = hare.get_valid_blocks(&sees_first_again, &mesh);

        assert_eq!(margin(&hare, &ids[2][0]), Some(3));
        assert_eq!(margin(&hare, &ids[2][1]), Some(-1));
        assert!(approved.contains(&ids[2][0]));
        assert!(!approved.contains(&ids[2][1]));
    }

    #[test]
    fn test_remove_oldest_layer() {
        let (mesh, _) = mesh_with_layers(2, 3);
        let mut hare = TrivialHare::new();
        hare.set_block_opinions(&mesh, 3);

        hare.remove_oldest_layer_from_opinions(4);
        assert!(hare.opinions.values().all(|o| o.layer_id != 2));
        assert_eq!(hare.opinions.len(), 2);

        // Nothing to evict before the window exists
        let mut early = TrivialHare::new();
        early.set_block_opinions(&mesh, 0);
        early.remove_oldest_layer_from_opinions(1);
        assert_eq!(early.opinions.len(), 2);
    }

    #[test]
    fn test_set_block_opinions_is_idempotent() {
        let (mesh, ids) = mesh_with_layers(2, 3);
        let mut hare = TrivialHare::new();
        hare.set_block_opinions(&mesh, 3);
        hare.get_valid_blocks(&layer_block(4, 5, &ids[3]), &mesh);

        hare.set_block_opinions(&mesh, 3);
        hare.set_block_opinions(&mesh, 3);
        assert_eq!(hare.opinions.len(), 4);
        assert_eq!(margin(&hare, &ids[3][0]), Some(1));
    }

    #[test]
    fn test_track_block_respects_window() {
        let mut hare = TrivialHare::new();
        let (_, ids) = mesh_with_layers(1, 3);

        assert!(hare.track_block(ids[3][0], 3, 3));
        assert!(hare.track_block(ids[2][0], 2, 3));
        assert!(!hare.track_block(ids[1][0], 1, 3));
        assert_eq!(hare.opinions.len(), 2);
    }
}
