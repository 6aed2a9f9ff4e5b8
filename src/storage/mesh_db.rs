// Mesh checkpoint database using sled

use crate::core::{Block, BlockId, LayerId, Serializable};
use sled::Db;
use std::path::Path;

/// Checkpoint store for mesh blocks.
///
/// Block keys are `b` + big-endian layer + block id, so a prefix scan yields
/// blocks in layer order. Layer start times live under `l` + big-endian layer.
pub struct MeshDB {
    db: Db,
}

impl MeshDB {
    /// Open (or create) a database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let db = sled::open(path).map_err(|e| format!("Failed to open database: {}", e))?;
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing)
    pub fn memory() -> Result<Self, String> {
        let config = sled::Config::new().temporary(true);
        let db = config.open().map_err(|e| format!("Failed to create memory db: {}", e))?;
        Ok(Self { db })
    }

    /// Store a sealed block
    pub fn store_block(&self, block: &Block) -> Result<BlockId, String> {
        let id = block
            .id()
            .ok_or_else(|| "Cannot store a block without proof of work".to_string())?;

        self.db
            .insert(Self::block_key(block.layer_id, &id), block.serialize())
            .map_err(|e| format!("Failed to store block: {}", e))?;

        Ok(id)
    }

    /// Record when a layer was opened (unix millis)
    pub fn store_layer_start(&self, layer: LayerId, start_timestamp: u64) -> Result<(), String> {
        self.db
            .insert(Self::layer_key(layer), &start_timestamp.to_le_bytes()[..])
            .map_err(|e| format!("Failed to store layer start: {}", e))?;
        Ok(())
    }

    /// Recorded layer start times, lowest layer first
    pub fn load_layer_starts(&self) -> Result<Vec<(LayerId, u64)>, String> {
        let mut starts = Vec::new();
        for entry in self.db.scan_prefix([b'l']) {
            let (key, data) = entry.map_err(|e| format!("Database error: {}", e))?;
            if key.len() != 9 || data.len() != 8 {
                return Err(format!("Invalid layer start entry ({} byte key)", key.len()));
            }
            let mut layer = [0u8; 8];
            layer.copy_from_slice(&key[1..]);
            let mut start = [0u8; 8];
            start.copy_from_slice(&data);
            starts.push((LayerId::from_be_bytes(layer), u64::from_le_bytes(start)));
        }
        Ok(starts)
    }

    /// All stored blocks, lowest layer first
    pub fn load_blocks(&self) -> Result<Vec<Block>, String> {
        let mut blocks = Vec::new();
        for entry in self.db.scan_prefix([b'b']) {
            let (_, data) = entry.map_err(|e| format!("Database error: {}", e))?;
            blocks.push(Block::deserialize(&data)?);
        }
        Ok(blocks)
    }

    /// Number of stored blocks in one layer
    pub fn block_count(&self, layer: LayerId) -> usize {
        let mut prefix = Vec::with_capacity(9);
        prefix.push(b'b');
        prefix.extend_from_slice(&layer.to_be_bytes());
        self.db.scan_prefix(prefix).count()
    }

    /// Record the tmin the checkpoint was built with
    pub fn store_tmin(&self, tmin: usize) -> Result<(), String> {
        self.db
            .insert(b"tmin", &(tmin as u64).to_le_bytes()[..])
            .map_err(|e| format!("Failed to store tmin: {}", e))?;
        Ok(())
    }

    pub fn get_tmin(&self) -> Result<Option<usize>, String> {
        match self.db.get(b"tmin").map_err(|e| format!("Database error: {}", e))? {
            Some(data) => {
                if data.len() != 8 {
                    return Err(format!("Invalid tmin data length: {}", data.len()));
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&data);
                Ok(Some(u64::from_le_bytes(bytes) as usize))
            }
            None => Ok(None),
        }
    }

    /// Manually flush database (call after batch operations)
    pub fn flush(&self) -> Result<(), String> {
        self.db
            .flush()
            .map_err(|e| format!("Failed to flush: {}", e))?;
        Ok(())
    }

    // Helper: create key for block storage
    fn block_key(layer: LayerId, id: &BlockId) -> Vec<u8> {
        let mut key = Vec::with_capacity(41);
        key.push(b'b'); // 'b' for block
        key.extend_from_slice(&layer.to_be_bytes());
        key.extend_from_slice(id.0.as_bytes());
        key
    }

    fn layer_key(layer: LayerId) -> Vec<u8> {
        let mut key = Vec::with_capacity(9);
        key.push(b'l');
        key.extend_from_slice(&layer.to_be_bytes());
        key
    }
}
