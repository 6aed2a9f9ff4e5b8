// Miner state machine
//
// All mutable miner state lives here and is driven by three inputs: block
// arrivals, transaction arrivals and mining steps. The runtime serializes
// them behind one lock, so none of these methods ever sees a torn block.

use super::deadline::{DeadlineKind, Deadlines};
use super::MinerError;
use crate::config::MinerConfig;
use crate::consensus::{
    CoinError, HareProtocol, MeshcashWeakCoin, PowProtocol, TrivialHare, WeakCoinProtocol,
};
use crate::core::{Block, BlockId, Hash256, LayerId, Transaction, TxId};
use crate::mesh::Mesh;
use crate::storage::MeshDB;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Bootstrapping,
    /// Waiting for the layer counter to move past `observed`
    WaitingForLayerStart { observed: LayerId },
    Mining,
}

/// Why an arriving block was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingProof,
    GenesisLayer,
    LayerGap { layer: LayerId, layers: usize },
    SyntacticallyInvalid,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RejectReason::MissingProof => write!(f, "no proof of work"),
            RejectReason::GenesisLayer => write!(f, "claims the genesis layer"),
            RejectReason::LayerGap { layer, layers } => {
                write!(f, "claims layer {} but only {} layers are known", layer, layers)
            }
            RejectReason::SyntacticallyInvalid => write!(f, "syntactically invalid"),
        }
    }
}

/// Outcome of a block arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    Rejected(RejectReason),
    Duplicate,
    Integrated,
    /// Integrated and advanced the layer counter to the given layer
    LayerAdvanced(LayerId),
}

/// Outcome of a transaction arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxArrival {
    Included,
    AlreadyConfirmed,
    AlreadyIncluded,
    Invalid,
}

/// Outcome of one mining step
#[derive(Debug, Clone, PartialEq)]
pub enum MineStep {
    /// Nothing to mine right now
    Idle,
    /// One nonce tried without success
    Searching,
    /// A sealed block ready to publish
    Mined(Block),
}

pub struct MinerState {
    miner_key: Vec<u8>,
    mesh: Mesh,
    pow: Box<dyn PowProtocol>,
    weak_coin: Box<dyn WeakCoinProtocol>,
    hare: Box<dyn HareProtocol>,
    phase: Phase,

    /// Last completed layer; the in-progress block sits one above
    layer_counter: LayerId,
    current_mined_block: Block,
    current_block_changed: bool,
    current_challenge: Option<Hash256>,
    /// Layer of the last published block; one block per layer slot
    last_mined_layer: Option<LayerId>,

    /// In-degree-zero blocks of the observed DAG below the mined layer
    current_heads: BTreeSet<BlockId>,
    /// Observed blocks at or above the mined layer, in arrival order
    pending_heads: Vec<BlockId>,
    voting_edges: BTreeSet<BlockId>,
    fresh_blocks: Vec<Block>,
    /// Set when the coin cannot be computed and the block may not abstain
    coin_halted: bool,

    deadlines: Deadlines,
    delta: Duration,
    delta_coin: Duration,

    /// Transaction -> layer it was confirmed at
    confirmed_txs: HashMap<TxId, LayerId>,
    /// Transactions seen in blocks since the last layer advance
    newly_confirmed_txs: Vec<Transaction>,
    newly_confirmed_ids: HashSet<TxId>,
}

impl MinerState {
    /// Miner with the protocols named by `config`
    pub fn new(miner_key: Vec<u8>, mesh: Mesh, config: &MinerConfig) -> Self {
        Self::with_protocols(
            miner_key,
            mesh,
            config.build_pow(),
            Box::new(MeshcashWeakCoin::new()),
            Box::new(TrivialHare::with_interval(
                config.consensus_interval_start,
                config.consensus_interval_end,
            )),
            config.delta(),
            config.delta_coin(),
        )
    }

    pub fn with_protocols(
        miner_key: Vec<u8>,
        mesh: Mesh,
        pow: Box<dyn PowProtocol>,
        weak_coin: Box<dyn WeakCoinProtocol>,
        hare: Box<dyn HareProtocol>,
        delta: Duration,
        delta_coin: Duration,
    ) -> Self {
        let current_mined_block = Block::new(1, miner_key.clone());
        Self {
            miner_key,
            mesh,
            pow,
            weak_coin,
            hare,
            phase: Phase::Bootstrapping,
            layer_counter: 0,
            current_mined_block,
            current_block_changed: true,
            current_challenge: None,
            last_mined_layer: None,
            current_heads: BTreeSet::new(),
            pending_heads: Vec::new(),
            voting_edges: BTreeSet::new(),
            fresh_blocks: Vec::new(),
            coin_halted: false,
            deadlines: Deadlines::new(),
            delta,
            delta_coin,
            confirmed_txs: HashMap::new(),
            newly_confirmed_txs: Vec::new(),
            newly_confirmed_ids: HashSet::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn layer_counter(&self) -> LayerId {
        self.layer_counter
    }

    /// Layer the in-progress block belongs to
    pub fn mined_layer(&self) -> LayerId {
        self.layer_counter + 1
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn current_block(&self) -> &Block {
        &self.current_mined_block
    }

    pub fn current_heads(&self) -> &BTreeSet<BlockId> {
        &self.current_heads
    }

    pub fn pending_heads(&self) -> &[BlockId] {
        &self.pending_heads
    }

    pub fn voting_edges(&self) -> &BTreeSet<BlockId> {
        &self.voting_edges
    }

    pub fn fresh_blocks(&self) -> &[Block] {
        &self.fresh_blocks
    }

    pub fn deadlines(&self) -> &Deadlines {
        &self.deadlines
    }

    /// Earliest pending flag deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.next_due()
    }

    pub fn coin_halted(&self) -> bool {
        self.coin_halted
    }

    pub fn content_changed(&self) -> bool {
        self.current_block_changed
    }

    pub fn confirmed_at(&self, txid: &TxId) -> Option<LayerId> {
        self.confirmed_txs.get(txid).copied()
    }

    pub fn newly_confirmed_txs(&self) -> &[Transaction] {
        &self.newly_confirmed_txs
    }

    pub fn difficulty(&self) -> u64 {
        self.pow.difficulty()
    }

    /// Hydrate the mesh, set the layer counter, prime Hare opinions and the
    /// head set. A mesh holding only genesis is a new network and mining
    /// starts right away; otherwise mining waits for the next layer.
    pub fn bootstrap(&mut self, store: Option<&MeshDB>, now: Instant) -> Result<(), MinerError> {
        if self.phase != Phase::Bootstrapping {
            log::debug!("Miner already bootstrapped");
            return Ok(());
        }

        if let Some(store) = store {
            log::info!("Updating to the latest mesh...");
            self.mesh.initialize(store)?;
        }

        self.layer_counter = self.mesh.last_settled_layer_id();
        log::info!("Setting layer counter to {}", self.layer_counter);

        self.hare.set_block_opinions(&self.mesh, self.layer_counter);

        let mined = self.mined_layer();
        let mesh = &self.mesh;
        self.current_heads = mesh.heads_below(mined);
        self.pending_heads = (mined..mesh.layer_count() as LayerId)
            .flat_map(move |layer| mesh.blocks_in(layer).map(|(id, _)| *id))
            .collect();
        // Blocks already in the layer being mined count as fresh
        self.fresh_blocks = mesh.blocks_in(mined).map(|(_, b)| b.clone()).collect();

        if self.mesh.layer_count() == 1 {
            log::info!("Mesh holds only genesis, starting to mine layer {}", mined);
            self.phase = Phase::Mining;
            self.begin_layer(now);
        } else {
            log::info!("Waiting for the next layer to start mining...");
            self.phase = Phase::WaitingForLayerStart {
                observed: self.layer_counter,
            };
        }

        self.update_current_block()?;
        self.current_block_changed = true;
        Ok(())
    }

    /// Integrate an arriving block: validate, vote, update heads and fresh
    /// blocks, advance the layer when it fills up, and rebuild the
    /// in-progress block.
    pub fn handle_new_block(&mut self, block: Block, now: Instant) -> Result<Arrival, MinerError> {
        if self.phase == Phase::Bootstrapping {
            return Err(MinerError::NotBootstrapped);
        }

        let Some(id) = block.id() else {
            log::warn!("Dropping block without proof of work");
            return Ok(Arrival::Rejected(RejectReason::MissingProof));
        };
        log::debug!("Block {} arrived for layer {}", id.short(), block.layer_id);

        if self.mesh.contains(&id) {
            return Ok(Arrival::Duplicate);
        }
        if let Some(reason) = self.structural_reject(&block) {
            log::warn!("Block {} rejected: {}", id.short(), reason);
            return Ok(Arrival::Rejected(reason));
        }
        let tmin = self.mesh.tmin();
        if !self.mesh.is_syntactically_valid(&block, self.pow.as_ref(), tmin) {
            log::warn!("Block {} is syntactically invalid", id.short());
            return Ok(Arrival::Rejected(RejectReason::SyntacticallyInvalid));
        }

        self.voting_edges = self
            .hare
            .get_valid_blocks(&block, &self.mesh)
            .into_iter()
            .collect();

        self.update_heads(id, &block);

        for tx in &block.txs {
            if self.newly_confirmed_ids.insert(tx.txid()) {
                self.newly_confirmed_txs.push(tx.clone());
            }
        }

        let advance = self.should_update_layer_counter(&block);
        let layer = block.layer_id;
        self.fresh_blocks.push(block.clone());
        self.mesh.add_block(block)?;

        let arrival = if advance {
            self.advance_layer(now);
            Arrival::LayerAdvanced(self.layer_counter)
        } else {
            self.hare.track_block(id, layer, self.layer_counter);
            Arrival::Integrated
        };

        self.pow.adjust_difficulty(&self.mesh);

        let coin = self.update_current_block();
        self.current_block_changed = true;

        if let Phase::WaitingForLayerStart { observed } = self.phase {
            if self.layer_counter > observed {
                log::info!("Starting to mine layer {}", self.mined_layer());
                self.phase = Phase::Mining;
            }
        }

        coin?;
        Ok(arrival)
    }

    /// Queue an arriving transaction for inclusion in the in-progress block
    pub fn handle_new_transaction(&mut self, tx: Transaction) -> TxArrival {
        let txid = tx.txid();
        if self.confirmed_txs.contains_key(&txid) {
            return TxArrival::AlreadyConfirmed;
        }
        if !tx.is_syntactically_valid() {
            log::warn!("Dropping syntactically invalid transaction {}", txid);
            return TxArrival::Invalid;
        }
        if self.current_mined_block.txs.contains(&tx) {
            return TxArrival::AlreadyIncluded;
        }

        log::debug!("Including transaction {}", txid);
        self.current_mined_block.txs.push(tx);
        self.current_block_changed = true;
        TxArrival::Included
    }

    /// Clear every flag whose deadline has passed. Fails if the coin
    /// deadline passes with no fresh block to derive the coin from.
    pub fn poll_deadlines(&mut self, now: Instant) -> Result<Vec<DeadlineKind>, MinerError> {
        let expired = self.deadlines.take_expired(now);
        let mut coin = Ok(());

        for kind in &expired {
            match kind {
                DeadlineKind::EarlyBlock => {
                    log::debug!("Setting `early block`=false");
                    self.current_mined_block.early_block = false;
                }
                DeadlineKind::BeforeCoin => {
                    log::debug!("Setting `before coin`=false");
                    self.current_mined_block.before_coin = false;
                    coin = self.refresh_coin();
                }
            }
            self.current_block_changed = true;
        }

        coin?;
        Ok(expired)
    }

    /// One iteration of the mining loop: re-key the challenge if the block
    /// changed, then try a single nonce.
    pub fn mine_step(&mut self, now: Instant) -> Result<MineStep, MinerError> {
        self.poll_deadlines(now)?;

        if self.phase != Phase::Mining || self.coin_halted {
            return Ok(MineStep::Idle);
        }
        // Already mined this layer slot, wait for the next one
        if self.last_mined_layer == Some(self.mined_layer()) {
            return Ok(MineStep::Idle);
        }

        if self.current_block_changed || self.current_challenge.is_none() {
            let challenge = self.current_mined_block.challenge();
            self.pow.set_challenge(challenge);
            self.current_challenge = Some(challenge);
            self.current_block_changed = false;
        }

        let attempt = self.pow.try_single_nonce();
        if !attempt.success {
            return Ok(MineStep::Searching);
        }

        let mut block = self.current_mined_block.clone();
        let id = block.seal(attempt.proof);
        self.last_mined_layer = Some(block.layer_id);
        log::info!(
            "Found a proof of work for layer {} block {}",
            block.layer_id,
            id.short()
        );
        Ok(MineStep::Mined(block))
    }

    fn structural_reject(&self, block: &Block) -> Option<RejectReason> {
        if block.layer_id == 0 {
            return Some(RejectReason::GenesisLayer);
        }
        let layers = self.mesh.layer_count();
        if block.layer_id as usize > layers {
            return Some(RejectReason::LayerGap {
                layer: block.layer_id,
                layers,
            });
        }
        None
    }

    /// True once the layer above the counter holds `tmin` blocks, counting
    /// the arriving one.
    fn should_update_layer_counter(&self, block: &Block) -> bool {
        let next = self.mined_layer();
        let arriving = usize::from(block.layer_id == next);
        self.mesh.block_count(next) + arriving >= self.mesh.tmin()
    }

    /// Add `id` to the head set and drop the heads it points to. Blocks at
    /// or above the mined layer wait in `pending_heads`.
    fn update_heads(&mut self, id: BlockId, block: &Block) {
        if block.layer_id >= self.mined_layer() {
            self.pending_heads.push(id);
            return;
        }
        self.admit_head(id, block.layer_id, block.edges().copied().collect());
    }

    fn admit_head(&mut self, id: BlockId, layer: LayerId, edges: Vec<BlockId>) {
        for edge in &edges {
            self.current_heads.remove(edge);
        }
        if !self.is_covered(&id, layer) {
            self.current_heads.insert(id);
        }
    }

    /// True if an observed block below the mined layer already points at `id`
    fn is_covered(&self, id: &BlockId, layer: LayerId) -> bool {
        (layer + 1..self.mined_layer()).any(|above| {
            self.mesh
                .blocks_in(above)
                .any(|(_, b)| b.edges().any(|e| e == id))
        })
    }

    fn advance_layer(&mut self, now: Instant) {
        self.layer_counter += 1;
        log::info!("Incrementing layer counter to {}", self.layer_counter);

        self.fresh_blocks.clear();
        self.begin_layer(now);

        // Pending blocks of the newly opened layer become eligible heads
        let mined = self.mined_layer();
        let pending = std::mem::take(&mut self.pending_heads);
        for id in pending {
            let Some(block) = self.mesh.get_block(&id) else {
                continue;
            };
            if block.layer_id >= mined {
                self.pending_heads.push(id);
                continue;
            }
            let layer = block.layer_id;
            let edges: Vec<BlockId> = block.edges().copied().collect();
            self.admit_head(id, layer, edges);
        }

        self.hare.remove_oldest_layer_from_opinions(self.layer_counter);
        self.hare.set_block_opinions(&self.mesh, self.layer_counter);

        let confirmed_layer = self.layer_counter - 1;
        for tx in self.newly_confirmed_txs.drain(..) {
            self.confirmed_txs.insert(tx.txid(), confirmed_layer);
        }
        self.newly_confirmed_ids.clear();
        let confirmed = &self.confirmed_txs;
        self.current_mined_block
            .txs
            .retain(|tx| !confirmed.contains_key(&tx.txid()));
    }

    /// Raise both flags and (re)arm their deadlines for the new layer
    fn begin_layer(&mut self, now: Instant) {
        self.current_mined_block.early_block = true;
        self.deadlines.arm(DeadlineKind::EarlyBlock, now, self.delta);
        self.current_mined_block.before_coin = true;
        self.deadlines.arm(DeadlineKind::BeforeCoin, now, self.delta_coin);
        log::debug!(
            "Armed deadlines: early block in {:?}, before coin in {:?}",
            self.delta,
            self.delta_coin
        );
    }

    /// Rebuild the in-progress block from the miner's view
    fn update_current_block(&mut self) -> Result<(), CoinError> {
        let mined = self.mined_layer();
        let block = &mut self.current_mined_block;

        block.miner_key = self.miner_key.clone();
        block.layer_id = mined;
        block.view_heads = self.current_heads.clone();

        let mesh = &self.mesh;
        block.valid_recent_blocks = self
            .voting_edges
            .iter()
            .filter(|id| mesh.get_block(id).map(|b| b.layer_id < mined).unwrap_or(false))
            .copied()
            .collect();

        self.refresh_coin()
    }

    fn refresh_coin(&mut self) -> Result<(), CoinError> {
        match self.weak_coin.output_coin(&self.fresh_blocks) {
            Ok(value) => {
                self.current_mined_block.weak_coin_value = value;
                self.coin_halted = false;
                Ok(())
            }
            // No coin for this layer yet; abstaining blocks carry `false`
            Err(CoinError::EmptyInput) if self.current_mined_block.before_coin => {
                self.current_mined_block.weak_coin_value = false;
                self.coin_halted = false;
                Ok(())
            }
            Err(e) => {
                if !self.coin_halted {
                    log::error!("Halting mining: {}", e);
                }
                self.coin_halted = true;
                Err(e)
            }
        }
    }
}
