// Miner runtime: mining loop plus block and transaction arrival tasks
//
// The three tasks share one `MinerState` behind an async mutex. Arrivals wake
// an idle mining loop through a `Notify`; otherwise it sleeps until the next
// deadline and polls it itself.

use super::{Arrival, MineStep, MinerError, MinerState, TxArrival};
use crate::core::{Block, LayerId, Transaction};
use crate::network::{BlockGossip, Subscription, TransactionListener};
use crate::storage::MeshDB;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// Nonces tried per lock acquisition
const NONCES_PER_LOCK: u32 = 256;
/// Pause after a failed mining step
const ERROR_BACKOFF: Duration = Duration::from_millis(20);

/// Miner wired to its gossip feeds.
///
/// Registration happens on construction, so arrivals published before
/// `start` are buffered rather than lost.
pub struct MinerNode {
    state: Arc<Mutex<MinerState>>,
    gossip: BlockGossip,
    blocks: Subscription<Block>,
    txs: Subscription<Transaction>,
    store: Option<Arc<MeshDB>>,
    wake: Arc<Notify>,
}

impl MinerNode {
    pub fn new(
        state: MinerState,
        gossip: BlockGossip,
        tx_listener: &TransactionListener,
        store: Option<Arc<MeshDB>>,
    ) -> Self {
        log::info!("Registering for newly arriving blocks");
        let blocks = state.mesh().register_for_new_arriving_blocks(&gossip);
        log::info!("Registering for newly arriving transactions");
        let txs = tx_listener.register_for_new_transactions();

        Self {
            state: Arc::new(Mutex::new(state)),
            gossip,
            blocks,
            txs,
            store,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Bootstrap the state machine and spawn the runtime tasks
    pub async fn start(self) -> Result<MinerHandle, MinerError> {
        self.state
            .lock()
            .await
            .bootstrap(self.store.as_deref(), Instant::now())?;

        let tasks = vec![
            tokio::spawn(block_arrivals(
                self.state.clone(),
                self.blocks,
                self.store.clone(),
                self.wake.clone(),
            )),
            tokio::spawn(transaction_arrivals(
                self.state.clone(),
                self.txs,
                self.wake.clone(),
            )),
            tokio::spawn(mining_loop(
                self.state.clone(),
                self.gossip.clone(),
                self.wake.clone(),
            )),
        ];

        Ok(MinerHandle {
            state: self.state,
            tasks,
        })
    }
}

/// Running miner
pub struct MinerHandle {
    state: Arc<Mutex<MinerState>>,
    tasks: Vec<JoinHandle<()>>,
}

impl MinerHandle {
    pub fn state(&self) -> Arc<Mutex<MinerState>> {
        self.state.clone()
    }

    pub async fn layer_counter(&self) -> LayerId {
        self.state.lock().await.layer_counter()
    }

    /// Stop every task of this miner
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        log::info!("Miner stopped");
    }
}

async fn block_arrivals(
    state: Arc<Mutex<MinerState>>,
    mut blocks: Subscription<Block>,
    store: Option<Arc<MeshDB>>,
    wake: Arc<Notify>,
) {
    while let Some(block) = blocks.recv().await {
        let layer = block.layer_id;
        let checkpoint = store.as_ref().map(|_| block.clone());
        let (result, layer_start) = {
            let mut state = state.lock().await;
            let result = state.handle_new_block(block, Instant::now());
            let start = state.mesh().layer(layer).map(|l| l.start_timestamp);
            (result, start)
        };

        match result {
            Ok(arrival @ (Arrival::Integrated | Arrival::LayerAdvanced(_))) => {
                if let Arrival::LayerAdvanced(layer) = arrival {
                    log::info!("Layer {} settled", layer);
                }
                if let (Some(store), Some(block)) = (&store, checkpoint) {
                    if let Err(e) = checkpoint_block(store, &block, layer_start) {
                        log::error!("Failed to checkpoint block: {}", e);
                    }
                }
                wake.notify_one();
            }
            Ok(Arrival::Rejected(_)) | Ok(Arrival::Duplicate) => {}
            Err(e) => {
                log::error!("Block arrival failed: {}", e);
                wake.notify_one();
            }
        }
    }
    log::debug!("Block feed closed");
}

fn checkpoint_block(store: &MeshDB, block: &Block, layer_start: Option<u64>) -> Result<(), String> {
    store.store_block(block)?;
    if let Some(start) = layer_start {
        store.store_layer_start(block.layer_id, start)?;
    }
    Ok(())
}

async fn transaction_arrivals(
    state: Arc<Mutex<MinerState>>,
    mut txs: Subscription<Transaction>,
    wake: Arc<Notify>,
) {
    while let Some(tx) = txs.recv().await {
        if state.lock().await.handle_new_transaction(tx) == TxArrival::Included {
            wake.notify_one();
        }
    }
    log::debug!("Transaction feed closed");
}

async fn mining_loop(state: Arc<Mutex<MinerState>>, gossip: BlockGossip, wake: Arc<Notify>) {
    log::info!("Starting to mine...");
    loop {
        let (step, next_due) = {
            let mut state = state.lock().await;
            let now = Instant::now();
            let mut step = state.mine_step(now);
            let mut tried = 1;
            while matches!(step, Ok(MineStep::Searching)) && tried < NONCES_PER_LOCK {
                step = state.mine_step(now);
                tried += 1;
            }
            (step, state.next_deadline())
        };

        match step {
            Ok(MineStep::Mined(block)) => {
                log::info!("Publishing the mined block for layer {}", block.layer_id);
                gossip.publish(block);
            }
            Ok(MineStep::Searching) => tokio::task::yield_now().await,
            // Sleep until an arrival or the next deadline
            Ok(MineStep::Idle) => match next_due {
                Some(at) => {
                    tokio::select! {
                        _ = wake.notified() => {}
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {}
                    }
                }
                None => wake.notified().await,
            },
            Err(e) => {
                log::error!("Mining step failed: {}", e);
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}
