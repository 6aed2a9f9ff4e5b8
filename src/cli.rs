// CLI commands

use crate::config::{MinerConfig, PowKind};
use crate::core::{LayerId, Transaction};
use crate::mesh::Mesh;
use crate::miner::{MinerHandle, MinerNode, MinerState};
use crate::network::{BlockGossip, Feed, TransactionListener};
use crate::storage::MeshDB;
use crate::wallet::MinerIdentity;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "meshcash")]
#[command(about = "Meshcash layered block-DAG miner", long_about = None)]
pub struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the identity and the mesh checkpoint
    #[arg(long, global = true, default_value = "./data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single miner (requires tmin 1) until Ctrl-C
    Run {
        /// Minimum number of blocks per layer
        #[arg(long)]
        tmin: Option<usize>,
        /// Proof-of-work protocol (reference, naive, target)
        #[arg(long)]
        pow: Option<PowKind>,
        /// Proof-of-work difficulty
        #[arg(long)]
        difficulty: Option<u64>,
        /// Do not checkpoint the mesh
        #[arg(long)]
        no_persist: bool,
    },

    /// Run several miners in one process on a shared gossip feed
    Simulate {
        /// Number of miners
        #[arg(long, default_value = "4")]
        miners: usize,
        /// Stop once every miner settled this many layers
        #[arg(long, default_value = "5")]
        layers: LayerId,
        /// Minimum number of blocks per layer
        #[arg(long, default_value = "3")]
        tmin: usize,
        /// Proof-of-work protocol (reference, naive, target)
        #[arg(long, default_value = "naive")]
        pow: PowKind,
        /// Proof-of-work difficulty
        #[arg(long, default_value = "50")]
        difficulty: u64,
        /// Transactions to submit at start
        #[arg(long, default_value = "0")]
        txs: usize,
        /// Give up after this many seconds
        #[arg(long, default_value = "60")]
        timeout: u64,
    },

    /// Show the miner identity, generating one if needed
    Identity {
        /// Replace the existing identity
        #[arg(long)]
        new: bool,
    },

    /// Print the mesh checkpoint contents
    Info,
}

/// CLI handler
pub struct CliHandler {
    data_dir: PathBuf,
    config: MinerConfig,
}

impl CliHandler {
    /// Create a new CLI handler
    pub fn new(cli: &Cli) -> Result<Self, String> {
        let config = match &cli.config {
            Some(path) => {
                log::info!("Loading config from {}", path.display());
                MinerConfig::load(path)?
            }
            None => MinerConfig::default(),
        };
        let data_dir = config.data_dir.clone().unwrap_or_else(|| cli.data_dir.clone());

        Ok(Self { data_dir, config })
    }

    fn identity_path(&self) -> PathBuf {
        self.data_dir.join("identity.json")
    }

    fn mesh_path(&self) -> PathBuf {
        self.data_dir.join("mesh")
    }

    fn ensure_data_dir(&self) -> Result<(), String> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| format!("Failed to create data directory: {}", e))
    }

    /// Handle CLI command
    pub async fn handle(&mut self, cli: Cli) -> Result<(), String> {
        match cli.command {
            Commands::Run {
                tmin,
                pow,
                difficulty,
                no_persist,
            } => {
                if let Some(tmin) = tmin {
                    self.config.tmin = tmin;
                }
                if let Some(pow) = pow {
                    self.config.pow = pow;
                }
                if let Some(difficulty) = difficulty {
                    self.config.difficulty = difficulty;
                }
                self.run(no_persist).await
            }
            Commands::Simulate {
                miners,
                layers,
                tmin,
                pow,
                difficulty,
                txs,
                timeout,
            } => {
                self.config.tmin = tmin;
                self.config.pow = pow;
                self.config.difficulty = difficulty;
                self.config.delta_seconds = 1;
                self.config.delta_coin_seconds = 5;
                self.simulate(miners, layers, txs, Duration::from_secs(timeout))
                    .await
            }
            Commands::Identity { new } => self.identity(new),
            Commands::Info => self.info(),
        }
    }

    /// Run a single miner
    async fn run(&self, no_persist: bool) -> Result<(), String> {
        self.config.validate()?;
        // Nobody else publishes on this node's feed
        if self.config.tmin > 1 {
            return Err(format!(
                "a single miner can never fill a layer of {} blocks; use --tmin 1 or `simulate`",
                self.config.tmin
            ));
        }
        self.ensure_data_dir()?;

        let identity = MinerIdentity::load_or_generate(self.identity_path())?;
        let store = if no_persist {
            None
        } else {
            Some(Arc::new(MeshDB::new(self.mesh_path())?))
        };

        let gossip: BlockGossip = Feed::default();
        let txs: TransactionListener = Feed::default();
        let state = MinerState::new(identity.miner_key(), Mesh::new(self.config.tmin), &self.config);
        let handle = MinerNode::new(state, gossip, &txs, store.clone())
            .start()
            .await
            .map_err(|e| e.to_string())?;

        println!("✓ Miner {} running", identity.miner_key_hex());
        println!("  tmin: {}", self.config.tmin);
        println!("  Press Ctrl-C to stop");

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| format!("Failed to wait for Ctrl-C: {}", e))?;

        let layer = handle.layer_counter().await;
        handle.shutdown();
        if let Some(store) = store {
            store.flush()?;
        }

        println!("Stopped at layer {}", layer);
        Ok(())
    }

    /// Run `miners` miners until each settled `layers` layers
    async fn simulate(
        &self,
        miners: usize,
        layers: LayerId,
        txs: usize,
        timeout: Duration,
    ) -> Result<(), String> {
        self.config.validate()?;
        if miners < self.config.tmin {
            return Err(format!(
                "{} miners can never fill a layer of {} blocks",
                miners, self.config.tmin
            ));
        }

        let gossip: BlockGossip = Feed::default();
        let tx_feed: TransactionListener = Feed::default();

        // Every miner registers before any of them mines
        let nodes: Vec<(MinerIdentity, MinerNode)> = (0..miners)
            .map(|_| {
                let identity = MinerIdentity::generate();
                let state = MinerState::new(
                    identity.miner_key(),
                    Mesh::new(self.config.tmin),
                    &self.config,
                );
                let node = MinerNode::new(state, gossip.clone(), &tx_feed, None);
                (identity, node)
            })
            .collect();

        let mut handles: Vec<(MinerIdentity, MinerHandle)> = Vec::with_capacity(miners);
        for (identity, node) in nodes {
            let handle = node.start().await.map_err(|e| e.to_string())?;
            handles.push((identity, handle));
        }

        for index in 0..txs {
            tx_feed.publish(Transaction::new(format!("tx-{}", index).into_bytes(), 1));
        }

        println!("Simulating {} miners until layer {}...", miners, layers);
        let started = tokio::time::Instant::now();
        let reached = loop {
            let mut lowest = LayerId::MAX;
            for (_, handle) in &handles {
                lowest = lowest.min(handle.layer_counter().await);
            }
            if lowest >= layers {
                break true;
            }
            if started.elapsed() >= timeout {
                break false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        };

        println!("Simulation summary ({:.1}s):", started.elapsed().as_secs_f64());
        for (identity, handle) in &handles {
            let state = handle.state();
            let state = state.lock().await;
            println!(
                "  miner {}…  layer {}  blocks {}  heads {}",
                &identity.miner_key_hex()[..12],
                state.layer_counter(),
                state.mesh().total_blocks(),
                state.current_heads().len()
            );
        }

        for (_, handle) in handles {
            handle.shutdown();
        }

        if reached {
            println!("✓ All miners reached layer {}", layers);
            Ok(())
        } else {
            Err(format!("Timed out before every miner reached layer {}", layers))
        }
    }

    /// Show or regenerate the miner identity
    fn identity(&self, new: bool) -> Result<(), String> {
        self.ensure_data_dir()?;
        let path = self.identity_path();

        let identity = if new {
            let identity = MinerIdentity::generate();
            identity.save(&path)?;
            identity
        } else {
            MinerIdentity::load_or_generate(&path)?
        };

        println!("Miner identity:");
        println!("  Public key: {}", identity.miner_key_hex());
        println!("  File: {}", path.display());
        Ok(())
    }

    /// Print checkpoint contents
    fn info(&self) -> Result<(), String> {
        let store = MeshDB::new(self.mesh_path())?;
        let blocks = store.load_blocks()?;

        let mut per_layer: BTreeMap<LayerId, usize> = BTreeMap::new();
        for block in &blocks {
            *per_layer.entry(block.layer_id).or_insert(0) += 1;
        }

        println!("Mesh checkpoint:");
        match store.get_tmin()? {
            Some(tmin) => println!("  tmin: {}", tmin),
            None => println!("  tmin: (not recorded)"),
        }
        println!("  Blocks: {}", blocks.len());
        println!("  Layers: {}", per_layer.len());
        for (layer, count) in per_layer {
            println!("    [{}] {} blocks", layer, count);
        }

        Ok(())
    }
}
