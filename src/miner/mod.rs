use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::runtime::Handle;

use crate::blockchain::{Block, Blockchain, ChainError};
use crate::network::NetworkManager;

/// Miner tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerConfig {
    /// How long one candidate is searched before re-reading the chain head.
    pub network_sync_interval: Duration,
    /// Exclusive upper bound for random nonces.
    pub max_nonce: u64,
    /// Payload put into every mined block.
    pub block_data: String,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            network_sync_interval: Duration::from_secs(1),
            max_nonce: crate::blockchain::NONCE_SPACE,
            block_data: "data".into(),
        }
    }
}

/// Result of searching one candidate block.
#[derive(Debug)]
pub enum MiningOutcome {
    /// The block meets its difficulty.
    Sealed(Block),
    /// The sync interval elapsed (or a stop was requested) first; the
    /// candidate is discarded.
    Interrupted { attempts: u64, elapsed: Duration },
}

/// Proof-of-work loop on top of the shared chain.
#[derive(Debug)]
pub struct Miner {
    chain: Arc<Blockchain>,
    network: Arc<NetworkManager>,
    config: MinerConfig,
    runtime: Handle,
    stop: Arc<AtomicBool>,
}

impl Miner {
    /// `runtime` is where FOUNDBLOCK broadcasts are spawned.
    pub fn new(network: Arc<NetworkManager>, config: MinerConfig, runtime: Handle) -> Self {
        Self {
            chain: Arc::clone(network.chain()),
            network,
            config,
            runtime,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that ends the loop at the next nonce attempt once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run the loop on a dedicated OS thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("miner".into())
            .spawn(move || self.run())
    }

    /// Mine until stopped: build on the head, search, submit or restart.
    pub fn run(&self) {
        let _runtime = self.runtime.enter();
        info!("MINER - starting");

        while !self.stopped() {
            let candidate = match self.next_candidate() {
                Ok(candidate) => candidate,
                Err(err) => {
                    debug!("MINER - chain not ready: {err}");
                    thread::sleep(self.config.network_sync_interval);
                    continue;
                }
            };

            match self.search(candidate) {
                MiningOutcome::Sealed(block) => self.submit(block),
                MiningOutcome::Interrupted { attempts, elapsed } => {
                    let secs = elapsed.as_secs_f64();
                    if secs > 0.0 {
                        debug!("MINER - hash rate {:.2} H/s", attempts as f64 / secs);
                    }
                }
            }
        }

        info!("MINER - stopped");
    }

    /// Unmined block on top of the current head, with the retargeted
    /// difficulty for its successor.
    pub fn next_candidate(&self) -> Result<Block, ChainError> {
        let head = self.chain.get_latest_block()?;

        let mut next_difficulty = head.next_block_difficulty;
        if self.chain.should_recalculate_difficulty() {
            next_difficulty = self.chain.calculate_new_difficulty()?;
            info!(
                "MINER - retarget at #{}: next difficulty {}",
                head.index, next_difficulty
            );
        }

        Ok(Block::new(
            head.index + 1,
            head.next_block_difficulty,
            next_difficulty,
            self.config.block_data.clone(),
            head.hash,
        ))
    }

    /// Try nonces until the block is valid or the sync interval elapses.
    /// Time and the stop flag are checked before every attempt.
    pub fn search(&self, mut block: Block) -> MiningOutcome {
        let mut rng = rand::thread_rng();
        let started = Instant::now();
        let mut attempts = 0u64;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= self.config.network_sync_interval || self.stopped() {
                return MiningOutcome::Interrupted { attempts, elapsed };
            }

            attempts += 1;
            if block.try_nonce(&mut rng, self.config.max_nonce) {
                return MiningOutcome::Sealed(block);
            }
        }
    }

    /// Append a sealed block and announce it. A block made stale by a
    /// concurrent sync is rejected by the chain and dropped.
    fn submit(&self, block: Block) {
        let index = block.index;
        let hash = block.hash.clone();
        match self.chain.add_block(block) {
            Ok(()) => {
                info!("MINER - sealed block #{index} (hash={hash})");
                self.network.announce_block(index);
            }
            Err(err) => warn!("MINER - discarded block #{index}: {err}"),
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}
