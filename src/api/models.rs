use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::blockchain::{Block, Blockchain};
use crate::network::{NetworkManager, Peer};

/// Shared application state: the node's chain and its network manager.
/// Handlers only read; mining and sync own all writes.
pub struct AppState {
    pub chain: Arc<Blockchain>,
    pub network: Arc<NetworkManager>,
}

impl AppState {
    pub fn new(network: Arc<NetworkManager>) -> Self {
        Self {
            chain: Arc::clone(network.chain()),
            network,
        }
    }
}

/* ---------- Chain API Models ---------- */

#[derive(Serialize, Deserialize)]
pub struct ChainResponse {
    pub length: usize,
    pub next_difficulty: Option<u32>,
    pub chain: Vec<Block>,
}

#[derive(Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub length: usize,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/* ---------- Stats API Models ---------- */

#[derive(Serialize, Deserialize)]
pub struct StatsResponse {
    pub height: usize,
    pub difficulty: Option<u32>,
    pub next_difficulty: Option<u32>,
    pub target_block_time_secs: i64,
    pub adjust_window: u64,
    pub last_interval_secs: Option<i64>,
    pub avg_interval_secs: Option<i64>,
    pub peers: usize,
    pub broadcasts_seen: usize,
}

/* ---------- Peer API Models ---------- */

#[derive(Serialize, Deserialize)]
pub struct PeersResponse {
    pub me: Peer,
    pub peers: Vec<Peer>,
}
