use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use super::error::BlockError;
use super::{GENESIS_DATA, GENESIS_DIFFICULTY, MAX_BLOCK_BYTES, NONCE_SPACE};

/// A single block: an opaque payload sealed by proof-of-work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: i64, // Unix timestamp (UTC), refreshed on every mining attempt
    pub difficulty: u32,
    pub next_block_difficulty: u32,
    pub data: String,
    pub hash: String,
    pub previous_hash: String,
    pub nonce: u64,
}

impl Block {
    /// Create an unmined block. `hash` stays empty until a mining attempt.
    pub fn new(
        index: u64,
        difficulty: u32,
        next_block_difficulty: u32,
        data: impl Into<String>,
        previous_hash: impl Into<String>,
    ) -> Self {
        Self {
            index,
            timestamp: Utc::now().timestamp(),
            difficulty,
            next_block_difficulty,
            data: data.into(),
            hash: String::new(),
            previous_hash: previous_hash.into(),
            nonce: 0,
        }
    }

    /// Unmined genesis template (index 0, no predecessor).
    pub fn genesis() -> Self {
        Self::new(0, GENESIS_DIFFICULTY, GENESIS_DIFFICULTY, GENESIS_DATA, "")
    }

    /// SHA-512 over the block fields (excluding `hash`), base64-url encoded.
    pub fn compute_hash(&self) -> String {
        let preimage = format!(
            "{}{}{}{}{}{}{}",
            self.index,
            self.nonce,
            self.previous_hash,
            self.difficulty,
            self.next_block_difficulty,
            self.timestamp,
            self.data
        );
        let mut hasher = Sha512::new();
        hasher.update(preimage.as_bytes());
        URL_SAFE.encode(hasher.finalize())
    }

    /// Whether `hash` satisfies this block's difficulty. Difficulty 0 accepts anything.
    pub fn is_hash_valid(&self, hash: &str) -> bool {
        if self.difficulty == 0 {
            return true;
        }
        let difficulty = self.difficulty as usize;
        hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
    }

    /// One proof-of-work attempt: fresh timestamp, random nonce below
    /// `max_nonce`, recomputed hash. Returns whether the hash is now valid.
    pub fn try_nonce<R: Rng>(&mut self, rng: &mut R, max_nonce: u64) -> bool {
        self.timestamp = Utc::now().timestamp();
        self.nonce = rng.gen_range(0..max_nonce.max(1));
        self.hash = self.compute_hash();
        self.is_hash_valid(&self.hash)
    }

    /// Mine until the hash meets the difficulty. No attempt limit and no
    /// early exit; the miner loop uses `try_nonce` instead.
    pub fn mine(&mut self) {
        let mut rng = rand::thread_rng();
        while !self.try_nonce(&mut rng, NONCE_SPACE) {}
    }

    /// Size of the JSON encoding in bytes.
    pub fn serialized_size(&self) -> Result<usize, BlockError> {
        Ok(self.to_json()?.len())
    }

    /// Validate size, hash integrity and proof-of-work.
    /// (Does NOT validate linkage to a predecessor.)
    pub fn is_valid(&self) -> Result<(), BlockError> {
        // Oversized blocks are rejected before hashing anything.
        let size = self.serialized_size()?;
        if size > MAX_BLOCK_BYTES {
            return Err(BlockError::SizeExceeded {
                size,
                limit: MAX_BLOCK_BYTES,
            });
        }

        let calculated = self.compute_hash();
        if calculated != self.hash {
            return Err(BlockError::HashMismatch {
                calculated,
                stored: self.hash.clone(),
            });
        }

        if !self.is_hash_valid(&self.hash) {
            return Err(BlockError::DifficultyUnmet {
                difficulty: self.difficulty,
            });
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>, BlockError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, BlockError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Block #{} (hash={}, nonce={})", self.index, self.hash, self.nonce)
    }
}
