pub mod block;
pub mod error;
pub mod model;

pub use block::Block;
pub use error::{BlockError, ChainError};
pub use model::{Blockchain, check_child, validate_blocks};

/// Difficulty of the genesis block and of the block that follows it.
pub const GENESIS_DIFFICULTY: u32 = 2;

/// Payload of the genesis block.
pub const GENESIS_DATA: &str = "Genesis Block";

/// Upper bound on a block's JSON encoding (2 MiB).
pub const MAX_BLOCK_BYTES: usize = 2_097_152;

/// Nonces are drawn uniformly from `[0, NONCE_SPACE)`.
pub const NONCE_SPACE: u64 = 1 << 32;

/// Blocks per retarget window.
pub const DEFAULT_DIFFICULTY_CALCULATION_BLOCKS: u64 = 50;

/// Target seconds per block for auto-adjust
pub const DEFAULT_TARGET_BLOCK_TIME_SECS: i64 = 20;

/// Average above `target * RETARGET_SLOW_FACTOR` lowers difficulty.
pub const RETARGET_SLOW_FACTOR: f64 = 1.25;

/// Average below `target * RETARGET_FAST_FACTOR` raises difficulty.
pub const RETARGET_FAST_FACTOR: f64 = 0.75;

#[cfg(test)]
pub(crate) mod testing {
    use super::{Block, Blockchain};

    /// Mine a block that `chain.add_block` will accept on top of the current head.
    pub(crate) fn mine_child(chain: &Blockchain, data: &str) -> Block {
        let head = chain.get_latest_block().expect("chain has a head");
        let mut block = Block::new(
            head.index + 1,
            head.next_block_difficulty,
            head.next_block_difficulty,
            data,
            head.hash,
        );
        block.mine();
        block
    }

    /// A genesis chain extended by `extra` mined blocks.
    pub(crate) fn mined_chain(extra: usize) -> Blockchain {
        let chain = Blockchain::new(5, 10);
        chain.create_genesis_block().expect("fresh chain");
        for i in 0..extra {
            let block = mine_child(&chain, &format!("block {i}"));
            chain.add_block(block).expect("mined child is valid");
        }
        chain
    }
}
