use thiserror::Error;

/// Why a single block failed validation.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block size {size} exceeds limit of {limit} bytes")]
    SizeExceeded { size: usize, limit: usize },

    #[error("block hash mismatch: calculated {calculated}, stored {stored}")]
    HashMismatch { calculated: String, stored: String },

    #[error("block hash does not meet difficulty {difficulty}")]
    DifficultyUnmet { difficulty: u32 },

    #[error("block encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Errors returned by chain reads, appends and whole-chain validation.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("blockchain is empty")]
    Empty,

    #[error("blockchain already has a genesis block")]
    AlreadyInitialized,

    #[error("block difficulty {found} does not match expected {expected}")]
    DifficultyMismatch { expected: u32, found: u32 },

    #[error("block index {found} is not sequential (expected {expected})")]
    NonSequentialIndex { expected: u64, found: u64 },

    #[error("block #{index} previous hash does not match its predecessor")]
    PreviousHashMismatch { index: u64 },

    #[error("block #{index} is invalid: {source}")]
    InvalidBlock {
        index: u64,
        #[source]
        source: BlockError,
    },

    #[error("block index {index} out of range (chain length {length})")]
    IndexOutOfRange { index: u64, length: usize },

    #[error("invalid block range: {start} to {stop}")]
    InvalidRange { start: u64, stop: u64 },
}
