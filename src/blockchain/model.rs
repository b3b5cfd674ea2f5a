use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info};

use super::error::ChainError;
use super::{Block, RETARGET_FAST_FACTOR, RETARGET_SLOW_FACTOR};

/// In-memory proof-of-work chain shared by the miner and the network layer.
///
/// Every method takes the internal reader/writer lock for the duration of the
/// call only; callers never hold it across I/O.
#[derive(Debug)]
pub struct Blockchain {
    chain: RwLock<Vec<Block>>,
    difficulty_calculation_blocks: u64,
    target_block_time: i64,
}

impl Blockchain {
    /// Create an empty chain. A zero retarget window is a configuration bug.
    pub fn new(difficulty_calculation_blocks: u64, target_block_time: i64) -> Self {
        assert!(
            difficulty_calculation_blocks > 0,
            "difficulty calculation window must be positive"
        );
        Self {
            chain: RwLock::new(Vec::new()),
            difficulty_calculation_blocks,
            target_block_time,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Block>> {
        self.chain.read().expect("chain lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Block>> {
        self.chain.write().expect("chain lock poisoned")
    }

    pub fn difficulty_calculation_blocks(&self) -> u64 {
        self.difficulty_calculation_blocks
    }

    pub fn target_block_time(&self) -> i64 {
        self.target_block_time
    }

    /// Mine the genesis block and append it without verification.
    /// Only valid on an empty chain, before mining or sync start.
    pub fn create_genesis_block(&self) -> Result<Block, ChainError> {
        if !self.read().is_empty() {
            return Err(ChainError::AlreadyInitialized);
        }

        info!("CHAIN - mining genesis block...");
        let mut genesis = Block::genesis();
        genesis.mine();
        self.add_block_without_verification(genesis.clone());

        info!("CHAIN - genesis block created: {}", genesis.hash);
        Ok(genesis)
    }

    /// Check whether `block` may be appended on top of the current head.
    /// `add_block` runs the same check under its write lock.
    #[cfg(test)]
    pub fn can_add_block(&self, block: &Block) -> Result<(), ChainError> {
        let chain = self.read();
        let head = chain.last().ok_or(ChainError::Empty)?;
        check_child(head, block)
    }

    /// Verified append. The chain is left untouched when validation fails.
    pub fn add_block(&self, block: Block) -> Result<(), ChainError> {
        let mut chain = self.write();
        let head = chain.last().ok_or(ChainError::Empty)?;
        check_child(head, &block)?;

        info!(
            "CHAIN - added block #{} (hash={}, difficulty={}, nonce={})",
            block.index, block.hash, block.difficulty, block.nonce
        );
        chain.push(block);
        Ok(())
    }

    /// Append without any checks. Reserved for blocks the caller already
    /// validated as part of a larger unit.
    pub fn add_block_without_verification(&self, block: Block) {
        self.write().push(block);
    }

    /// Validate a downloaded suffix against the current head and append it
    /// as a unit. Either every block is appended or none is.
    pub fn extend_verified(&self, blocks: Vec<Block>) -> Result<usize, ChainError> {
        let mut chain = self.write();
        let mut previous = chain.last().ok_or(ChainError::Empty)?;
        for block in &blocks {
            check_child(previous, block)?;
            previous = block;
        }

        let appended = blocks.len();
        chain.extend(blocks);
        debug!("CHAIN - extended by {appended} block(s), length={}", chain.len());
        Ok(appended)
    }

    /// Swap in `blocks` wholesale. The caller must have validated them.
    pub fn replace_chain(&self, blocks: Vec<Block>) {
        *self.write() = blocks;
    }

    /// Validate `blocks` and adopt them if strictly longer than the local
    /// chain. Returns whether the chain was replaced.
    pub fn replace_if_longer(&self, blocks: Vec<Block>) -> Result<bool, ChainError> {
        validate_blocks(&blocks)?;

        let mut chain = self.write();
        if blocks.len() <= chain.len() {
            return Ok(false);
        }
        info!(
            "CHAIN - replacing chain: {} -> {} block(s)",
            chain.len(),
            blocks.len()
        );
        *chain = blocks;
        Ok(true)
    }

    /// Validate the whole local chain: every block, every link.
    pub fn is_valid(&self) -> Result<(), ChainError> {
        validate_blocks(&self.read())
    }

    pub fn chain_length(&self) -> usize {
        self.read().len()
    }

    pub fn has_block(&self, index: u64) -> bool {
        index < self.read().len() as u64
    }

    pub fn get_block(&self, index: u64) -> Result<Block, ChainError> {
        let chain = self.read();
        usize::try_from(index)
            .ok()
            .and_then(|i| chain.get(i))
            .cloned()
            .ok_or(ChainError::IndexOutOfRange {
                index,
                length: chain.len(),
            })
    }

    pub fn get_latest_block(&self) -> Result<Block, ChainError> {
        self.read().last().cloned().ok_or(ChainError::Empty)
    }

    /// Blocks `start..=end`. Out-of-range requests fail; nothing is clamped.
    pub fn get_blocks(&self, start: u64, end: u64) -> Result<Vec<Block>, ChainError> {
        let chain = self.read();
        if start > end || end >= chain.len() as u64 {
            return Err(ChainError::InvalidRange { start, stop: end });
        }
        Ok(chain[start as usize..=end as usize].to_vec())
    }

    /// Copy of every block, genesis first.
    pub fn blocks(&self) -> Vec<Block> {
        self.read().clone()
    }

    /// Mean of consecutive timestamp deltas over `(start, stop]`, truncated.
    pub fn calculate_average_mining_time(&self, start: u64, stop: u64) -> Result<i64, ChainError> {
        average_mining_time(&self.read(), start, stop)
    }

    /// True when the head closes a retarget window.
    pub fn should_recalculate_difficulty(&self) -> bool {
        match self.read().last() {
            Some(head) => head.index > 0 && head.index % self.difficulty_calculation_blocks == 0,
            None => false,
        }
    }

    /// Difficulty for the block after the head, moved at most one step from
    /// the head's own difficulty.
    pub fn calculate_new_difficulty(&self) -> Result<u32, ChainError> {
        let chain = self.read();
        let head = chain.last().ok_or(ChainError::Empty)?;

        let start = head.index.saturating_sub(self.difficulty_calculation_blocks);
        let average = average_mining_time(&chain, start, head.index)?;

        let target = self.target_block_time as f64;
        let slow = (target * RETARGET_SLOW_FACTOR) as i64;
        let fast = (target * RETARGET_FAST_FACTOR) as i64;

        let mut difficulty = head.difficulty;
        if average > slow {
            difficulty = difficulty.saturating_sub(1);
        } else if average < fast {
            difficulty += 1;
        }

        debug!(
            "CHAIN - retarget at #{}: avg={}s target={}s difficulty {} -> {}",
            head.index, average, self.target_block_time, head.difficulty, difficulty
        );
        Ok(difficulty)
    }
}

/// Validate a full chain: genesis at index 0, each block valid, each block
/// acceptable as the child of its predecessor.
///
/// This is the single policy used for the local chain, for chains
/// downloaded from peers, and (through `check_child`) for new blocks.
pub fn validate_blocks(blocks: &[Block]) -> Result<(), ChainError> {
    let genesis = blocks.first().ok_or(ChainError::Empty)?;
    if genesis.index != 0 {
        return Err(ChainError::NonSequentialIndex {
            expected: 0,
            found: genesis.index,
        });
    }
    genesis.is_valid().map_err(|source| ChainError::InvalidBlock {
        index: genesis.index,
        source,
    })?;

    for pair in blocks.windows(2) {
        check_child(&pair[0], &pair[1])?;
    }
    Ok(())
}

/// Check that `block` may directly follow `parent`: difficulty continuity,
/// next index, hash linkage and the block's own validity.
pub fn check_child(parent: &Block, block: &Block) -> Result<(), ChainError> {
    if block.difficulty != parent.next_block_difficulty {
        return Err(ChainError::DifficultyMismatch {
            expected: parent.next_block_difficulty,
            found: block.difficulty,
        });
    }

    if block.index != parent.index + 1 {
        return Err(ChainError::NonSequentialIndex {
            expected: parent.index + 1,
            found: block.index,
        });
    }

    if block.previous_hash != parent.hash {
        return Err(ChainError::PreviousHashMismatch { index: block.index });
    }

    block.is_valid().map_err(|source| ChainError::InvalidBlock {
        index: block.index,
        source,
    })
}

fn average_mining_time(chain: &[Block], start: u64, stop: u64) -> Result<i64, ChainError> {
    if stop >= chain.len() as u64 || start >= stop {
        return Err(ChainError::InvalidRange { start, stop });
    }

    let (start, stop) = (start as usize, stop as usize);
    let total: i64 = chain[start..=stop]
        .windows(2)
        .map(|pair| pair[1].timestamp - pair[0].timestamp)
        .sum();

    // Integer division: truncation is part of the retarget rule.
    Ok(total / (stop - start) as i64)
}

#[cfg(test)]
mod tests {
    use super::{Blockchain, validate_blocks};
    use crate::blockchain::testing::{mine_child, mined_chain};
    use crate::blockchain::{Block, ChainError, GENESIS_DIFFICULTY};

    /// Unmined block with a fixed timestamp, for retarget arithmetic.
    fn timed_block(index: u64, timestamp: i64, difficulty: u32) -> Block {
        let mut b = Block::new(index, difficulty, difficulty, "t", "");
        b.timestamp = timestamp;
        b
    }

    /// Chain of `deltas.len() + 1` unverified blocks spaced by `deltas`.
    fn timed_chain(window: u64, target: i64, difficulty: u32, deltas: &[i64]) -> Blockchain {
        let chain = Blockchain::new(window, target);
        let mut ts = 1_000;
        chain.add_block_without_verification(timed_block(0, ts, difficulty));
        for (i, d) in deltas.iter().enumerate() {
            ts += d;
            chain.add_block_without_verification(timed_block(i as u64 + 1, ts, difficulty));
        }
        chain
    }

    #[test]
    fn genesis_is_mined_and_valid() {
        let chain = Blockchain::new(5, 10);
        let genesis = chain.create_genesis_block().unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.difficulty, GENESIS_DIFFICULTY);
        assert_eq!(genesis.next_block_difficulty, GENESIS_DIFFICULTY);
        assert_eq!(chain.chain_length(), 1);
        assert!(chain.is_valid().is_ok());
    }

    #[test]
    fn genesis_only_once() {
        let chain = Blockchain::new(5, 10);
        chain.create_genesis_block().unwrap();
        assert!(matches!(
            chain.create_genesis_block(),
            Err(ChainError::AlreadyInitialized)
        ));
        assert_eq!(chain.chain_length(), 1);
    }

    #[test]
    fn empty_chain_reports_not_ready() {
        let chain = Blockchain::new(5, 10);
        assert!(matches!(chain.get_latest_block(), Err(ChainError::Empty)));
        assert!(matches!(chain.is_valid(), Err(ChainError::Empty)));
        assert!(!chain.should_recalculate_difficulty());
        let block = Block::new(1, 2, 2, "x", "y");
        assert!(matches!(chain.can_add_block(&block), Err(ChainError::Empty)));
    }

    #[test]
    fn mined_chain_is_valid() {
        let chain = mined_chain(3);
        assert_eq!(chain.chain_length(), 4);
        assert!(chain.is_valid().is_ok());
        assert_eq!(chain.get_latest_block().unwrap().index, 3);
    }

    #[test]
    fn tampered_interior_link_invalidates_chain() {
        let chain = mined_chain(3);
        let mut blocks = chain.blocks();
        blocks[2].previous_hash = "not-a-hash".into();
        assert!(validate_blocks(&blocks).is_err());

        chain.replace_chain(blocks);
        assert!(chain.is_valid().is_err());
    }

    #[test]
    fn rejects_index_skip_with_valid_hash() {
        let chain = mined_chain(5);
        let head = chain.get_latest_block().unwrap();
        let mut skipping = Block::new(
            head.index + 2,
            head.next_block_difficulty,
            head.next_block_difficulty,
            "skip",
            head.hash,
        );
        skipping.mine();
        assert!(skipping.is_valid().is_ok());

        assert!(matches!(
            chain.can_add_block(&skipping),
            Err(ChainError::NonSequentialIndex {
                expected: 6,
                found: 7
            })
        ));
    }

    #[test]
    fn rejects_difficulty_mismatch_with_valid_hash() {
        let chain = mined_chain(1);
        let head = chain.get_latest_block().unwrap();
        let mut easier = Block::new(head.index + 1, 1, 1, "easy", head.hash);
        easier.mine();
        assert!(easier.is_valid().is_ok());

        assert!(matches!(
            chain.can_add_block(&easier),
            Err(ChainError::DifficultyMismatch { .. })
        ));
    }

    #[test]
    fn failed_add_leaves_chain_untouched() {
        let chain = mined_chain(1);
        let mut block = mine_child(&chain, "child");
        block.previous_hash = "wrong".into();
        block.mine();

        assert!(matches!(
            chain.add_block(block),
            Err(ChainError::PreviousHashMismatch { index: 2 })
        ));
        assert_eq!(chain.chain_length(), 2);
    }

    #[test]
    fn extend_verified_is_all_or_nothing() {
        let source = mined_chain(3);
        let local = Blockchain::new(5, 10);
        local.replace_chain(source.get_blocks(0, 1).unwrap());

        let mut suffix = source.get_blocks(2, 3).unwrap();
        suffix[1].data = "forged".into();
        assert!(local.extend_verified(suffix).is_err());
        assert_eq!(local.chain_length(), 2);

        let suffix = source.get_blocks(2, 3).unwrap();
        assert_eq!(local.extend_verified(suffix).unwrap(), 2);
        assert_eq!(local.chain_length(), 4);
        assert!(local.is_valid().is_ok());
    }

    #[test]
    fn replace_if_longer_only_accepts_longer_valid_chains() {
        let longer = mined_chain(2).blocks();
        let local = mined_chain(0);

        assert!(!local.replace_if_longer(local.blocks()).unwrap());

        let mut broken = longer.clone();
        broken[1].nonce += 1;
        assert!(local.replace_if_longer(broken).is_err());
        assert_eq!(local.chain_length(), 1);

        assert!(local.replace_if_longer(longer).unwrap());
        assert_eq!(local.chain_length(), 3);
    }

    #[test]
    fn range_reads_fail_instead_of_clamping() {
        let chain = mined_chain(2);
        assert_eq!(chain.get_blocks(0, 2).unwrap().len(), 3);
        assert_eq!(chain.get_blocks(1, 1).unwrap().len(), 1);
        assert!(matches!(
            chain.get_blocks(2, 1),
            Err(ChainError::InvalidRange { .. })
        ));
        assert!(matches!(
            chain.get_blocks(0, 3),
            Err(ChainError::InvalidRange { .. })
        ));
        assert!(matches!(
            chain.get_block(3),
            Err(ChainError::IndexOutOfRange { index: 3, length: 3 })
        ));
        assert!(chain.has_block(2));
        assert!(!chain.has_block(3));
    }

    #[test]
    fn average_mining_time_truncates() {
        let chain = timed_chain(5, 10, 1, &[3, 4]);
        assert_eq!(chain.calculate_average_mining_time(0, 2).unwrap(), 3);
        assert_eq!(chain.calculate_average_mining_time(1, 2).unwrap(), 4);
    }

    #[test]
    fn average_mining_time_rejects_bad_ranges() {
        let chain = timed_chain(5, 10, 1, &[3, 4]);
        for (start, stop) in [(2, 2), (2, 1), (0, 3)] {
            assert!(matches!(
                chain.calculate_average_mining_time(start, stop),
                Err(ChainError::InvalidRange { .. })
            ));
        }
    }

    #[test]
    fn recalculation_happens_on_window_boundaries() {
        assert!(!timed_chain(5, 10, 1, &[]).should_recalculate_difficulty());
        assert!(!timed_chain(5, 10, 1, &[1; 4]).should_recalculate_difficulty());
        assert!(timed_chain(5, 10, 1, &[1; 5]).should_recalculate_difficulty());
        assert!(!timed_chain(5, 10, 1, &[1; 6]).should_recalculate_difficulty());
        assert!(timed_chain(5, 10, 1, &[1; 10]).should_recalculate_difficulty());
    }

    #[test]
    fn slow_blocks_lower_difficulty() {
        let chain = timed_chain(5, 10, 3, &[13; 5]);
        assert_eq!(chain.calculate_new_difficulty().unwrap(), 2);
    }

    #[test]
    fn fast_blocks_raise_difficulty() {
        let chain = timed_chain(5, 10, 3, &[6; 5]);
        assert_eq!(chain.calculate_new_difficulty().unwrap(), 4);
    }

    #[test]
    fn on_target_blocks_keep_difficulty() {
        // 12 is not above trunc(12.5); 7 is not below trunc(7.5).
        assert_eq!(timed_chain(5, 10, 3, &[12; 5]).calculate_new_difficulty().unwrap(), 3);
        assert_eq!(timed_chain(5, 10, 3, &[7; 5]).calculate_new_difficulty().unwrap(), 3);
    }

    #[test]
    fn difficulty_never_goes_negative() {
        let chain = timed_chain(5, 10, 0, &[100; 5]);
        assert_eq!(chain.calculate_new_difficulty().unwrap(), 0);
    }

    #[test]
    fn retarget_moves_at_most_one_step() {
        for difficulty in 0..4u32 {
            for delta in 0..40i64 {
                let chain = timed_chain(5, 10, difficulty, &[delta; 5]);
                let next = chain.calculate_new_difficulty().unwrap();
                assert!(next.abs_diff(difficulty) <= 1, "d={difficulty} delta={delta}");
            }
        }
    }

    #[test]
    fn retarget_window_is_clamped_at_genesis() {
        // Head #3 with window 5 averages over (0, 3].
        let chain = timed_chain(5, 10, 2, &[1, 1, 1]);
        assert_eq!(chain.calculate_new_difficulty().unwrap(), 3);
    }
}
