//! Processor configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum number of miniblocks allowed in one shard block.
pub const MAX_MINI_BLOCKS_IN_BLOCK: u32 = 100;

/// Budget for the post-commit transaction pool sweep.
pub const MAX_CLEAN_TIME: Duration = Duration::from_secs(1);

/// Configuration for the shard block processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// K: number of construction-valid successor headers required before a
    /// metablock may be consumed.
    pub meta_block_finality: u32,

    /// Combined ceiling of header-side plus body-side items per block.
    pub max_items_in_block: u32,

    /// Ceiling on miniblocks per block.
    pub max_mini_blocks_in_block: u32,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            meta_block_finality: 1,
            max_items_in_block: 15_000,
            max_mini_blocks_in_block: MAX_MINI_BLOCKS_IN_BLOCK,
        }
    }
}

impl ProcessConfig {
    /// Set the finality constant K.
    pub fn with_finality(mut self, k: u32) -> Self {
        self.meta_block_finality = k;
        self
    }

    /// Set the combined item ceiling.
    pub fn with_max_items(mut self, max_items: u32) -> Self {
        self.max_items_in_block = max_items;
        self
    }

    /// Set the miniblock ceiling.
    pub fn with_max_mini_blocks(mut self, max_mini_blocks: u32) -> Self {
        self.max_mini_blocks_in_block = max_mini_blocks;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcessConfig::default();
        assert_eq!(config.meta_block_finality, 1);
        assert_eq!(config.max_mini_blocks_in_block, MAX_MINI_BLOCKS_IN_BLOCK);
    }

    #[test]
    fn test_builder() {
        let config = ProcessConfig::default().with_finality(2).with_max_items(10);
        assert_eq!(config.meta_block_finality, 2);
        assert_eq!(config.max_items_in_block, 10);
    }
}
