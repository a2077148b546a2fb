//! Shard block processor.
//!
//! This crate implements the per-shard state machine that validates,
//! assembles, and commits blocks in a sharded chain whose metachain
//! notarizes shard activity and coordinates cross-shard traffic:
//!
//! - [`ShardProcessor::process_block`]: validate an incoming block against
//!   its body and its metachain dependencies
//! - [`ShardProcessor::create_block_body`] / `create_block_header`:
//!   assemble a block under combined transaction, miniblock, and time
//!   budgets
//! - [`ShardProcessor::commit_block`]: persist a validated block, advance
//!   the notarized metachain pointer, and prune the pools
//! - [`ShardProcessor::restore_block_into_pools`]: the inverse of commit,
//!   run on chain rollback
//!
//! # Architecture
//!
//! The processor is entered by one driver thread per cycle. Helper work
//! runs in parallel: the metablock pool notifies `received_meta_block` as
//! headers arrive, network requests are fired on detached threads, and
//! post-commit housekeeping never blocks the driver. Every collaborator
//! that is not owned by the processor (accounts, store, pools,
//! transaction coordinator, fork detector, request handler) is a
//! capability trait defined in [`traits`].
//!
//! Per cycle the driver moves through
//! `Reset → Requesting → Waiting → Validating → Applied | Reverted`:
//! waiting happens only in `wait_for_meta_headers` (completion signal or
//! deadline, whichever first), and a scoped guard reverts the account
//! state if the cycle fails after it first touched state.

mod config;
mod error;
mod keys;
mod notarized;
mod processed;
mod processor;
mod throttle;
mod tracking;
mod tx_counter;

pub mod metrics;
pub mod traits;

pub use config::{ProcessConfig, MAX_CLEAN_TIME, MAX_MINI_BLOCKS_IN_BLOCK};
pub use error::ProcessError;
pub use notarized::NotarizedHeaders;
pub use processed::ProcessedMiniBlocks;
pub use processor::{decode_block_body, decode_block_header, ShardProcessor, ShardProcessorArgs};
pub use throttle::BlockSizeThrottle;
pub use tracking::{CompletionSignal, HeaderTracker};
pub use tx_counter::TransactionCounter;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;
