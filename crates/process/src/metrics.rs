//! Status metric keys and handlers.
//!
//! Numeric metrics are exported through the native Prometheus client;
//! string-valued metrics (hashes, cross-chain checkpoints) are kept in a
//! local table since Prometheus has no string gauge.

use crate::traits::AppStatusHandler;
use parking_lot::RwLock;
use prometheus::{register_int_gauge_vec, IntGaugeVec};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Transactions in the current block.
pub const METRIC_NUM_TXS_IN_BLOCK: &str = "tessera_num_txs_in_block";
/// Miniblocks in the current block.
pub const METRIC_NUM_MINI_BLOCKS: &str = "tessera_num_mini_blocks";
/// Hash of the current chain head.
pub const METRIC_CURRENT_BLOCK_HASH: &str = "tessera_current_block_hash";
/// Highest final block nonce in this shard.
pub const METRIC_HIGHEST_FINAL_BLOCK_IN_SHARD: &str = "tessera_highest_final_block_in_shard";
/// Cross-chain checkpoint: latest notarized metachain nonce.
pub const METRIC_CROSS_CHECK_BLOCK_HEIGHT: &str = "tessera_cross_check_block_height";

/// Status handler that discards everything.
///
/// The processor's default until a real handler is wired in.
#[derive(Default)]
pub struct NilStatusHandler;

impl AppStatusHandler for NilStatusHandler {
    fn set_u64(&self, _metric: &str, _value: u64) {}
    fn set_string(&self, _metric: &str, _value: &str) {}
}

static STATUS_GAUGES: OnceLock<IntGaugeVec> = OnceLock::new();

fn status_gauges() -> &'static IntGaugeVec {
    STATUS_GAUGES.get_or_init(|| {
        register_int_gauge_vec!(
            "tessera_status_metric",
            "Named status metrics written by the block processor",
            &["metric"]
        )
        .expect("metric registration only runs once")
    })
}

/// Prometheus-backed status handler.
#[derive(Default)]
pub struct PrometheusStatusHandler {
    strings: RwLock<HashMap<String, String>>,
}

impl PrometheusStatusHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last written value of a string metric.
    pub fn string_value(&self, metric: &str) -> Option<String> {
        self.strings.read().get(metric).cloned()
    }
}

impl AppStatusHandler for PrometheusStatusHandler {
    fn set_u64(&self, metric: &str, value: u64) {
        status_gauges()
            .with_label_values(&[metric])
            .set(value as i64);
    }

    fn set_string(&self, metric: &str, value: &str) {
        self.strings
            .write()
            .insert(metric.to_string(), value.to_string());
    }
}
