//! Per-run snapshot records.

use serde::{Deserialize, Serialize};

/// Immutable record of one run.
///
/// `deposits` and `withdrawals` hold per-period deltas; the cumulative
/// counters they were derived from are kept alongside so the next period
/// can be computed exactly.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Unix timestamp of the run (seconds).
    pub timestamp: u64,
    /// Balance reported by each block after routing.
    pub balances: Vec<u128>,
    /// Deposits credited to each block since the previous snapshot.
    pub deposits: Vec<u128>,
    /// Withdrawals released from each block since the previous snapshot.
    pub withdrawals: Vec<u128>,
    /// Cumulative deposit counters at record time.
    pub running_deposits: Vec<u128>,
    /// Cumulative withdrawal counters at record time.
    pub running_withdrawals: Vec<u128>,
}

impl RunSnapshot {
    /// The zero-valued record stored at index 0.
    pub fn bootstrap(block_count: usize) -> Self {
        Self {
            timestamp: 0,
            balances: vec![0; block_count],
            deposits: vec![0; block_count],
            withdrawals: vec![0; block_count],
            running_deposits: vec![0; block_count],
            running_withdrawals: vec![0; block_count],
        }
    }
}
