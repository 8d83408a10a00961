//! Append-only per-run history.

use sluice_types::snapshot::RunSnapshot;

/// Sequence of run snapshots. Index 0 is always the zero bootstrap record.
#[derive(Clone, Debug)]
pub struct SnapshotLog {
    entries: Vec<RunSnapshot>,
}

impl SnapshotLog {
    /// Create a log holding only the bootstrap record.
    pub fn new(block_count: usize) -> Self {
        Self {
            entries: vec![RunSnapshot::bootstrap(block_count)],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: the bootstrap record is never removed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RunSnapshot> {
        self.entries.get(index)
    }

    /// Most recent record.
    pub fn latest(&self) -> Option<&RunSnapshot> {
        self.entries.last()
    }

    /// The last `limit` records, oldest first.
    pub fn last(&self, limit: usize) -> &[RunSnapshot] {
        let start = self.entries.len().saturating_sub(limit);
        &self.entries[start..]
    }

    /// Append a record for a run and return its index.
    ///
    /// Period deltas are the growth of the cumulative counters since the
    /// previous record.
    pub fn record(
        &mut self,
        timestamp: u64,
        balances: Vec<u128>,
        running_deposits: &[u128],
        running_withdrawals: &[u128],
    ) -> usize {
        let (deposits, withdrawals) = match self.entries.last() {
            Some(prev) => (
                deltas(running_deposits, &prev.running_deposits),
                deltas(running_withdrawals, &prev.running_withdrawals),
            ),
            None => (running_deposits.to_vec(), running_withdrawals.to_vec()),
        };

        self.entries.push(RunSnapshot {
            timestamp,
            balances,
            deposits,
            withdrawals,
            running_deposits: running_deposits.to_vec(),
            running_withdrawals: running_withdrawals.to_vec(),
        });

        let index = self.entries.len() - 1;
        tracing::debug!(index, timestamp, "snapshot recorded");
        index
    }
}

fn deltas(current: &[u128], previous: &[u128]) -> Vec<u128> {
    current
        .iter()
        .enumerate()
        .map(|(i, now)| now.saturating_sub(previous.get(i).copied().unwrap_or(0)))
        .collect()
}
