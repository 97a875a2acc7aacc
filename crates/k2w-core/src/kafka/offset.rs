//! Offset watermarking over out-of-order message completion.
//!
//! Messages are processed concurrently and finish in arbitrary order, but a
//! Kafka commit at offset N acknowledges everything at or below N. This
//! tracker only exposes a partition's watermark once every observed offset
//! at or below it has completed, so a commit never acknowledges work that is
//! still in flight.

use dashmap::DashMap;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
struct PartitionProgress {
    /// Received but not yet completed
    outstanding: BTreeSet<i64>,
    /// Completed but blocked by an earlier outstanding offset
    completed: BTreeSet<i64>,
    /// Highest offset safe to commit
    committable: Option<i64>,
    /// Last offset actually committed to the broker
    committed: Option<i64>,
}

impl PartitionProgress {
    fn advance(&mut self) {
        let bound = self.outstanding.first().copied();
        let unblocked: Vec<i64> = match bound {
            Some(b) => self.completed.range(..b).copied().collect(),
            None => self.completed.iter().copied().collect(),
        };

        if let Some(max) = unblocked.last().copied() {
            for offset in unblocked {
                self.completed.remove(&offset);
            }
            self.committable = Some(self.committable.map_or(max, |c| c.max(max)));
        }
    }
}

/// Tracks per-partition completion watermarks.
pub struct CompletedOffsets {
    partitions: DashMap<(String, i32), PartitionProgress>,
}

impl CompletedOffsets {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
        }
    }

    /// Record that a message at this offset was received and is in flight.
    pub fn observe(&self, topic: &str, partition: i32, offset: i64) {
        let mut progress = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();
        progress.outstanding.insert(offset);
    }

    /// Record that processing for this offset finished (successfully or
    /// terminally) and the offset may be acknowledged.
    pub fn complete(&self, topic: &str, partition: i32, offset: i64) {
        let mut progress = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();
        progress.outstanding.remove(&offset);
        progress.completed.insert(offset);
        progress.advance();
    }

    /// Watermarks that advanced since the last commit, as
    /// `(topic, partition, offset)` triples.
    pub fn pending_commits(&self) -> Vec<(String, i32, i64)> {
        self.partitions
            .iter()
            .filter_map(|entry| {
                let (topic, partition) = entry.key().clone();
                let progress = entry.value();
                match progress.committable {
                    Some(offset) if progress.committed != Some(offset) => {
                        Some((topic, partition, offset))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    /// Record that a watermark was committed to the broker.
    pub fn mark_committed(&self, topic: &str, partition: i32, offset: i64) {
        if let Some(mut progress) = self.partitions.get_mut(&(topic.to_string(), partition)) {
            progress.committed = Some(offset);
        }
    }

    /// Messages currently in flight across all partitions.
    pub fn outstanding(&self) -> usize {
        self.partitions
            .iter()
            .map(|entry| entry.value().outstanding.len())
            .sum()
    }
}

impl Default for CompletedOffsets {
    fn default() -> Self {
        Self::new()
    }
}
