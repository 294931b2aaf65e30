//! Observable progress for a running upload or download.
//!
//! A dense, lock-protected table of per-replica counters the engines
//! update as chunks land; callers (the CLI's progress bar, or a future UI)
//! poll a snapshot rather than subscribing to a stream, matching spec.md
//! §6's "poll, don't push" shape for progress reporting.

use std::sync::Mutex;

/// Progress of one block replica transfer: how many of its chunks have
/// completed, out of how many total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaProgress {
    pub block_number: u32,
    pub duplicate_number: u32,
    pub done_chunks: u32,
    pub total_chunks: u32,
}

impl ReplicaProgress {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.done_chunks == self.total_chunks
    }
}

/// Thread-safe table of [`ReplicaProgress`] records, one per block replica
/// in flight. Cheap to clone a snapshot of; cheap to update from many
/// concurrent tasks.
#[derive(Default)]
pub struct ProgressTracker {
    rows: Mutex<Vec<ReplicaProgress>>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(total_chunks_per_replica: impl IntoIterator<Item = (u32, u32, u32)>) -> Self {
        let rows = total_chunks_per_replica
            .into_iter()
            .map(|(block_number, duplicate_number, total_chunks)| ReplicaProgress {
                block_number,
                duplicate_number,
                done_chunks: 0,
                total_chunks,
            })
            .collect();
        Self { rows: Mutex::new(rows) }
    }

    /// Record one more completed chunk for a given replica. Counts bytes
    /// actually received, never `accumulated_len // chunk_size`, so the
    /// final partial chunk is never silently dropped from the tally
    /// (SPEC_FULL §9, Open Question 3).
    pub fn record_chunk(&self, block_number: u32, duplicate_number: u32) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.block_number == block_number && r.duplicate_number == duplicate_number)
        {
            row.done_chunks = (row.done_chunks + 1).min(row.total_chunks);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<ReplicaProgress> {
        self.rows.lock().unwrap().clone()
    }

    /// Overall fraction complete across all tracked replicas, in `[0, 1]`.
    /// Returns `1.0` for an empty tracker (nothing to do is fully done).
    #[must_use]
    pub fn overall_fraction(&self) -> f64 {
        let rows = self.rows.lock().unwrap();
        let total: u64 = rows.iter().map(|r| r.total_chunks as u64).sum();
        if total == 0 {
            return 1.0;
        }
        let done: u64 = rows.iter().map(|r| r.done_chunks as u64).sum();
        done as f64 / total as f64
    }
}
