//! Block-size policy, storage assignment, cipher assignment, and replica
//! naming. The balancer is stateless across files (spec.md §4.3) — each
//! call receives the current storages/ciphers and returns a plan, holding
//! no state of its own between invocations.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use thiserror::Error;
use uuid::Uuid;

use crate::cipher::Cipher;
use crate::storage::StorageHandle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BalancerError {
    /// Fewer storages exist than are needed for one block's replicas —
    /// never place two replicas of the same block on the same storage.
    #[error("not enough distinct storages: need {needed}, have {available}")]
    NoStorage { needed: u32, available: u32 },

    /// Encryption was requested but no ciphers/keys are configured.
    #[error("encryption requested but no cipher is available")]
    NoCipher,
}

/// Chosen placement for one block replica: which storage, which cipher (if
/// any), and the fresh opaque name to store it under.
pub struct ReplicaPlan {
    pub storage_id: i64,
    pub storage: Arc<dyn crate::storage::Storage>,
    pub cipher: Option<Arc<dyn Cipher>>,
    pub name: String,
}

/// Heap-backed storage pool the balancer draws assignments from. Load
/// values are refreshed by the caller (typically via
/// `Catalog::refresh_capacity`) before a batch of assignments; the spec
/// permits staleness between refreshes (spec.md §9, last Design Note).
pub struct Balancer {
    heap: BinaryHeap<Reverse<OrderedHandle>>,
}

/// Wraps [`StorageHandle`] so the max-heap `BinaryHeap` acts as a min-heap
/// on load ratio, per spec.md §4.1's "ordered... by a load metric".
struct OrderedHandle(StorageHandle);

impl PartialEq for OrderedHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq(&other.0)
    }
}
impl Eq for OrderedHandle {}
impl PartialOrd for OrderedHandle {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedHandle {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Balancer {
    #[must_use]
    pub fn new(storages: Vec<StorageHandle>) -> Self {
        Self {
            heap: storages.into_iter().map(|h| Reverse(OrderedHandle(h))).collect(),
        }
    }

    #[must_use]
    pub fn storage_count(&self) -> usize {
        self.heap.len()
    }

    /// Compute the block size and total block count for a file of size
    /// `file_size`, per spec.md §4.3's block-size policy:
    ///
    /// - explicit `requested` size wins outright;
    /// - else `file_size < min_bs` → `min_bs`;
    /// - else `file_size < (min_bs + max_bs) / 2` → `file_size` itself (one
    ///   block holding the whole file);
    /// - else `file_size < max_bs` → `ceil(file_size / 2)`;
    /// - else → `max_bs`.
    #[must_use]
    pub fn choose_block_size(
        requested: Option<u64>,
        file_size: u64,
        min_bs: u64,
        max_bs: u64,
    ) -> u64 {
        if let Some(bs) = requested {
            return bs.max(1);
        }
        if file_size < min_bs {
            min_bs
        } else if file_size < (min_bs + max_bs) / 2 {
            file_size.max(1)
        } else if file_size < max_bs {
            div_ceil_u64(file_size, 2)
        } else {
            max_bs
        }
    }

    /// Total block count for a file, given the chosen block size.
    #[must_use]
    pub fn total_blocks(file_size: u64, block_size: u64) -> u32 {
        if file_size == 0 {
            // Boundary behavior per spec.md §8: we model an empty file as
            // zero blocks; download of such a file produces an empty file
            // via an empty concatenation.
            return 0;
        }
        div_ceil_u64(file_size, block_size) as u32
    }

    /// Assign `duplicate_count` distinct storages for the replicas of one
    /// block: pop that many entries off the heap, remember them, then push
    /// them all back unchanged (spec.md §4.3 — "pop N, reinsert N", no
    /// re-scoring in between).
    pub fn assign_storages(
        &mut self,
        duplicate_count: u32,
    ) -> Result<Vec<(i64, Arc<dyn crate::storage::Storage>)>, BalancerError> {
        let needed = duplicate_count as usize;
        if self.heap.len() < needed {
            return Err(BalancerError::NoStorage {
                needed: duplicate_count,
                available: self.heap.len() as u32,
            });
        }

        let mut popped = Vec::with_capacity(needed);
        for _ in 0..needed {
            popped.push(self.heap.pop().expect("checked len above"));
        }

        let assigned = popped
            .iter()
            .map(|Reverse(h)| (h.0.storage_id, Arc::clone(&h.0.storage)))
            .collect();

        for handle in popped {
            self.heap.push(handle);
        }

        Ok(assigned)
    }

    /// Pick a cipher for a block. The reference policy chooses uniformly at
    /// random among the configured ciphers; the same key may be reused
    /// across blocks of one file (spec.md §4.3).
    pub fn assign_cipher(ciphers: &[Arc<dyn Cipher>]) -> Result<Arc<dyn Cipher>, BalancerError> {
        ciphers
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(BalancerError::NoCipher)
    }

    /// A fresh universally-unique replica name: 128 random bits rendered as
    /// hex, avoiding name collisions across files and storages (spec.md
    /// §4.3's "Naming").
    #[must_use]
    pub fn fresh_name() -> String {
        Uuid::new_v4().simple().to_string()
    }
}

fn div_ceil_u64(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn handle(id: i64, used: u64, total: u64) -> StorageHandle {
        StorageHandle {
            storage_id: id,
            load_ratio: used as f64 / total as f64,
            storage: Arc::new(MemoryStorage::new(total)),
        }
    }

    #[test]
    fn block_size_policy_matches_spec_bounds() {
        let min_bs = 1024;
        let max_bs = 1024 * 1024;

        assert_eq!(Balancer::choose_block_size(None, 10, min_bs, max_bs), min_bs);
        assert_eq!(
            Balancer::choose_block_size(None, min_bs + 1, min_bs, max_bs),
            min_bs + 1
        );
        assert_eq!(Balancer::choose_block_size(Some(77), 99_999, min_bs, max_bs), 77);
    }

    #[test]
    fn total_blocks_rounds_up() {
        assert_eq!(Balancer::total_blocks(0, 16), 0);
        assert_eq!(Balancer::total_blocks(16, 16), 1);
        assert_eq!(Balancer::total_blocks(17, 16), 2);
        assert_eq!(Balancer::total_blocks(32, 16), 2);
    }

    #[test]
    fn assign_storages_never_repeats_within_one_block() {
        let mut balancer = Balancer::new(vec![handle(1, 0, 100), handle(2, 0, 100), handle(3, 0, 100)]);
        let assigned = balancer.assign_storages(2).unwrap();
        let ids: Vec<_> = assigned.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn assign_storages_fails_with_too_few_storages() {
        let mut balancer = Balancer::new(vec![handle(1, 0, 100)]);
        assert_eq!(
            balancer.assign_storages(2).unwrap_err(),
            BalancerError::NoStorage { needed: 2, available: 1 }
        );
    }

    #[test]
    fn least_loaded_storage_is_assigned_first() {
        let mut balancer = Balancer::new(vec![handle(1, 90, 100), handle(2, 10, 100)]);
        let assigned = balancer.assign_storages(1).unwrap();
        assert_eq!(assigned[0].0, 2);
    }

    proptest::proptest! {
        /// Whatever block size the policy picks, concatenating
        /// `total_blocks` blocks of that size must cover the whole file
        /// with no block beyond the last exceeding it — the invariant the
        /// upload engine's block-reading loop depends on.
        #[test]
        fn chosen_block_size_covers_the_file_exactly(
            file_size in 0u64..10_000_000,
            min_bs in 1u64..1_000_000,
            max_bs_extra in 0u64..1_000_000,
        ) {
            let max_bs = min_bs + max_bs_extra;
            let block_size = Balancer::choose_block_size(None, file_size, min_bs, max_bs);
            let total_blocks = Balancer::total_blocks(file_size, block_size);

            if file_size == 0 {
                proptest::prop_assert_eq!(total_blocks, 0);
            } else {
                proptest::prop_assert!(block_size > 0);
                let covered = u64::from(total_blocks) * block_size;
                proptest::prop_assert!(covered >= file_size);
                proptest::prop_assert!(covered - file_size < block_size);
            }
        }
    }
}
