// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Executor configuration records.
//!
//! Configuration is passed in immutable values; nothing is read from the
//! environment. All limits are clamped to at least 1 on construction, the
//! defaults follow the machine's logical core count.

use crate::io::StoragePolicy;
use serde::{Deserialize, Serialize};

/// Twice the logical cores, the default width for the batched executor.
fn double_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(8)
}

/// Configuration of the batched multithreaded executor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchExecutorConfig {
    /// Rows per batch; the final batch may be shorter.
    pub batch_size: usize,
    /// Depth of each node's circular batch window (back-pressure bound).
    pub max_concurrent_batches: usize,
    /// Maximum concurrently executing tasks.
    pub max_threads: usize,
    /// Where replayable intermediate columns are buffered.
    pub storage: StoragePolicy,
}

impl Default for BatchExecutorConfig {
    fn default() -> Self {
        BatchExecutorConfig {
            batch_size: 5000,
            max_concurrent_batches: double_cores(),
            max_threads: double_cores(),
            storage: StoragePolicy::Heap,
        }
    }
}

impl BatchExecutorConfig {
    /// Copy with every limit clamped to at least 1.
    pub(crate) fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.max_concurrent_batches = self.max_concurrent_batches.max(1);
        self.max_threads = self.max_threads.max(1);
        self
    }
}

/// Configuration of the fast prepared-only executor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastExecutorConfig {
    /// Maximum row-partitioned slices executing in parallel.
    pub max_threads: usize,
    /// A slice is only split off when it would hold at least this many rows.
    pub min_inputs_per_thread: usize,
    /// Upper bound on any single bulk-apply call, on top of each
    /// transformer's own preference.
    pub max_minibatch_size: usize,
    /// Run slices on the shared rayon pool instead of a dedicated one.
    pub use_common_pool: bool,
}

impl Default for FastExecutorConfig {
    fn default() -> Self {
        FastExecutorConfig {
            max_threads: 1,
            min_inputs_per_thread: 128,
            max_minibatch_size: 1024,
            use_common_pool: true,
        }
    }
}

impl FastExecutorConfig {
    pub(crate) fn normalized(mut self) -> Self {
        self.max_threads = self.max_threads.max(1);
        self.min_inputs_per_thread = self.min_inputs_per_thread.max(1);
        self.max_minibatch_size = self.max_minibatch_size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_positive() {
        let batch = BatchExecutorConfig::default();
        assert!(batch.batch_size >= 1);
        assert!(batch.max_concurrent_batches >= 1);
        assert!(batch.max_threads >= 1);
        assert_eq!(batch.storage, StoragePolicy::Heap);

        let fast = FastExecutorConfig::default();
        assert_eq!(fast.max_threads, 1);
        assert!(fast.use_common_pool);
    }

    #[test]
    fn zero_limits_are_clamped() {
        let cfg = BatchExecutorConfig {
            batch_size: 0,
            max_concurrent_batches: 0,
            max_threads: 0,
            storage: StoragePolicy::Heap,
        }
        .normalized();
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.max_concurrent_batches, 1);
        assert_eq!(cfg.max_threads, 1);
    }
}
