// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Error types for graph execution.
//!
//! Execution follows a no-retry policy: the first failure in any task is
//! fatal to the entire run. Producers are expected to handle their own
//! recoverable errors internally; whatever escapes a producer is captured in
//! a single-slot first-error cell, the scheduler stops dispatching work, and
//! the error surfaces to the caller once in-flight tasks have drained.

use thiserror::Error;

use super::{GraphError, StorageError};

/// Errors surfaced by the reference, batched, and fast executors.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Per-placeholder input readers disagree on `size64()`, or a bulk read
    /// returned fewer elements than the reader promised mid-execution.
    #[error("shape mismatch at '{label}': expected {expected} values, found {actual}")]
    ShapeMismatch {
        label: String,
        expected: u64,
        actual: u64,
    },

    /// The requested execution mode cannot run this graph, e.g. applying a
    /// graph that still contains preparable transformers through the
    /// prepared-only executor.
    #[error("unsupported execution: {0}")]
    NotSupported(String),

    /// A user-supplied producer failed during execution. Wraps the first
    /// captured cause.
    #[error("producer '{label}' failed during execution")]
    Failed {
        label: String,
        #[source]
        source: anyhow::Error,
    },

    /// Intermediate-value storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The graph itself was rejected before execution started.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl ExecutionError {
    /// Wraps a producer failure with the producer's label.
    pub fn failed(label: impl Into<String>, source: anyhow::Error) -> Self {
        ExecutionError::Failed {
            label: label.into(),
            source,
        }
    }
}
