// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! DAG executors.
//!
//! Three ways to run a canonical graph over a dataset:
//!
//! * [`ReferenceExecutor`] — single-threaded oracle, defines the semantics.
//! * [`BatchExecutor`] — the production path: streams fixed-size batches
//!   through a phased pipeline of tasks with back-pressure and spill.
//! * [`FastExecutor`] — low-overhead, row-partitioned application of an
//!   already-prepared graph.

pub mod batch;
pub mod config;
pub mod fast;
mod prepared;
pub mod reference;

#[cfg(test)]
mod integration_tests;

pub use batch::BatchExecutor;
pub use config::{BatchExecutorConfig, FastExecutorConfig};
pub use fast::FastExecutor;
pub use reference::ReferenceExecutor;

use crate::errors::ExecutionError;
use crate::graph::{DagStructure, ExecutionState, Transform, Value};
use crate::io::ObjectReader;
use async_trait::async_trait;
use std::sync::Arc;

/// Everything a training run returns.
pub struct PreparationResult {
    /// The graph to expose for inference: preparables swapped for their
    /// for-new-data prepared forms, views for their for-new-data constants.
    pub for_new_data: DagStructure,
    /// Same, but carrying the for-preparation-data forms; applying this
    /// graph to the training set reproduces the training outputs.
    pub for_preparation_data: DagStructure,
    /// Outputs of applying the graph over the training dataset, when
    /// requested: one reader per graph output, in dataset row order.
    pub outputs: Option<Vec<Arc<dyn ObjectReader>>>,
}

/// Common executor surface for training and bulk application.
#[async_trait]
pub trait DagExecutor: Send + Sync {
    /// Runs the full two-phase lifecycle over the dataset: preparables are
    /// trained in phase order, views resolve, and the prepared graph pair is
    /// assembled. Application outputs are produced when `emit_outputs` is
    /// set.
    async fn prepare(
        &self,
        dag: &DagStructure,
        inputs: &[Arc<dyn ObjectReader>],
        emit_outputs: bool,
    ) -> Result<PreparationResult, ExecutionError>;

    /// Applies an already-prepared graph over the dataset.
    async fn apply(
        &self,
        dag: &DagStructure,
        inputs: &[Arc<dyn ObjectReader>],
    ) -> Result<Vec<Arc<dyn ObjectReader>>, ExecutionError>;
}

/// Validates the per-placeholder readers: one per placeholder, all agreeing
/// on `size64()`. Returns the dataset length.
pub(crate) fn check_input_sizes(
    dag: &DagStructure,
    inputs: &[Arc<dyn ObjectReader>],
) -> Result<u64, ExecutionError> {
    let placeholders = dag.placeholders();
    if inputs.len() != placeholders.len() {
        return Err(ExecutionError::NotSupported(format!(
            "graph declares {} placeholders but {} input readers were supplied",
            placeholders.len(),
            inputs.len()
        )));
    }
    let mut n = None;
    for (placeholder, reader) in placeholders.iter().zip(inputs.iter()) {
        let size = reader.size64();
        match n {
            None => n = Some(size),
            Some(expected) if expected != size => {
                return Err(ExecutionError::ShapeMismatch {
                    label: placeholder.label(),
                    expected,
                    actual: size,
                });
            }
            Some(_) => {}
        }
    }
    Ok(n.unwrap_or(0))
}

/// Applies a transformer over column-major parent slices in chunks bounded
/// by its preferred minibatch size (and an optional executor-side cap).
pub(crate) fn apply_in_minibatches(
    op: &Arc<dyn Transform>,
    state: Option<&ExecutionState>,
    parent_cols: &[&[Value]],
    rows: usize,
    cap: Option<usize>,
) -> anyhow::Result<Vec<Value>> {
    let mut minibatch = op.preferred_minibatch_size().max(1);
    if let Some(cap) = cap {
        minibatch = minibatch.min(cap.max(1));
    }
    let mut out = Vec::with_capacity(rows);
    let mut start = 0;
    while start < rows {
        let end = (start + minibatch).min(rows);
        let slices: Vec<&[Value]> = parent_cols.iter().map(|c| &c[start..end]).collect();
        op.apply_all(state, &slices, end - start, &mut out)?;
        start = end;
    }
    Ok(out)
}
