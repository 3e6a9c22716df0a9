// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The immutable canonical graph record.
//!
//! A [`DagStructure`] is what the canonicalizer emits and what every executor
//! consumes: a dense arena of deduplicated producers in topological,
//! phase-grouped order, with integer-index adjacency and the derived
//! per-graph flags. Graphs are never mutated; canonicalization, reduction,
//! and preparation each build a new one.
//!
//! # Node order
//!
//! `nodes` starts with the declared placeholders (in declaration order, even
//! the unreachable ones), then the generators, then all non-roots sorted by
//! phase; within one phase, preparable transformers come first, views second,
//! prepared transformers last. Every node appears after all of its parents.

use super::fingerprint::Fingerprint;
use super::handle::ProducerHandle;
use super::producer::{Producer, ProducerKind};
use super::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable canonical DAG.
#[derive(Clone)]
pub struct DagStructure {
    pub(crate) placeholders: Vec<Arc<Producer>>,
    pub(crate) outputs: Vec<Arc<Producer>>,
    pub(crate) nodes: Vec<Arc<Producer>>,
    pub(crate) phases: Vec<u32>,
    pub(crate) parents: Vec<Vec<usize>>,
    pub(crate) children: Vec<Vec<usize>>,
    pub(crate) output_indices: Vec<usize>,
    pub(crate) index_by_handle: HashMap<ProducerHandle, usize>,
    pub(crate) is_prepared: bool,
    pub(crate) max_parent_count: usize,
    pub(crate) max_minibatch_size: usize,
    pub(crate) is_always_constant: bool,
    pub(crate) has_idempotent_preparers: bool,
    pub(crate) fingerprint: Fingerprint,
}

impl DagStructure {
    /// Number of deduplicated nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &Arc<Producer> {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[Arc<Producer>] {
        &self.nodes
    }

    pub fn phase(&self, index: usize) -> u32 {
        self.phases[index]
    }

    /// Parent node indices, in the producer's input order (duplicates kept).
    pub fn parents(&self, index: usize) -> &[usize] {
        &self.parents[index]
    }

    /// Child node indices (each child listed once per consuming edge).
    pub fn children(&self, index: usize) -> &[usize] {
        &self.children[index]
    }

    /// Declared placeholders, in declaration order.
    pub fn placeholders(&self) -> &[Arc<Producer>] {
        &self.placeholders
    }

    /// Canonicalized outputs, in declaration order.
    pub fn outputs(&self) -> &[Arc<Producer>] {
        &self.outputs
    }

    /// Node index per output.
    pub fn output_indices(&self) -> &[usize] {
        &self.output_indices
    }

    pub fn index_of(&self, handle: ProducerHandle) -> Option<usize> {
        self.index_by_handle.get(&handle).copied()
    }

    /// No preparable transformer remains; the graph can be applied directly.
    pub fn is_prepared(&self) -> bool {
        self.is_prepared
    }

    pub fn max_parent_count(&self) -> usize {
        self.max_parent_count
    }

    /// Largest preferred minibatch size over the prepared nodes, at least 1.
    pub fn max_minibatch_size(&self) -> usize {
        self.max_minibatch_size
    }

    /// Every output yields the same value for every example.
    pub fn is_always_constant(&self) -> bool {
        self.is_always_constant
    }

    pub fn has_idempotent_preparers(&self) -> bool {
        self.has_idempotent_preparers
    }

    /// Number of phases (max phase + 1); zero for an empty graph.
    pub fn phase_count(&self) -> u32 {
        self.phases.iter().copied().max().map_or(0, |p| p + 1)
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Structural equality, independent of placeholder identities.
    pub fn fingerprint_eq(&self, other: &DagStructure) -> bool {
        self.fingerprint == other.fingerprint
    }

    /// One-line description for log output.
    pub fn summary(&self) -> String {
        format!(
            "{} nodes / {} phases / {} outputs{}",
            self.len(),
            self.phase_count(),
            self.outputs.len(),
            if self.is_prepared { " (prepared)" } else { "" }
        )
    }

    /// Evaluates a fully prepared graph over a single example.
    ///
    /// `inputs` supplies one value per declared placeholder; `row_index`
    /// feeds the generators. This is the inference path for embedded
    /// sub-DAGs and a convenient oracle for tests; bulk application goes
    /// through the executors.
    pub fn eval_row(&self, row_index: u64, inputs: &[Value]) -> anyhow::Result<Vec<Value>> {
        if inputs.len() != self.placeholders.len() {
            anyhow::bail!(
                "expected {} input values, got {}",
                self.placeholders.len(),
                inputs.len()
            );
        }
        let mut values: Vec<Value> = Vec::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            let value = match node.kind() {
                ProducerKind::Placeholder { .. } => {
                    // Placeholders occupy the first arena slots in
                    // declaration order.
                    inputs[index].clone()
                }
                ProducerKind::Generator(op) => op.generate(row_index),
                ProducerKind::Prepared { op, .. } => {
                    let args: Vec<Value> = self.parents[index]
                        .iter()
                        .map(|&p| values[p].clone())
                        .collect();
                    let state = op.new_execution_state();
                    op.apply(state.as_deref(), &args)?
                }
                ProducerKind::Preparable { .. } | ProducerKind::View { .. } => {
                    anyhow::bail!(
                        "cannot evaluate unprepared producer '{}' row-wise",
                        node.label()
                    )
                }
            };
            values.push(value);
        }
        Ok(self
            .output_indices
            .iter()
            .map(|&i| values[i].clone())
            .collect())
    }
}

impl std::fmt::Debug for DagStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DagStructure({})", self.summary())
    }
}
