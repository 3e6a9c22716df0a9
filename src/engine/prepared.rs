//! Assembly of the prepared output graphs.
//!
//! After a training run every preparable has produced a prepared pair and
//! every view has observed both forms. The result graphs are copies of the
//! original with each preparable swapped for its prepared transformer and
//! each view swapped for the constant it resolved to — one graph per data
//! role. Both executors (reference and batched) feed their outcomes through
//! this one assembler so the graphs they return are identical in shape.

use crate::errors::GraphError;
use crate::graph::{
    assemble, Constant, DagStructure, PreparedPair, Producer, ProducerKind, Value,
};
use std::collections::HashMap;
use std::sync::Arc;

/// What a training run learned, keyed by canonical node index.
#[derive(Default)]
pub(crate) struct PreparedOutcome {
    pub pairs: HashMap<usize, PreparedPair>,
    /// Per view: (for-new-data value, for-preparation-data value).
    pub views: HashMap<usize, (Value, Value)>,
}

/// Builds the (for-new-data, for-preparation-data) graph pair.
pub(crate) fn assemble_prepared_graphs(
    dag: &DagStructure,
    outcome: &PreparedOutcome,
) -> Result<(DagStructure, DagStructure), GraphError> {
    let new_graph = assemble_one(dag, outcome, true)?;
    let prep_graph = assemble_one(dag, outcome, false)?;
    Ok((new_graph, prep_graph))
}

fn assemble_one(
    dag: &DagStructure,
    outcome: &PreparedOutcome,
    for_new_data: bool,
) -> Result<DagStructure, GraphError> {
    let mut rebuilt: Vec<Arc<Producer>> = Vec::with_capacity(dag.len());
    for (index, node) in dag.nodes().iter().enumerate() {
        let parents: Vec<Arc<Producer>> = dag
            .parents(index)
            .iter()
            .map(|&p| rebuilt[p].clone())
            .collect();
        let instance = match node.kind() {
            ProducerKind::Placeholder { .. } | ProducerKind::Generator(_) => node.clone(),
            ProducerKind::Prepared { .. } => rebuild_if_changed(node, index, dag, parents),
            ProducerKind::Preparable { .. } => {
                let pair = outcome
                    .pairs
                    .get(&index)
                    .expect("every preparable has a prepared pair after training");
                let op = if for_new_data {
                    pair.for_new_data.clone()
                } else {
                    pair.for_preparation_data.clone()
                };
                Producer::prepared(op, parents)
            }
            ProducerKind::View { .. } => {
                let (new, prep) = outcome
                    .views
                    .get(&index)
                    .expect("every view has resolved after training");
                let value = if for_new_data { new.clone() } else { prep.clone() };
                Constant::producer(value)
            }
        };
        rebuilt.push(instance);
    }

    let outputs: Vec<Arc<Producer>> = dag
        .output_indices()
        .iter()
        .map(|&i| rebuilt[i].clone())
        .collect();
    assemble(dag.placeholders(), &outputs)
}

fn rebuild_if_changed(
    node: &Arc<Producer>,
    index: usize,
    dag: &DagStructure,
    parents: Vec<Arc<Producer>>,
) -> Arc<Producer> {
    let changed = dag
        .parents(index)
        .iter()
        .zip(parents.iter())
        .any(|(&p, built)| !Arc::ptr_eq(dag.node(p), built));
    if changed {
        node.with_inputs(parents)
    } else {
        node.clone()
    }
}
