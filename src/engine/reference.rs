//! Single-threaded reference executor.
//!
//! The behavioral oracle: every node's full column is materialized in
//! topological order, preparables see each row once and finish with a
//! replayable zip of their parents' columns, and views fire exactly once.
//! Simple enough to be obviously correct, which is the point — the batched
//! executor is tested against it.

use super::prepared::{assemble_prepared_graphs, PreparedOutcome};
use super::{apply_in_minibatches, check_input_sizes, DagExecutor, PreparationResult};
use crate::errors::ExecutionError;
use crate::graph::{DagStructure, ProducerKind, Value};
use crate::io::{zip_readers, ObjectReader, VecReader};
use crate::observability::messages::engine::{ExecutionCompleted, ExecutionStarted};
use crate::observability::messages::StructuredLog;
use async_trait::async_trait;
use std::sync::Arc;

/// Oracle executor. No configuration: one thread, whole-dataset columns.
#[derive(Default)]
pub struct ReferenceExecutor;

impl ReferenceExecutor {
    pub fn new() -> Self {
        ReferenceExecutor
    }

    fn run(
        &self,
        dag: &DagStructure,
        inputs: &[Arc<dyn ObjectReader>],
        emit_outputs: bool,
    ) -> Result<PreparationResult, ExecutionError> {
        let n = check_input_sizes(dag, inputs)?;
        ExecutionStarted {
            executor: "reference",
            nodes: dag.len(),
            batches: 1,
            max_threads: 1,
        }
        .log();

        let mut columns: Vec<Vec<Value>> = Vec::with_capacity(dag.len());
        let mut outcome = PreparedOutcome::default();

        for (index, node) in dag.nodes().iter().enumerate() {
            let column = match node.kind() {
                ProducerKind::Placeholder { .. } => {
                    let values = crate::io::collect_reader(inputs[index].as_ref())?;
                    if values.len() as u64 != n {
                        return Err(ExecutionError::ShapeMismatch {
                            label: node.label(),
                            expected: n,
                            actual: values.len() as u64,
                        });
                    }
                    values
                }
                ProducerKind::Generator(op) => (0..n).map(|i| op.generate(i)).collect(),
                ProducerKind::Prepared { op, .. } => {
                    let parent_cols: Vec<&[Value]> = dag
                        .parents(index)
                        .iter()
                        .map(|&p| columns[p].as_slice())
                        .collect();
                    let state = op.new_execution_state();
                    apply_in_minibatches(op, state.as_deref(), &parent_cols, n as usize, None)
                        .map_err(|e| ExecutionError::failed(node.label(), e))?
                }
                ProducerKind::Preparable { op, .. } => {
                    let parent_indices = dag.parents(index).to_vec();
                    let mut preparer = op.preparer();
                    let mut args: Vec<Value> = Vec::with_capacity(parent_indices.len());
                    for row in 0..n as usize {
                        args.clear();
                        args.extend(parent_indices.iter().map(|&p| columns[p][row].clone()));
                        preparer
                            .process(&args)
                            .map_err(|e| ExecutionError::failed(node.label(), e))?;
                    }

                    // Replayable concatenation of the parent columns.
                    let parts: Vec<Arc<dyn ObjectReader>> = parent_indices
                        .iter()
                        .map(|&p| {
                            Arc::new(VecReader::new(columns[p].clone())) as Arc<dyn ObjectReader>
                        })
                        .collect();
                    let pair = preparer
                        .finish(Some(zip_readers(parts)))
                        .map_err(|e| ExecutionError::failed(node.label(), e))?;

                    let parent_cols: Vec<&[Value]> = parent_indices
                        .iter()
                        .map(|&p| columns[p].as_slice())
                        .collect();
                    let applied = pair.for_preparation_data.clone();
                    let state = applied.new_execution_state();
                    let column = apply_in_minibatches(
                        &applied,
                        state.as_deref(),
                        &parent_cols,
                        n as usize,
                        None,
                    )
                    .map_err(|e| ExecutionError::failed(node.label(), e))?;
                    outcome.pairs.insert(index, pair);
                    column
                }
                ProducerKind::View { op, .. } => {
                    let parent = dag.parents(index)[0];
                    let pair = outcome
                        .pairs
                        .get(&parent)
                        .expect("view parent prepares before the view fires");
                    let new = op
                        .observe(pair.for_new_data.as_ref())
                        .map_err(|e| ExecutionError::failed(node.label(), e))?;
                    let prep = op
                        .observe(pair.for_preparation_data.as_ref())
                        .map_err(|e| ExecutionError::failed(node.label(), e))?;
                    let column = vec![prep.clone(); n as usize];
                    outcome.views.insert(index, (new, prep));
                    column
                }
            };
            columns.push(column);
        }

        let outputs = emit_outputs.then(|| {
            dag.output_indices()
                .iter()
                .map(|&i| {
                    Arc::new(VecReader::new(columns[i].clone())) as Arc<dyn ObjectReader>
                })
                .collect::<Vec<_>>()
        });

        let (for_new_data, for_preparation_data) = assemble_prepared_graphs(dag, &outcome)?;
        ExecutionCompleted {
            executor: "reference",
            rows: n,
            outputs: dag.outputs().len(),
        }
        .log();
        Ok(PreparationResult {
            for_new_data,
            for_preparation_data,
            outputs,
        })
    }
}

#[async_trait]
impl DagExecutor for ReferenceExecutor {
    async fn prepare(
        &self,
        dag: &DagStructure,
        inputs: &[Arc<dyn ObjectReader>],
        emit_outputs: bool,
    ) -> Result<PreparationResult, ExecutionError> {
        self.run(dag, inputs, emit_outputs)
    }

    async fn apply(
        &self,
        dag: &DagStructure,
        inputs: &[Arc<dyn ObjectReader>],
    ) -> Result<Vec<Arc<dyn ObjectReader>>, ExecutionError> {
        if !dag.is_prepared() {
            return Err(ExecutionError::NotSupported(
                "apply requires a prepared graph; run prepare first".into(),
            ));
        }
        let result = self.run(dag, inputs, true)?;
        Ok(result.outputs.unwrap_or_default())
    }
}
