//! Fast prepared-only executor.
//!
//! Low-overhead bulk application of an already-prepared graph. There is no
//! node-level pipelining here: parallelism comes purely from partitioning
//! the input rows into slices, each executed independently with two flat
//! buffers (gathered arguments and per-node results). Slices run on rayon —
//! the shared global pool by default, or a dedicated pool when
//! `use_common_pool` is off.
//!
//! Graphs that still contain preparable transformers are rejected with
//! [`ExecutionError::NotSupported`]; training belongs to the reference and
//! batched executors.

use super::{apply_in_minibatches, check_input_sizes, FastExecutorConfig};
use crate::errors::ExecutionError;
use crate::graph::{DagStructure, ProducerKind, Value};
use crate::io::{ObjectReader, VecReader};
use crate::observability::messages::engine::{ExecutionCompleted, ExecutionStarted};
use crate::observability::messages::StructuredLog;
use rayon::prelude::*;
use std::sync::Arc;

/// Row-partitioned executor for prepared graphs.
pub struct FastExecutor {
    config: FastExecutorConfig,
}

impl FastExecutor {
    pub fn new(config: FastExecutorConfig) -> Self {
        FastExecutor {
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &FastExecutorConfig {
        &self.config
    }

    /// Applies the prepared graph over the dataset, returning one reader per
    /// graph output in dataset row order.
    pub fn apply(
        &self,
        dag: &DagStructure,
        inputs: &[Arc<dyn ObjectReader>],
    ) -> Result<Vec<Arc<dyn ObjectReader>>, ExecutionError> {
        if !dag.is_prepared() {
            let preparable = dag
                .nodes()
                .iter()
                .find(|n| n.is_preparable())
                .map(|n| n.label())
                .unwrap_or_default();
            return Err(ExecutionError::NotSupported(format!(
                "the prepared-only executor cannot run a graph containing preparable \
                 transformers ({preparable})"
            )));
        }
        let n = check_input_sizes(dag, inputs)?;

        let slice_count = (n / self.config.min_inputs_per_thread as u64)
            .clamp(1, self.config.max_threads as u64) as usize;
        ExecutionStarted {
            executor: "fast",
            nodes: dag.len(),
            batches: slice_count as u64,
            max_threads: self.config.max_threads,
        }
        .log();

        let slices = partition(n, slice_count);
        let slice_outputs: Result<Vec<Vec<Vec<Value>>>, ExecutionError> =
            if slices.len() == 1 || self.config.max_threads == 1 {
                slices
                    .iter()
                    .map(|&(start, len)| run_slice(dag, inputs, start, len, &self.config))
                    .collect()
            } else if self.config.use_common_pool {
                slices
                    .par_iter()
                    .map(|&(start, len)| run_slice(dag, inputs, start, len, &self.config))
                    .collect()
            } else {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(self.config.max_threads)
                    .build()
                    .map_err(|e| ExecutionError::NotSupported(e.to_string()))?;
                pool.install(|| {
                    slices
                        .par_iter()
                        .map(|&(start, len)| run_slice(dag, inputs, start, len, &self.config))
                        .collect()
                })
            };
        let slice_outputs = slice_outputs?;

        // Stitch the slices back together per output.
        let output_count = dag.outputs().len();
        let mut stitched: Vec<Vec<Value>> = (0..output_count)
            .map(|_| Vec::with_capacity(n as usize))
            .collect();
        for mut slice in slice_outputs {
            for (out, column) in stitched.iter_mut().zip(slice.drain(..)) {
                out.extend(column);
            }
        }
        ExecutionCompleted {
            executor: "fast",
            rows: n,
            outputs: output_count,
        }
        .log();
        Ok(stitched
            .into_iter()
            .map(|column| Arc::new(VecReader::new(column)) as Arc<dyn ObjectReader>)
            .collect())
    }
}

impl Default for FastExecutor {
    fn default() -> Self {
        FastExecutor::new(FastExecutorConfig::default())
    }
}

/// Contiguous row ranges covering `0..n`, one per slice.
fn partition(n: u64, slices: usize) -> Vec<(u64, usize)> {
    let slices = slices.max(1) as u64;
    let base = n / slices;
    let remainder = n % slices;
    let mut out = Vec::with_capacity(slices as usize);
    let mut start = 0;
    for i in 0..slices {
        let len = base + u64::from(i < remainder);
        out.push((start, len as usize));
        start += len;
    }
    out
}

/// Executes every node over one row slice.
fn run_slice(
    dag: &DagStructure,
    inputs: &[Arc<dyn ObjectReader>],
    start: u64,
    len: usize,
    config: &FastExecutorConfig,
) -> Result<Vec<Vec<Value>>, ExecutionError> {
    let mut results: Vec<Vec<Value>> = Vec::with_capacity(dag.len());
    for (index, node) in dag.nodes().iter().enumerate() {
        let column = match node.kind() {
            ProducerKind::Placeholder { .. } => {
                let mut it = inputs[index].iter();
                it.skip(start)?;
                let mut buf = Vec::with_capacity(len);
                let copied = it.next_batch(&mut buf, len)?;
                if copied != len {
                    return Err(ExecutionError::ShapeMismatch {
                        label: node.label(),
                        expected: len as u64,
                        actual: copied as u64,
                    });
                }
                buf
            }
            ProducerKind::Generator(op) => {
                (0..len).map(|r| op.generate(start + r as u64)).collect()
            }
            ProducerKind::Prepared { op, .. } => {
                let parent_cols: Vec<&[Value]> = dag
                    .parents(index)
                    .iter()
                    .map(|&p| results[p].as_slice())
                    .collect();
                let state = op.new_execution_state();
                apply_in_minibatches(
                    op,
                    state.as_deref(),
                    &parent_cols,
                    len,
                    Some(config.max_minibatch_size),
                )
                .map_err(|e| ExecutionError::failed(node.label(), e))?
            }
            ProducerKind::Preparable { .. } | ProducerKind::View { .. } => {
                // Unreachable: is_prepared was checked, and a view cannot
                // outlive its preparable parent.
                return Err(ExecutionError::NotSupported(format!(
                    "unexpected trainable producer '{}' in a prepared graph",
                    node.label()
                )));
            }
        };
        results.push(column);
    }
    Ok(dag
        .output_indices()
        .iter()
        .map(|&i| results[i].clone())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::examples::arithmetic::{Add, Negate};
    use crate::examples::generators::IndexGenerator;
    use crate::examples::stats::Mean;
    use crate::graph::{canonicalize, Producer};
    use crate::io::collect_reader;

    fn i64s(values: &[i64]) -> Arc<dyn ObjectReader> {
        Arc::new(VecReader::new(values.iter().map(|&v| Value::I64(v)).collect()))
    }

    #[test]
    fn applies_a_prepared_graph() {
        let p0 = Producer::placeholder("x");
        let neg = Producer::prepared(Negate::new(), vec![p0.clone()]);
        let out = Producer::prepared(Add::new(), vec![neg, p0.clone()]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();

        let outputs = FastExecutor::default()
            .apply(&dag, &[i64s(&[1, 2, 3])])
            .unwrap();
        assert_eq!(
            collect_reader(outputs[0].as_ref()).unwrap(),
            vec![Value::I64(0), Value::I64(0), Value::I64(0)]
        );
    }

    #[test]
    fn generators_track_absolute_row_indices_across_slices() {
        let p0 = Producer::placeholder("x");
        let idx = Producer::generator(IndexGenerator::new());
        let out = Producer::prepared(Add::new(), vec![p0.clone(), idx]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();

        let executor = FastExecutor::new(FastExecutorConfig {
            max_threads: 4,
            min_inputs_per_thread: 2,
            ..Default::default()
        });
        let n = 64i64;
        let zeros: Vec<i64> = vec![0; n as usize];
        let outputs = executor.apply(&dag, &[i64s(&zeros)]).unwrap();
        let values = collect_reader(outputs[0].as_ref()).unwrap();
        let expected: Vec<Value> = (0..n).map(Value::I64).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn rejects_preparable_graphs() {
        let p0 = Producer::placeholder("x");
        let mean = Producer::preparable(Mean::new(), vec![p0.clone()]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[mean]).unwrap();

        let err = FastExecutor::default()
            .apply(&dag, &[i64s(&[1])])
            .err().unwrap();
        assert!(matches!(err, ExecutionError::NotSupported(_)));
    }

    #[test]
    fn empty_dataset_yields_empty_outputs() {
        let p0 = Producer::placeholder("x");
        let dag = canonicalize(std::slice::from_ref(&p0), &[p0.clone()]).unwrap();
        let outputs = FastExecutor::default().apply(&dag, &[i64s(&[])]).unwrap();
        assert_eq!(outputs[0].size64(), 0);
    }

    #[test]
    fn partition_covers_all_rows() {
        let parts = partition(10, 3);
        assert_eq!(parts, vec![(0, 4), (4, 3), (7, 3)]);
        assert_eq!(partition(0, 4), vec![(0, 0), (0, 0), (0, 0), (0, 0)]);
    }
}
