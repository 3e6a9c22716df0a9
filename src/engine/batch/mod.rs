//! Batched, streaming, multithreaded executor.
//!
//! The production executor. The dataset is cut into fixed-size batches that
//! stream through the graph as a pipeline of tokio tasks: every ready
//! (node, batch) pair becomes one task, bounded by a global `max_threads`
//! semaphore and per-node windows of `max_concurrent_batches` in-flight
//! batches (back-pressure). Preparable transformers consume their input
//! strictly in order through a sequential drain guard and finish at a round
//! barrier; later rounds stream from recorded append buffers (heap or spill
//! files, per storage policy) and from the prepared transformers'
//! application streams.
//!
//! Scheduling is organized in **rounds** realizing the phase contract: no
//! node's values flow before every preparation it depends on has finished.
//! Within a round the pipeline is fully concurrent; the round barrier is the
//! scheduler-wide pending-task counter draining to zero.
//!
//! Failure handling: the first error from any task is captured in a
//! single-slot cell, the abort flag stops new work, stalled waiters are
//! woken, and the error surfaces once in-flight tasks have drained. Held
//! writers are dropped with the run.

mod plan;
mod runtime;

use super::prepared::{assemble_prepared_graphs, PreparedOutcome};
use super::{check_input_sizes, BatchExecutorConfig, DagExecutor, PreparationResult};
use crate::errors::ExecutionError;
use crate::graph::DagStructure;
use crate::io::{ConstantReader, ObjectReader};
use crate::observability::messages::engine::{
    ExecutionCompleted, ExecutionFailed, ExecutionStarted, RoundStarted,
};
use crate::observability::messages::StructuredLog;
use async_trait::async_trait;
use plan::{build_wiring, Role};
use runtime::{
    applier_task, close_empty_append, finish_task, generator_task, parentless_prepare_task,
    replay_task, reset_round_state, rootless_apply_task, source_task, spawn, view_task, Append,
    AppendState, NodeRt, Run, SeqState, TaskCounter,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use tokio::sync::{Mutex, Notify, Semaphore};

/// The batched multithreaded executor.
pub struct BatchExecutor {
    config: BatchExecutorConfig,
}

impl BatchExecutor {
    pub fn new(config: BatchExecutorConfig) -> Self {
        BatchExecutor {
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &BatchExecutorConfig {
        &self.config
    }

    async fn run(
        &self,
        dag: &DagStructure,
        inputs: &[Arc<dyn ObjectReader>],
        emit_outputs: bool,
    ) -> Result<(Arc<Run>, PreparedOutcome), ExecutionError> {
        let n = check_input_sizes(dag, inputs)?;
        let cfg = self.config;
        let batches = n.div_ceil(cfg.batch_size as u64);
        let wiring = build_wiring(dag, emit_outputs);

        ExecutionStarted {
            executor: "batch",
            nodes: dag.len(),
            batches,
            max_threads: cfg.max_threads,
        }
        .log();

        let mut nodes = Vec::with_capacity(dag.len());
        for (index, plan) in wiring.plans.iter().enumerate() {
            let append = if plan.needs_append {
                Some(Append {
                    state: Mutex::new(AppendState {
                        writer: Some(cfg.storage.writer()?),
                        next: 0,
                        stash: BTreeMap::new(),
                        reader: None,
                    }),
                    closed: Notify::new(),
                })
            } else {
                None
            };
            let preparer = dag.node(index).prepare_op().map(|op| op.preparer());
            nodes.push(NodeRt {
                inbox: Mutex::new(HashMap::new()),
                window: Mutex::new(Default::default()),
                window_notify: Notify::new(),
                seq: Mutex::new(SeqState {
                    next: 0,
                    stash: BTreeMap::new(),
                    draining: false,
                    preparer,
                    finish_spawned: false,
                }),
                exec_state: OnceLock::new(),
                const_value: OnceLock::new(),
                append,
            });
        }

        let run = Arc::new(Run {
            dag: dag.clone(),
            cfg,
            n,
            batches,
            plans: wiring.plans,
            nodes,
            inputs: inputs.to_vec(),
            current_round: AtomicU32::new(0),
            tasks: TaskCounter::default(),
            permits: Semaphore::new(cfg.max_threads),
            failure: StdMutex::new(None),
            aborted: AtomicBool::new(false),
            pairs: (0..dag.len()).map(|_| OnceLock::new()).collect(),
            view_values: (0..dag.len()).map(|_| OnceLock::new()).collect(),
        });

        for round in 0..=wiring.max_round {
            if run.is_aborted() {
                break;
            }
            run.current_round.store(round, Ordering::SeqCst);
            reset_round_state(&run).await;
            self.spawn_round(&run, round).await?;
            run.tasks.drained().await;
        }

        if let Some(error) = run.take_failure() {
            ExecutionFailed {
                executor: "batch",
                error: &error,
            }
            .log();
            return Err(error);
        }

        let mut outcome = PreparedOutcome::default();
        for index in 0..dag.len() {
            if let Some(pair) = run.pairs[index].get() {
                outcome.pairs.insert(index, pair.clone());
            }
            if let Some(values) = run.view_values[index].get() {
                outcome.views.insert(index, values.clone());
            }
        }
        ExecutionCompleted {
            executor: "batch",
            rows: n,
            outputs: dag.outputs().len(),
        }
        .log();
        Ok((run, outcome))
    }

    /// Spawns every task that drives the given round.
    async fn spawn_round(&self, run: &Arc<Run>, round: u32) -> Result<(), ExecutionError> {
        let mut sources = 0usize;
        for index in 0..run.dag.len() {
            let plan = run.plans[index].clone();
            let streams_now = plan.stream_round == round;
            let replays_now = plan.replays.contains_key(&round);

            // Appends that will never see a batch seal immediately so that
            // finish tasks and replays do not wait forever.
            if streams_now && plan.needs_append && run.batches == 0 {
                close_empty_append(run, index).await?;
            }

            match plan.role {
                Role::Source => {
                    if streams_now && plan.consumers_in_round(round) > 0 {
                        let run2 = run.clone();
                        spawn(run, async move { source_task(run2, index).await });
                        sources += 1;
                    } else if replays_now {
                        let run2 = run.clone();
                        spawn(run, async move { replay_task(run2, index).await });
                        sources += 1;
                    }
                }
                Role::Generator => {
                    if (streams_now || replays_now) && plan.consumers_in_round(round) > 0 {
                        let run2 = run.clone();
                        spawn(run, async move { generator_task(run2, index).await });
                        sources += 1;
                    }
                }
                Role::Apply => {
                    let rootless = run.dag.parents(index).is_empty();
                    if streams_now && rootless && plan.consumers_in_round(round) > 0 {
                        let run2 = run.clone();
                        spawn(run, async move { rootless_apply_task(run2, index).await });
                        sources += 1;
                    } else if replays_now {
                        let run2 = run.clone();
                        spawn(run, async move { replay_task(run2, index).await });
                        sources += 1;
                    }
                    // With parents, the node is driven by deliveries.
                }
                Role::Prepare {
                    intake_round,
                    has_applier,
                    ..
                } => {
                    let parentless = run.dag.parents(index).is_empty();
                    if intake_round == round && (run.batches == 0 || parentless) {
                        let mut seq = run.nodes[index].seq.lock().await;
                        if !seq.finish_spawned {
                            seq.finish_spawned = true;
                            drop(seq);
                            let run2 = run.clone();
                            if parentless && run.batches > 0 {
                                spawn(run, async move {
                                    parentless_prepare_task(run2, index).await
                                });
                            } else {
                                spawn(run, async move { finish_task(run2, index).await });
                            }
                        }
                    }
                    if streams_now && has_applier {
                        let run2 = run.clone();
                        spawn(run, async move { applier_task(run2, index).await });
                        sources += 1;
                    } else if replays_now {
                        let run2 = run.clone();
                        spawn(run, async move { replay_task(run2, index).await });
                        sources += 1;
                    }
                }
                Role::View => {
                    if streams_now || replays_now {
                        let run2 = run.clone();
                        spawn(run, async move { view_task(run2, index).await });
                        sources += 1;
                    }
                }
            }
        }
        RoundStarted { round, sources }.log();
        Ok(())
    }

    /// Collects the output readers once every round has drained.
    async fn collect_outputs(
        &self,
        run: &Arc<Run>,
    ) -> Result<Vec<Arc<dyn ObjectReader>>, ExecutionError> {
        let mut readers: Vec<Option<Arc<dyn ObjectReader>>> =
            vec![None; run.dag.outputs().len()];
        for (index, plan) in run.plans.iter().enumerate() {
            if plan.output_slots.is_empty() {
                continue;
            }
            let reader: Arc<dyn ObjectReader> = if matches!(plan.role, Role::View) {
                let (_, prep) = run.view_values[index]
                    .get()
                    .expect("view resolved before outputs are collected")
                    .clone();
                Arc::new(ConstantReader::new(prep, run.n))
            } else {
                let append = run.nodes[index]
                    .append
                    .as_ref()
                    .expect("output nodes record an append");
                let state = append.state.lock().await;
                state
                    .reader
                    .as_ref()
                    .expect("output append sealed before outputs are collected")
                    .clone()
            };
            for &slot in &plan.output_slots {
                readers[slot] = Some(reader.clone());
            }
        }
        Ok(readers
            .into_iter()
            .map(|r| r.expect("every output slot is served"))
            .collect())
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        BatchExecutor::new(BatchExecutorConfig::default())
    }
}

#[async_trait]
impl DagExecutor for BatchExecutor {
    async fn prepare(
        &self,
        dag: &DagStructure,
        inputs: &[Arc<dyn ObjectReader>],
        emit_outputs: bool,
    ) -> Result<PreparationResult, ExecutionError> {
        let (run, outcome) = self.run(dag, inputs, emit_outputs).await?;
        let outputs = if emit_outputs {
            Some(self.collect_outputs(&run).await?)
        } else {
            None
        };
        let (for_new_data, for_preparation_data) = assemble_prepared_graphs(dag, &outcome)?;
        Ok(PreparationResult {
            for_new_data,
            for_preparation_data,
            outputs,
        })
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
        let (run, _) = self.run(dag, inputs, true).await?;
        self.collect_outputs(&run).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::examples::arithmetic::{Add, Sub};
    use crate::examples::stats::Mean;
    use crate::graph::{canonicalize, Producer, Value};
    use crate::io::{collect_reader, VecReader};

    fn reader_of(values: Vec<Value>) -> Arc<dyn ObjectReader> {
        Arc::new(VecReader::new(values))
    }

    fn f64s(values: &[f64]) -> Arc<dyn ObjectReader> {
        reader_of(values.iter().map(|&v| Value::F64(v)).collect())
    }

    #[tokio::test]
    async fn prepared_chain_streams_in_one_round() {
        let p0 = Producer::placeholder("x");
        let sum = Producer::prepared(Add::new(), vec![p0.clone(), p0.clone()]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[sum]).unwrap();

        let executor = BatchExecutor::new(BatchExecutorConfig {
            batch_size: 2,
            ..Default::default()
        });
        let outputs = executor.apply(&dag, &[f64s(&[1.0, 2.0, 3.0, 4.0, 5.0])]).await.unwrap();
        assert_eq!(
            collect_reader(outputs[0].as_ref()).unwrap(),
            vec![
                Value::F64(2.0),
                Value::F64(4.0),
                Value::F64(6.0),
                Value::F64(8.0),
                Value::F64(10.0)
            ]
        );
    }

    #[tokio::test]
    async fn preparation_crosses_the_round_barrier() {
        let p0 = Producer::placeholder("x");
        let mean = Producer::preparable(Mean::new(), vec![p0.clone()]);
        let out = Producer::prepared(Sub::new(), vec![p0.clone(), mean]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();

        let executor = BatchExecutor::new(BatchExecutorConfig {
            batch_size: 3,
            ..Default::default()
        });
        let result = executor
            .prepare(&dag, &[f64s(&[1.0, 2.0, 3.0, 4.0])], true)
            .await
            .unwrap();
        let outputs = result.outputs.unwrap();
        assert_eq!(
            collect_reader(outputs[0].as_ref()).unwrap(),
            vec![
                Value::F64(-1.5),
                Value::F64(-0.5),
                Value::F64(0.5),
                Value::F64(1.5)
            ]
        );
        assert!(result.for_new_data.is_prepared());
    }

    /// An output that is also replayed for a later phase keeps exactly one
    /// buffered copy: the run output reader and the replayed reader resolve
    /// to the same sealed heap buffer.
    #[tokio::test]
    async fn shared_append_serves_output_and_replay_from_one_buffer() {
        let p0 = Producer::placeholder("x");
        let mean = Producer::preparable(Mean::new(), vec![p0.clone()]);
        let out = Producer::prepared(Sub::new(), vec![p0.clone(), mean]);
        // P0 is both a graph output and a later-round replay source.
        let dag = canonicalize(std::slice::from_ref(&p0), &[p0.clone(), out]).unwrap();

        let executor = BatchExecutor::default();
        let (run, _) = executor
            .run(&dag, &[f64s(&[1.0, 2.0, 3.0, 4.0])], true)
            .await
            .unwrap();
        let p0_index = run
            .dag
            .nodes()
            .iter()
            .position(|n| n.is_placeholder())
            .unwrap();
        let plan = &run.plans[p0_index];
        assert!(plan.needs_append);
        assert!(!plan.replays.is_empty());
        assert!(!plan.output_slots.is_empty());
        // One append buffer serves both consumers.
        let append = run.nodes[p0_index].append.as_ref().unwrap();
        let state = append.state.lock().await;
        assert!(state.reader.is_some());
    }

    #[tokio::test]
    async fn window_of_one_serializes_but_stays_correct() {
        let p0 = Producer::placeholder("x");
        let sum = Producer::prepared(Add::new(), vec![p0.clone(), p0.clone()]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[sum]).unwrap();

        let executor = BatchExecutor::new(BatchExecutorConfig {
            batch_size: 1,
            max_concurrent_batches: 1,
            max_threads: 1,
            ..Default::default()
        });
        let outputs = executor.apply(&dag, &[f64s(&[1.0, 2.0, 3.0])]).await.unwrap();
        assert_eq!(
            collect_reader(outputs[0].as_ref()).unwrap(),
            vec![Value::F64(2.0), Value::F64(4.0), Value::F64(6.0)]
        );
    }

    #[tokio::test]
    async fn empty_dataset_still_finishes_preparation() {
        let p0 = Producer::placeholder("x");
        let mean = Producer::preparable(Mean::new(), vec![p0.clone()]);
        let out = Producer::prepared(Sub::new(), vec![p0.clone(), mean]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();

        let executor = BatchExecutor::default();
        let result = executor.prepare(&dag, &[f64s(&[])], true).await.unwrap();
        let outputs = result.outputs.unwrap();
        assert_eq!(outputs[0].size64(), 0);
        // The preparer finished with no data: its prepared mean is 0.
        assert!(result.for_new_data.is_prepared());
    }

    #[tokio::test]
    async fn producer_failure_aborts_the_run() {
        use crate::graph::{ExecutionState, Signature, Transform};

        struct Explode;
        impl Transform for Explode {
            fn signature(&self) -> Signature {
                Signature::new("Explode")
            }
            fn apply(
                &self,
                _state: Option<&ExecutionState>,
                _inputs: &[Value],
            ) -> anyhow::Result<Value> {
                anyhow::bail!("boom")
            }
        }

        let p0 = Producer::placeholder("x");
        let bad = Producer::prepared(Arc::new(Explode), vec![p0.clone()]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[bad]).unwrap();

        let executor = BatchExecutor::default();
        let err = executor
            .apply(&dag, &[f64s(&[1.0, 2.0])])
            .await
            .err().unwrap();
        match err {
            ExecutionError::Failed { label, .. } => assert!(label.starts_with("Explode")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
