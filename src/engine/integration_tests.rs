// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! End-to-end scenarios across canonicalization, reduction, and all three
//! executors, plus the executor-equivalence properties.

use crate::engine::{
    BatchExecutor, BatchExecutorConfig, DagExecutor, FastExecutor, FastExecutorConfig,
    PreparationResult, ReferenceExecutor,
};
use crate::examples::arithmetic::{Add, Mul, Sub};
use crate::examples::stats::Mean;
use crate::examples::vector::Densify;
use crate::graph::{
    canonicalize, Constant, DagStructure, NestedDag, Observe, Producer, Signature, Transform,
    Value,
};
use crate::io::{collect_reader, ObjectReader, VecReader};
use crate::reduce::{reduce, ReducerConfig};
use proptest::prelude::*;
use std::sync::Arc;

fn reader_of(values: Vec<Value>) -> Arc<dyn ObjectReader> {
    Arc::new(VecReader::new(values))
}

fn f64s(values: &[f64]) -> Arc<dyn ObjectReader> {
    reader_of(values.iter().map(|&v| Value::F64(v)).collect())
}

fn read_all(reader: &Arc<dyn ObjectReader>) -> Vec<Value> {
    collect_reader(reader.as_ref()).unwrap()
}

async fn run_both(
    dag: &DagStructure,
    inputs: &[Arc<dyn ObjectReader>],
) -> (PreparationResult, PreparationResult) {
    let reference = ReferenceExecutor::new()
        .prepare(dag, inputs, true)
        .await
        .unwrap();
    let batch = BatchExecutor::new(BatchExecutorConfig {
        batch_size: 3,
        ..Default::default()
    })
    .prepare(dag, inputs, true)
    .await
    .unwrap();
    (reference, batch)
}

/// Scenario: constant folding. `Add(Const(3), Const(4))` reduces to a single
/// `Const(7)` output and executes as a constant column.
#[tokio::test]
async fn constant_fold_end_to_end() {
    let p0 = Producer::placeholder("unused");
    let out = Producer::prepared(
        Add::new(),
        vec![Constant::producer(Value::I64(3)), Constant::producer(Value::I64(4))],
    );
    let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();

    let reduced = reduce(&dag, &ReducerConfig::default()).unwrap();
    let output_node = reduced.node(reduced.output_indices()[0]);
    assert_eq!(output_node.class_name(), "Constant");
    assert!(reduced.is_always_constant());

    let inputs = vec![reader_of(vec![Value::Null, Value::Null])];
    let (reference, batch) = run_both(&reduced, &inputs).await;
    let expected = vec![Value::I64(7), Value::I64(7)];
    assert_eq!(read_all(&reference.outputs.unwrap()[0]), expected);
    assert_eq!(read_all(&batch.outputs.unwrap()[0]), expected);
}

/// Scenario: idempotent collapse. `Densify(Densify(P0))` reduces to a single
/// densify and produces per-row dense vectors.
#[tokio::test]
async fn idempotent_collapse_end_to_end() {
    let p0 = Producer::placeholder("v");
    let inner = Producer::preparable(Densify::new(), vec![p0.clone()]);
    let outer = Producer::preparable(Densify::new(), vec![inner]);
    let dag = canonicalize(std::slice::from_ref(&p0), &[outer]).unwrap();

    let reduced = reduce(&dag, &ReducerConfig::default()).unwrap();
    let densifies = reduced
        .nodes()
        .iter()
        .filter(|n| n.class_name() == "Densify")
        .count();
    assert_eq!(densifies, 1);

    let inputs = vec![reader_of(vec![
        Value::sparse([(0, 1.0)]),
        Value::sparse([(2, 3.0)]),
    ])];
    let (reference, batch) = run_both(&reduced, &inputs).await;
    let expected = vec![
        Value::dense(vec![1.0]),
        Value::dense(vec![0.0, 0.0, 3.0]),
    ];
    assert_eq!(read_all(&reference.outputs.unwrap()[0]), expected);
    assert_eq!(read_all(&batch.outputs.unwrap()[0]), expected);
}

/// Scenario: two-phase preparation. `Sub(P0, Mean(P0))` centers the data,
/// and the prepared graph applies the learned mean to unseen rows.
#[tokio::test]
async fn two_phase_preparation_end_to_end() {
    let p0 = Producer::placeholder("x");
    let mean = Producer::preparable(Mean::new(), vec![p0.clone()]);
    let out = Producer::prepared(Sub::new(), vec![p0.clone(), mean]);
    let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();

    let inputs = vec![f64s(&[1.0, 2.0, 3.0, 4.0])];
    let (reference, batch) = run_both(&dag, &inputs).await;

    let expected = vec![
        Value::F64(-1.5),
        Value::F64(-0.5),
        Value::F64(0.5),
        Value::F64(1.5),
    ];
    assert_eq!(read_all(&reference.outputs.as_ref().unwrap()[0]), expected);
    assert_eq!(read_all(&batch.outputs.as_ref().unwrap()[0]), expected);

    // The prepared graph generalizes: mean stays 2.5.
    let prepared = reference.for_new_data;
    assert!(prepared.is_prepared());
    let applied = FastExecutor::default()
        .apply(&prepared, &[f64s(&[10.0])])
        .unwrap();
    assert_eq!(read_all(&applied[0]), vec![Value::F64(7.5)]);
}

struct ReadPrepared;

impl Observe for ReadPrepared {
    fn signature(&self) -> Signature {
        Signature::new("ReadPrepared")
    }

    fn observe(&self, prepared: &dyn Transform) -> anyhow::Result<Value> {
        prepared.apply(None, &[Value::Null])
    }
}

/// Scenario: view. The view broadcasts the learned mean over the training
/// set, and the prepared graph replaces it with a constant.
#[tokio::test]
async fn view_broadcast_end_to_end() {
    let p0 = Producer::placeholder("x");
    let mean = Producer::preparable(Mean::new(), vec![p0.clone()]);
    let view = Producer::view(Arc::new(ReadPrepared), mean);
    let dag = canonicalize(std::slice::from_ref(&p0), &[view]).unwrap();

    let inputs = vec![f64s(&[1.0, 2.0, 3.0, 4.0])];
    let (reference, batch) = run_both(&dag, &inputs).await;

    let expected = vec![Value::F64(2.5); 4];
    assert_eq!(read_all(&reference.outputs.as_ref().unwrap()[0]), expected);
    assert_eq!(read_all(&batch.outputs.as_ref().unwrap()[0]), expected);

    // In the prepared graph the view has become Const(2.5).
    let prepared = batch.for_new_data;
    let out_node = prepared.node(prepared.output_indices()[0]);
    assert_eq!(out_node.class_name(), "Constant");
    assert_eq!(
        out_node.generate_op().unwrap().generate(0),
        Value::F64(2.5)
    );
}

/// Scenario: sub-DAG inlining. An embedded `Q0 + Q1` graph applied to
/// `(P0, Const(5))` splices into `Add(P0, Const(5))`.
#[tokio::test]
async fn nested_dag_inlines_end_to_end() {
    let q0 = Producer::placeholder("q0");
    let q1 = Producer::placeholder("q1");
    let inner_out = Producer::prepared(Add::new(), vec![q0.clone(), q1.clone()]);
    let inner = canonicalize(&[q0, q1], &[inner_out]).unwrap();

    let p0 = Producer::placeholder("x");
    let nested = Producer::prepared(
        NestedDag::new(inner).unwrap(),
        vec![p0.clone(), Constant::producer(Value::I64(5))],
    );
    let dag = canonicalize(std::slice::from_ref(&p0), &[nested]).unwrap();

    let reduced = reduce(&dag, &ReducerConfig::default()).unwrap();
    let out_node = reduced.node(reduced.output_indices()[0]);
    assert_eq!(out_node.class_name(), "Add");
    assert!(reduced.nodes().iter().all(|n| n.class_name() != "NestedDag"));

    let inputs = vec![reader_of(vec![Value::I64(1), Value::I64(2)])];
    let (reference, batch) = run_both(&reduced, &inputs).await;
    let expected = vec![Value::I64(6), Value::I64(7)];
    assert_eq!(read_all(&reference.outputs.unwrap()[0]), expected);
    assert_eq!(read_all(&batch.outputs.unwrap()[0]), expected);
}

/// An always-constant graph produces identical values on every row.
#[tokio::test]
async fn always_constant_graphs_repeat_one_value() {
    let p0 = Producer::placeholder("x");
    let out = Producer::prepared(
        Mul::new(),
        vec![Constant::producer(Value::F64(1.5)), Constant::producer(Value::F64(2.0))],
    );
    let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();
    assert!(dag.is_always_constant());

    let outputs = BatchExecutor::default()
        .apply(&dag, &[f64s(&[9.0, 8.0, 7.0])])
        .await
        .unwrap();
    let values = read_all(&outputs[0]);
    assert!(values.windows(2).all(|w| w[0] == w[1]));
}

/// Reduction is a fixed point: reducing the reduced graph changes nothing.
#[tokio::test]
async fn reduction_reaches_a_fixed_point() {
    let p0 = Producer::placeholder("x");
    let graphs: Vec<DagStructure> = vec![
        {
            let out = Producer::prepared(
                Add::new(),
                vec![Constant::producer(Value::I64(3)), Constant::producer(Value::I64(4))],
            );
            canonicalize(std::slice::from_ref(&p0), &[out]).unwrap()
        },
        {
            let inner = Producer::preparable(Densify::new(), vec![p0.clone()]);
            let outer = Producer::preparable(Densify::new(), vec![inner]);
            canonicalize(std::slice::from_ref(&p0), &[outer]).unwrap()
        },
        {
            let mean = Producer::preparable(Mean::new(), vec![p0.clone()]);
            let out = Producer::prepared(Sub::new(), vec![p0.clone(), mean]);
            canonicalize(std::slice::from_ref(&p0), &[out]).unwrap()
        },
    ];
    let config = ReducerConfig::default();
    for dag in graphs {
        let once = reduce(&dag, &config).unwrap();
        let twice = reduce(&once, &config).unwrap();
        assert!(once.fingerprint_eq(&twice));
    }
}

/// Input readers disagreeing on length are rejected before any work starts.
#[tokio::test]
async fn mismatched_input_sizes_are_rejected() {
    use crate::errors::ExecutionError;

    let p0 = Producer::placeholder("a");
    let p1 = Producer::placeholder("b");
    let out = Producer::prepared(Add::new(), vec![p0.clone(), p1.clone()]);
    let dag = canonicalize(&[p0, p1], &[out]).unwrap();

    let inputs = vec![f64s(&[1.0, 2.0]), f64s(&[1.0, 2.0, 3.0])];
    let err = BatchExecutor::default()
        .prepare(&dag, &inputs, true)
        .await
        .err().unwrap();
    assert!(matches!(err, ExecutionError::ShapeMismatch { .. }));

    let err = ReferenceExecutor::new()
        .prepare(&dag, &inputs, true)
        .await
        .err().unwrap();
    assert!(matches!(err, ExecutionError::ShapeMismatch { .. }));
}

// ---------------------------------------------------------------------------
// Property-based executor equivalence
// ---------------------------------------------------------------------------

/// Arithmetic expression over two placeholders and literal constants.
#[derive(Clone, Debug)]
enum Expr {
    P0,
    P1,
    Lit(i64),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
}

fn expr_strategy() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        Just(Expr::P0),
        Just(Expr::P1),
        (-10i64..10).prop_map(Expr::Lit),
    ];
    leaf.prop_recursive(3, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| Expr::Add(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| Expr::Sub(Box::new(a), Box::new(b))),
            (inner.clone(), inner).prop_map(|(a, b)| Expr::Mul(Box::new(a), Box::new(b))),
        ]
    })
}

fn build(expr: &Expr, p0: &Arc<Producer>, p1: &Arc<Producer>) -> Arc<Producer> {
    match expr {
        Expr::P0 => p0.clone(),
        Expr::P1 => p1.clone(),
        Expr::Lit(v) => Constant::producer(Value::I64(*v)),
        Expr::Add(a, b) => {
            Producer::prepared(Add::new(), vec![build(a, p0, p1), build(b, p0, p1)])
        }
        Expr::Sub(a, b) => {
            Producer::prepared(Sub::new(), vec![build(a, p0, p1), build(b, p0, p1)])
        }
        Expr::Mul(a, b) => {
            Producer::prepared(Mul::new(), vec![build(a, p0, p1), build(b, p0, p1)])
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// The batched executor agrees with the reference oracle element-wise,
    /// for any expression shape, dataset, and batch size.
    #[test]
    fn batch_matches_reference(
        expr in expr_strategy(),
        data in prop::collection::vec((-50i64..50, -50i64..50), 0..40),
        batch_size in 1usize..9,
        window in 1usize..5,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .build()
            .unwrap();
        runtime.block_on(async {
            let p0 = Producer::placeholder("a");
            let p1 = Producer::placeholder("b");
            let out = build(&expr, &p0, &p1);
            let dag = canonicalize(&[p0, p1], &[out]).unwrap();

            let col0: Vec<Value> = data.iter().map(|&(a, _)| Value::I64(a)).collect();
            let col1: Vec<Value> = data.iter().map(|&(_, b)| Value::I64(b)).collect();
            let inputs = vec![reader_of(col0), reader_of(col1)];

            let reference = ReferenceExecutor::new()
                .prepare(&dag, &inputs, true)
                .await
                .unwrap();
            let batch = BatchExecutor::new(BatchExecutorConfig {
                batch_size,
                max_concurrent_batches: window,
                ..Default::default()
            })
            .prepare(&dag, &inputs, true)
            .await
            .unwrap();

            let expected = read_all(&reference.outputs.unwrap()[0]);
            let actual = read_all(&batch.outputs.unwrap()[0]);
            assert_eq!(expected, actual);
        });
    }

    /// Row-wise application of the prepared graph reproduces the bulk run.
    #[test]
    fn prepared_graph_reproduces_bulk_rows(
        data in prop::collection::vec(-100.0f64..100.0, 1..24),
        batch_size in 1usize..7,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .build()
            .unwrap();
        runtime.block_on(async {
            let p0 = Producer::placeholder("x");
            let mean = Producer::preparable(Mean::new(), vec![p0.clone()]);
            let out = Producer::prepared(Sub::new(), vec![p0.clone(), mean]);
            let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();

            let inputs = vec![f64s(&data)];
            let result = BatchExecutor::new(BatchExecutorConfig {
                batch_size,
                ..Default::default()
            })
            .prepare(&dag, &inputs, true)
            .await
            .unwrap();
            let bulk = read_all(&result.outputs.as_ref().unwrap()[0]);

            let fast = FastExecutor::new(FastExecutorConfig::default());
            for (row, value) in data.iter().enumerate() {
                let single = fast
                    .apply(&result.for_preparation_data, &[f64s(&[*value])])
                    .unwrap();
                assert_eq!(read_all(&single[0]), vec![bulk[row].clone()]);
            }
        });
    }
}
