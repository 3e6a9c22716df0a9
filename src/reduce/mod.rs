//! Graph reduction: fixed-point rewriting over the canonical DAG.
//!
//! Reduction repeatedly walks the graph from its outputs, parents first, and
//! offers every producer to the standard rules plus whatever per-class rules
//! the producer's operation contributes, in declaration order. A producer
//! disconnected by one rule is not offered to the remaining rules. Passes
//! repeat until one runs with no modification; only then are real producer
//! instances rebuilt (copy-on-write) and the result re-canonicalized, so the
//! reduced graph carries fresh adjacency, phases, and fingerprint.
//!
//! Rules may not introduce placeholders, may not put a preparable back into a
//! prepared graph, and may not replace a viewed preparable with anything that
//! has no prepared form. [`ReductionContext`] enforces all three.

mod context;
mod rules;

pub use context::ReductionContext;
pub use rules::{CollapseIdempotent, ConstantFold, InlineNestedDag};

use crate::errors::GraphError;
use crate::graph::{canonicalize, DagStructure, Producer};
use crate::observability::messages::graph::ReductionPassCompleted;
use crate::observability::messages::StructuredLog;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How expensive a rewrite rule is allowed to be.
///
/// Configuring a level runs every rule at that level *or cheaper*.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReductionLevel {
    /// Always worth it: removes work from every later execution.
    Essential,
    /// Cheap enough for interactive use.
    Normal,
    /// Potentially slow analysis; batch preprocessing only.
    Expensive,
}

/// Reducer configuration. `minimum_level: None` disables reduction entirely.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReducerConfig {
    pub minimum_level: Option<ReductionLevel>,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        ReducerConfig {
            minimum_level: Some(ReductionLevel::Essential),
        }
    }
}

impl ReducerConfig {
    pub fn disabled() -> Self {
        ReducerConfig {
            minimum_level: None,
        }
    }
}

/// One rewrite rule.
pub trait GraphReducer: Send + Sync {
    fn name(&self) -> &'static str;

    fn level(&self) -> ReductionLevel;

    /// Inspects `target` (a producer currently in the working graph) and
    /// optionally rewrites it through the context.
    fn reduce(
        &self,
        target: &Arc<Producer>,
        ctx: &mut ReductionContext,
    ) -> Result<(), GraphError>;
}

/// Reduces `dag` to a fixed point under the configured level.
pub fn reduce(dag: &DagStructure, config: &ReducerConfig) -> Result<DagStructure, GraphError> {
    let Some(level) = config.minimum_level else {
        return Ok(dag.clone());
    };

    let standard: Vec<Arc<dyn GraphReducer>> = vec![
        Arc::new(ConstantFold),
        Arc::new(InlineNestedDag),
        Arc::new(CollapseIdempotent),
    ];

    let mut ctx = ReductionContext::new(dag);
    let mut pass = 0usize;
    loop {
        pass += 1;
        for output in ctx.outputs_snapshot() {
            reduce_producer(&output, &standard, level, &mut ctx)?;
        }
        let modified = ctx.take_modified();
        ReductionPassCompleted {
            pass,
            modifications: ctx.modifications(),
            fixed_point: !modified,
        }
        .log();
        ctx.end_pass();
        if !modified {
            break;
        }
    }

    let (placeholders, outputs) = ctx.instantiate();
    canonicalize(&placeholders, &outputs)
}

/// Depth-first visit: parents first, then the standard rules, then the
/// producer's own class rules. Each producer is visited at most once per
/// pass; producers spliced in by a rewrite are picked up in the same pass
/// when their children resolve them.
fn reduce_producer(
    producer: &Arc<Producer>,
    standard: &[Arc<dyn GraphReducer>],
    level: ReductionLevel,
    ctx: &mut ReductionContext,
) -> Result<(), GraphError> {
    let current = ctx.resolve(producer);
    if !ctx.mark_visited(current.handle()) {
        return Ok(());
    }

    for parent in ctx.current_parents(&current) {
        reduce_producer(&parent, standard, level, ctx)?;
    }

    let class_rules = current.graph_reducers();
    for rule in standard.iter().chain(class_rules.iter()) {
        if rule.level() > level {
            continue;
        }
        if !ctx.is_current(&current) {
            // A previous rule disconnected this producer.
            break;
        }
        rule.reduce(&current, ctx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::examples::arithmetic::{Add, Sub};
    use crate::examples::stats::Mean;
    use crate::examples::vector::Densify;
    use crate::graph::{
        Constant, NestedDag, Observe, Producer, Signature, Transform, Value,
    };
    use std::sync::Arc;

    fn essential() -> ReducerConfig {
        ReducerConfig::default()
    }

    #[test]
    fn disabled_reduction_is_identity() {
        let p0 = Producer::placeholder("x");
        let out = Producer::prepared(
            Add::new(),
            vec![Constant::producer(Value::I64(1)), Constant::producer(Value::I64(2))],
        );
        let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();
        let untouched = reduce(&dag, &ReducerConfig::disabled()).unwrap();
        assert!(dag.fingerprint_eq(&untouched));
    }

    #[test]
    fn constants_fold_transitively() {
        // Add(Add(1, 2), 4) -> Const(7), folding the inner node first.
        let p0 = Producer::placeholder("x");
        let inner = Producer::prepared(
            Add::new(),
            vec![Constant::producer(Value::I64(1)), Constant::producer(Value::I64(2))],
        );
        let out = Producer::prepared(Add::new(), vec![inner, Constant::producer(Value::I64(4))]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();

        let reduced = reduce(&dag, &essential()).unwrap();
        let out_node = reduced.node(reduced.output_indices()[0]);
        assert_eq!(out_node.class_name(), "Constant");
        assert_eq!(out_node.generate_op().unwrap().generate(0), Value::I64(7));
    }

    #[test]
    fn placeholders_block_folding() {
        let p0 = Producer::placeholder("x");
        let out = Producer::prepared(
            Add::new(),
            vec![p0.clone(), Constant::producer(Value::I64(2))],
        );
        let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();
        let reduced = reduce(&dag, &essential()).unwrap();
        assert_eq!(
            reduced.node(reduced.output_indices()[0]).class_name(),
            "Add"
        );
    }

    #[test]
    fn idempotent_preparable_with_constant_inputs_folds() {
        let p0 = Producer::placeholder("x");
        let mean = Producer::preparable(Mean::new(), vec![Constant::producer(Value::F64(2.0))]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[mean]).unwrap();

        let reduced = reduce(&dag, &essential()).unwrap();
        let out_node = reduced.node(reduced.output_indices()[0]);
        assert_eq!(out_node.class_name(), "Constant");
        assert_eq!(out_node.generate_op().unwrap().generate(0), Value::F64(2.0));
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

    #[test]
    fn viewed_preparable_folds_through_the_view() {
        let p0 = Producer::placeholder("x");
        let mean = Producer::preparable(Mean::new(), vec![Constant::producer(Value::F64(3.0))]);
        let view = Producer::view(Arc::new(ReadPrepared), mean);
        let dag = canonicalize(std::slice::from_ref(&p0), &[view]).unwrap();

        let reduced = reduce(&dag, &essential()).unwrap();
        // The view resolved against the trivially-preparable wrapper, and
        // the wrapper itself folded away once unviewed.
        let out_node = reduced.node(reduced.output_indices()[0]);
        assert_eq!(out_node.class_name(), "Constant");
        assert_eq!(out_node.generate_op().unwrap().generate(0), Value::F64(3.0));
        assert!(reduced.is_prepared());
    }

    #[test]
    fn densify_chain_collapses() {
        let p0 = Producer::placeholder("v");
        let inner = Producer::preparable(Densify::new(), vec![p0.clone()]);
        let outer = Producer::preparable(Densify::new(), vec![inner]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[outer]).unwrap();

        let reduced = reduce(&dag, &essential()).unwrap();
        let densifies = reduced
            .nodes()
            .iter()
            .filter(|n| n.class_name() == "Densify")
            .count();
        assert_eq!(densifies, 1);
    }

    #[test]
    fn multi_output_nested_dag_wraps_in_a_tuple() {
        let q0 = Producer::placeholder("q0");
        let q1 = Producer::placeholder("q1");
        let sum = Producer::prepared(Add::new(), vec![q0.clone(), q1.clone()]);
        let diff = Producer::prepared(Sub::new(), vec![q0.clone(), q1.clone()]);
        let inner = canonicalize(&[q0, q1], &[sum, diff]).unwrap();

        let p0 = Producer::placeholder("x");
        let p1 = Producer::placeholder("y");
        let nested = Producer::prepared(
            NestedDag::new(inner).unwrap(),
            vec![p0.clone(), p1.clone()],
        );
        let dag = canonicalize(&[p0, p1], &[nested]).unwrap();

        let reduced = reduce(&dag, &essential()).unwrap();
        let out_node = reduced.node(reduced.output_indices()[0]);
        assert_eq!(out_node.class_name(), "Tupled");
        assert_eq!(out_node.inputs().len(), 2);
        assert!(reduced.nodes().iter().all(|n| n.class_name() != "NestedDag"));
    }

    /// Per-class rules from `graph_reducers()` run after the standard rules.
    #[test]
    fn class_table_rules_participate() {
        use crate::graph::ExecutionState;

        struct StripWrapper;
        impl GraphReducer for StripWrapper {
            fn name(&self) -> &'static str {
                "strip-wrapper"
            }
            fn level(&self) -> ReductionLevel {
                ReductionLevel::Essential
            }
            fn reduce(
                &self,
                target: &Arc<Producer>,
                ctx: &mut ReductionContext,
            ) -> Result<(), crate::errors::GraphError> {
                let parents = ctx.current_parents(target);
                if let [parent] = parents.as_slice() {
                    ctx.replace(target, parent.clone())?;
                }
                Ok(())
            }
        }

        struct Wrapper;
        impl Transform for Wrapper {
            fn signature(&self) -> Signature {
                Signature::new("Wrapper")
            }
            fn apply(
                &self,
                _state: Option<&ExecutionState>,
                inputs: &[Value],
            ) -> anyhow::Result<Value> {
                Ok(inputs[0].clone())
            }
            fn graph_reducers(&self) -> Vec<Arc<dyn GraphReducer>> {
                vec![Arc::new(StripWrapper)]
            }
        }

        let p0 = Producer::placeholder("x");
        let wrapped = Producer::prepared(Arc::new(Wrapper), vec![p0.clone()]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[wrapped]).unwrap();

        let reduced = reduce(&dag, &essential()).unwrap();
        assert!(reduced
            .node(reduced.output_indices()[0])
            .is_placeholder());
    }

    #[test]
    fn replace_may_not_introduce_new_placeholders() {
        let p0 = Producer::placeholder("x");
        let out = Producer::prepared(Add::new(), vec![p0.clone(), p0.clone()]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[out.clone()]).unwrap();

        let mut ctx = ReductionContext::new(&dag);
        let target = dag.node(dag.output_indices()[0]).clone();
        let stray = Producer::placeholder("stray");
        let err = ctx.replace(&target, stray).unwrap_err();
        assert!(matches!(err, crate::errors::GraphError::PlaceholderIntroduced(_)));
    }

    #[test]
    fn replace_may_not_reintroduce_preparables_into_a_prepared_graph() {
        let p0 = Producer::placeholder("x");
        let out = Producer::prepared(Add::new(), vec![p0.clone(), p0.clone()]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();
        assert!(dag.is_prepared());

        let mut ctx = ReductionContext::new(&dag);
        let target = dag.node(dag.output_indices()[0]).clone();
        let preparable = Producer::preparable(Mean::new(), vec![p0.clone()]);
        let err = ctx.replace(&target, preparable).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::GraphError::PreparableIntroduced(_)
        ));
    }

    #[test]
    fn viewed_producers_only_accept_preparable_replacements() {
        let p0 = Producer::placeholder("x");
        let mean = Producer::preparable(Mean::new(), vec![p0.clone()]);
        let view = Producer::view(Arc::new(ReadPrepared), mean.clone());
        let dag = canonicalize(std::slice::from_ref(&p0), &[view]).unwrap();

        let mut ctx = ReductionContext::new(&dag);
        let mean_node = dag
            .nodes()
            .iter()
            .find(|n| n.class_name() == "Mean")
            .unwrap()
            .clone();
        assert!(ctx.is_viewed(&mean_node));
        let err = ctx
            .replace(&mean_node, Constant::producer(Value::F64(0.0)))
            .unwrap_err();
        assert!(matches!(err, crate::errors::GraphError::ViewedReplacement(_)));
        // The non-failing variant declines quietly.
        assert!(!ctx
            .try_replace_unviewed(&mean_node, Constant::producer(Value::F64(0.0)))
            .unwrap());
    }
}
