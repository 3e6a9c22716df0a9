//! The engine's standard rewrite rules.
//!
//! All three are [`ReductionLevel::Essential`]: they remove work from every
//! later execution and never trade time for quality.
//!
//! * [`ConstantFold`] — evaluates producers whose inputs (or declarations)
//!   pin their output, including idempotent preparables, two-valued constant
//!   results, and views over folded preparables.
//! * [`InlineNestedDag`] — splices an embedded prepared graph into the
//!   enclosing one.
//! * [`CollapseIdempotent`] — drops one layer of a self-idempotent class
//!   applied to itself.

use super::context::ReductionContext;
use super::{GraphReducer, ReductionLevel};
use crate::errors::GraphError;
use crate::graph::{
    Constant, ConstantResult, FixedPreparable, Producer, ProducerHandle, ProducerKind, Tupled,
    Value,
};
use crate::io::{ObjectReader, VecReader};
use std::collections::HashMap;
use std::sync::Arc;

/// The constant value a producer contributes to its children, split by data
/// role, or `None` when the producer is not (yet) a constant.
fn constant_value(producer: &Arc<Producer>) -> Option<(Value, Value)> {
    match producer.kind() {
        ProducerKind::Generator(op) => {
            let sig = op.signature();
            (sig.class == "Constant").then(|| {
                let v = sig.params.first().cloned().unwrap_or(Value::Null);
                (v.clone(), v)
            })
        }
        ProducerKind::Prepared { op, .. } => {
            let sig = op.signature();
            (sig.class == "ConstantResult").then(|| {
                let new = sig.params.first().cloned().unwrap_or(Value::Null);
                let prep = sig.params.get(1).cloned().unwrap_or(Value::Null);
                (new, prep)
            })
        }
        _ => None,
    }
}

/// Constant folding.
pub struct ConstantFold;

impl GraphReducer for ConstantFold {
    fn name(&self) -> &'static str {
        "constant-fold"
    }

    fn level(&self) -> ReductionLevel {
        ReductionLevel::Essential
    }

    fn reduce(
        &self,
        target: &Arc<Producer>,
        ctx: &mut ReductionContext,
    ) -> Result<(), GraphError> {
        match target.kind() {
            ProducerKind::Generator(op) => {
                if op.always_constant() && op.signature().class != "Constant" {
                    ctx.replace(target, Constant::producer(op.generate(0)))?;
                }
                Ok(())
            }
            ProducerKind::Prepared { op, .. } => {
                let sig = op.signature();
                if sig.class == "ConstantResult" {
                    // Two-valued results collapse only when both roles agree.
                    let new = sig.params.first().cloned().unwrap_or(Value::Null);
                    let prep = sig.params.get(1).cloned().unwrap_or(Value::Null);
                    if new == prep {
                        ctx.replace(target, Constant::producer(new))?;
                    }
                    return Ok(());
                }

                let parents = ctx.current_parents(target);
                if op.always_constant() {
                    let nulls = vec![Value::Null; parents.len()];
                    match op.apply(None, &nulls) {
                        Ok(value) => ctx.replace(target, Constant::producer(value))?,
                        Err(e) => {
                            tracing::debug!(
                                producer = %target.label(),
                                error = %e,
                                "constant-declared transformer failed to fold"
                            );
                        }
                    }
                    return Ok(());
                }

                if parents.is_empty() {
                    // Nothing pins a 0-arity transformer's output; it may be
                    // nondeterministic, so it is left alone.
                    return Ok(());
                }
                let Some(rows) = constant_rows(&parents) else {
                    return Ok(());
                };
                let (row_new, row_prep) = rows;
                let (new, prep) = match (op.apply(None, &row_new), op.apply(None, &row_prep)) {
                    (Ok(a), Ok(b)) => (a, b),
                    _ => return Ok(()),
                };
                if new == prep {
                    ctx.replace(target, Constant::producer(new))?;
                } else {
                    ctx.replace(
                        target,
                        Producer::prepared(ConstantResult::new(new, prep), vec![]),
                    )?;
                }
                Ok(())
            }
            ProducerKind::Preparable { op, .. } => {
                if !op.idempotent_preparer() {
                    return Ok(());
                }
                if op.as_fixed().is_some() {
                    // Already wrapped on an earlier pass; views still pin it.
                    if ctx.is_viewed(target) {
                        return Ok(());
                    }
                }
                let parents = ctx.current_parents(target);
                let Some((row_new, row_prep)) = constant_rows(&parents) else {
                    return Ok(());
                };

                // Prepare over the single constant row the training data
                // collapses to.
                let mut preparer = op.preparer();
                if preparer.process(&row_prep).is_err() {
                    return Ok(());
                }
                let replay: Arc<dyn ObjectReader> =
                    Arc::new(VecReader::new(vec![Value::list(row_prep.clone())]));
                let Ok(pair) = preparer.finish(Some(replay)) else {
                    return Ok(());
                };

                if ctx.is_viewed(target) {
                    // Keep the preparable shape for the views; just make it
                    // trivial to prepare.
                    ctx.replace(
                        target,
                        Producer::preparable(FixedPreparable::new(pair), parents),
                    )?;
                    return Ok(());
                }

                let applied = (
                    pair.for_new_data.apply(None, &row_new),
                    pair.for_preparation_data.apply(None, &row_prep),
                );
                let (new, prep) = match applied {
                    (Ok(a), Ok(b)) => (a, b),
                    _ => return Ok(()),
                };
                if new == prep {
                    ctx.replace(target, Constant::producer(new))?;
                } else {
                    ctx.replace(
                        target,
                        Producer::prepared(ConstantResult::new(new, prep), vec![]),
                    )?;
                }
                Ok(())
            }
            ProducerKind::View { op, .. } => {
                let parents = ctx.current_parents(target);
                let [parent] = parents.as_slice() else {
                    return Ok(());
                };
                let Some(fixed) = parent.prepare_op().and_then(|p| {
                    p.as_fixed().map(|f| f.pair().clone())
                }) else {
                    return Ok(());
                };
                let observed = (
                    op.observe(fixed.for_new_data.as_ref()),
                    op.observe(fixed.for_preparation_data.as_ref()),
                );
                let (new, prep) = match observed {
                    (Ok(a), Ok(b)) => (a, b),
                    _ => return Ok(()),
                };
                if new == prep {
                    ctx.replace(target, Constant::producer(new))?;
                } else {
                    ctx.replace(
                        target,
                        Producer::prepared(ConstantResult::new(new, prep), vec![]),
                    )?;
                }
                Ok(())
            }
            ProducerKind::Placeholder { .. } => Ok(()),
        }
    }
}

/// Both constant rows (new-data and preparation-data roles) over the parent
/// list, or `None` when any parent is not constant.
fn constant_rows(parents: &[Arc<Producer>]) -> Option<(Vec<Value>, Vec<Value>)> {
    let mut row_new = Vec::with_capacity(parents.len());
    let mut row_prep = Vec::with_capacity(parents.len());
    for parent in parents {
        let (new, prep) = constant_value(parent)?;
        row_new.push(new);
        row_prep.push(prep);
    }
    Some((row_new, row_prep))
}

/// Embedded-DAG inlining.
pub struct InlineNestedDag;

impl GraphReducer for InlineNestedDag {
    fn name(&self) -> &'static str {
        "inline-nested-dag"
    }

    fn level(&self) -> ReductionLevel {
        ReductionLevel::Essential
    }

    fn reduce(
        &self,
        target: &Arc<Producer>,
        ctx: &mut ReductionContext,
    ) -> Result<(), GraphError> {
        let ProducerKind::Prepared { op, .. } = target.kind() else {
            return Ok(());
        };
        let Some(nested) = op.as_nested() else {
            return Ok(());
        };
        if ctx.is_viewed(target) {
            return Ok(());
        }

        let inner = nested.dag();
        let parents = ctx.current_parents(target);
        if parents.len() != inner.placeholders().len() {
            return Ok(());
        }

        // Substitute the embedded placeholders with the actual parents and
        // splice the rebuilt outputs in place of the wrapper.
        let mut memo: HashMap<ProducerHandle, Arc<Producer>> = inner
            .placeholders()
            .iter()
            .zip(parents.iter())
            .map(|(ph, parent)| (ph.handle(), parent.clone()))
            .collect();
        let rebuilt: Vec<Arc<Producer>> = inner
            .outputs()
            .iter()
            .map(|o| crate::graph::substitute_tree(o, &mut memo))
            .collect();

        let replacement = match <[Arc<Producer>; 1]>::try_from(rebuilt) {
            Ok([single]) => single,
            Err(many) => Producer::prepared(Tupled::new(many.len()), many),
        };
        ctx.replace(target, replacement)
    }
}

/// Idempotent-class collapsing.
pub struct CollapseIdempotent;

impl GraphReducer for CollapseIdempotent {
    fn name(&self) -> &'static str {
        "collapse-idempotent"
    }

    fn level(&self) -> ReductionLevel {
        ReductionLevel::Essential
    }

    fn reduce(
        &self,
        target: &Arc<Producer>,
        ctx: &mut ReductionContext,
    ) -> Result<(), GraphError> {
        let (class, self_idempotent) = match target.kind() {
            ProducerKind::Prepared { op, .. } => (op.signature().class, op.self_idempotent()),
            ProducerKind::Preparable { op, .. } => (op.signature().class, op.self_idempotent()),
            _ => return Ok(()),
        };
        if !self_idempotent {
            return Ok(());
        }
        let parents = ctx.current_parents(target);
        let [parent] = parents.as_slice() else {
            return Ok(());
        };
        let same_kind = matches!(
            (target.kind(), parent.kind()),
            (ProducerKind::Prepared { .. }, ProducerKind::Prepared { .. })
                | (ProducerKind::Preparable { .. }, ProducerKind::Preparable { .. })
        );
        if same_kind && parent.class_name() == class {
            ctx.replace(target, parent.clone())?;
        }
        Ok(())
    }
}
