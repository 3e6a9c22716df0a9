// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The producer model: vertices of the dataflow graph.
//!
//! A [`Producer`] is an immutable tree node pairing a unique
//! [`ProducerHandle`] with one of five kinds:
//!
//! * **Placeholder** — a per-example input slot, equal only to itself (its
//!   positional twin, used inside equality fingerprints, is equal by index).
//! * **Generator** — a root that deterministically maps a 64-bit example
//!   index to a value.
//! * **Prepared transformer** — applies a pure function over its parents'
//!   values, optionally with a per-run execution state.
//! * **Preparable transformer** — trainable: yields a [`Preparer`] that sees
//!   every training example and then emits a prepared transformer pair.
//! * **View** — observes the prepared form of its (preparable) parent and
//!   broadcasts a constant.
//!
//! The transformer-specific behavior lives behind the capability traits
//! ([`Generate`], [`Transform`], [`Prepare`], [`Observe`]); the engine only
//! ever talks to those. Value equality is driven by [`Signature`]s — a class
//! name plus the parameter values that distinguish instances of the class —
//! so deduplication never depends on pointer identity.

use super::fingerprint::Fingerprint;
use super::handle::ProducerHandle;
use super::nested::NestedDag;
use super::value::Value;
use crate::errors::ValidationError;
use crate::io::ObjectReader;
use crate::reduce::GraphReducer;
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Per-run mutable scratch owned by a single prepared transformer.
pub type ExecutionState = dyn Any + Send + Sync;

/// Value-equality key of a transformer: class name, distinguishing parameter
/// values, and (for DAG-valued transformers) the embedded graph fingerprint.
#[derive(Clone, Debug)]
pub struct Signature {
    pub class: &'static str,
    pub params: Vec<Value>,
    pub nested: Option<Fingerprint>,
}

impl Signature {
    pub fn new(class: &'static str) -> Self {
        Signature {
            class,
            params: Vec::new(),
            nested: None,
        }
    }

    pub fn with_params(class: &'static str, params: Vec<Value>) -> Self {
        Signature {
            class,
            params,
            nested: None,
        }
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.params == other.params && self.nested == other.nested
    }
}

impl Hash for Signature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class.hash(state);
        self.params.hash(state);
        if let Some(fp) = &self.nested {
            fp.hash(state);
        }
    }
}

/// Whether a preparer needs its training inputs replayed at `finish` time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreparerMode {
    /// One streaming pass over `process` suffices.
    Stream,
    /// `finish` additionally needs a replayable reader over all inputs.
    Batch,
}

/// The two prepared forms a preparer emits. They are often the same
/// transformer; when they differ, `for_preparation_data` is applied to the
/// training inputs while `for_new_data` is what the prepared graph exposes
/// for inference.
#[derive(Clone)]
pub struct PreparedPair {
    pub for_new_data: Arc<dyn Transform>,
    pub for_preparation_data: Arc<dyn Transform>,
}

impl PreparedPair {
    /// Both roles served by one transformer.
    pub fn shared(transform: Arc<dyn Transform>) -> Self {
        PreparedPair {
            for_new_data: transform.clone(),
            for_preparation_data: transform,
        }
    }
}

/// Root capability: deterministic index-to-value generation.
pub trait Generate: Send + Sync {
    fn signature(&self) -> Signature;

    fn generate(&self, index: u64) -> Value;

    /// Same value for every index.
    fn always_constant(&self) -> bool {
        false
    }

    /// Interning tiebreaker: among value-equal producers the highest
    /// specificity wins, so the most-derived instance stays canonical.
    fn specificity(&self) -> u32 {
        0
    }

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Capability of a prepared (non-trainable) transformer.
pub trait Transform: Send + Sync {
    fn signature(&self) -> Signature;

    /// Applies the transformer to one example. `inputs` holds one value per
    /// parent, in parent order.
    fn apply(&self, state: Option<&ExecutionState>, inputs: &[Value]) -> anyhow::Result<Value>;

    /// Bulk application over a minibatch. `columns` is column-major:
    /// `columns[parent][row]`. The default implementation loops rows through
    /// [`Transform::apply`]; override for vectorized kernels.
    fn apply_all(
        &self,
        state: Option<&ExecutionState>,
        columns: &[&[Value]],
        rows: usize,
        out: &mut Vec<Value>,
    ) -> anyhow::Result<()> {
        let mut args: Vec<Value> = Vec::with_capacity(columns.len());
        for row in 0..rows {
            args.clear();
            args.extend(columns.iter().map(|c| c[row].clone()));
            out.push(self.apply(state, &args)?);
        }
        Ok(())
    }

    /// Upper bound on rows per `apply_all` call the transformer prefers.
    fn preferred_minibatch_size(&self) -> usize {
        1
    }

    /// Optional per-run scratch, created once per (node, run).
    fn new_execution_state(&self) -> Option<Box<ExecutionState>> {
        None
    }

    /// Same output for every example (independent of inputs).
    fn always_constant(&self) -> bool {
        false
    }

    /// Input order does not matter; equality canonicalizes it.
    fn commutative_inputs(&self) -> bool {
        false
    }

    /// Applying the class twice in a row equals applying it once, so a
    /// same-class parent chain collapses during reduction.
    fn self_idempotent(&self) -> bool {
        false
    }

    fn specificity(&self) -> u32 {
        0
    }

    fn validate(&self, _input_count: usize) -> Result<(), String> {
        Ok(())
    }

    /// Per-class rewrite rules, run after the engine's standard rules.
    fn graph_reducers(&self) -> Vec<Arc<dyn GraphReducer>> {
        Vec::new()
    }

    /// Present when this transformer embeds a whole prepared DAG, which the
    /// reducer may splice into the enclosing graph.
    fn as_nested(&self) -> Option<&NestedDag> {
        None
    }
}

/// Capability of a preparable (trainable) transformer.
pub trait Prepare: Send + Sync {
    fn signature(&self) -> Signature;

    /// Fresh preparer for one training run.
    fn preparer(&self) -> Box<dyn Preparer>;

    fn mode(&self) -> PreparerMode {
        PreparerMode::Stream
    }

    /// Preparing twice on identical data yields equal prepared transformers.
    /// Idempotent preparers with constant inputs are eligible for constant
    /// folding.
    fn idempotent_preparer(&self) -> bool {
        false
    }

    /// See [`Transform::self_idempotent`].
    fn self_idempotent(&self) -> bool {
        false
    }

    fn commutative_inputs(&self) -> bool {
        false
    }

    fn specificity(&self) -> u32 {
        0
    }

    fn validate(&self, _input_count: usize) -> Result<(), String> {
        Ok(())
    }

    fn graph_reducers(&self) -> Vec<Arc<dyn GraphReducer>> {
        Vec::new()
    }

    /// Downcast hook for the trivially-preparable wrapper the constant
    /// folder installs under viewed preparables.
    fn as_fixed(&self) -> Option<&super::constant::FixedPreparable> {
        None
    }
}

/// One training pass of a preparable transformer.
///
/// The engine calls `process` once per training example (inputs in parent
/// order, strictly in dataset order) and then `finish` exactly once. The
/// replay reader — present for [`PreparerMode::Batch`] preparers — yields one
/// [`Value::List`] tuple per example, again in parent order.
pub trait Preparer: Send {
    fn process(&mut self, inputs: &[Value]) -> anyhow::Result<()>;

    fn finish(&mut self, replay: Option<Arc<dyn ObjectReader>>) -> anyhow::Result<PreparedPair>;
}

/// Capability of a view: derives a constant from a prepared transformer.
pub trait Observe: Send + Sync {
    fn signature(&self) -> Signature;

    fn observe(&self, prepared: &dyn Transform) -> anyhow::Result<Value>;

    fn specificity(&self) -> u32 {
        0
    }

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// The five producer kinds.
#[derive(Clone)]
pub enum ProducerKind {
    Placeholder {
        name: Arc<str>,
        /// Set only on the canonicalizer-internal positional variant, which
        /// is equal by index rather than by handle.
        positional: Option<usize>,
    },
    Generator(Arc<dyn Generate>),
    Prepared {
        op: Arc<dyn Transform>,
        inputs: Vec<Arc<Producer>>,
    },
    Preparable {
        op: Arc<dyn Prepare>,
        inputs: Vec<Arc<Producer>>,
    },
    View {
        op: Arc<dyn Observe>,
        input: Arc<Producer>,
    },
}

/// A vertex of the dataflow graph. Immutable; all mutation goes through
/// `with_inputs`, which mints a new instance with a fresh handle.
pub struct Producer {
    handle: ProducerHandle,
    kind: ProducerKind,
}

impl Producer {
    /// Declares a per-example input slot.
    pub fn placeholder(name: impl Into<Arc<str>>) -> Arc<Producer> {
        Arc::new(Producer {
            handle: ProducerHandle::new(),
            kind: ProducerKind::Placeholder {
                name: name.into(),
                positional: None,
            },
        })
    }

    /// Positional placeholder used inside equality fingerprints. Rejected in
    /// user graphs.
    pub fn positional(index: usize) -> Arc<Producer> {
        Arc::new(Producer {
            handle: ProducerHandle::new(),
            kind: ProducerKind::Placeholder {
                name: Arc::from(format!("#{index}")),
                positional: Some(index),
            },
        })
    }

    pub fn generator(op: Arc<dyn Generate>) -> Arc<Producer> {
        Arc::new(Producer {
            handle: ProducerHandle::new(),
            kind: ProducerKind::Generator(op),
        })
    }

    pub fn prepared(op: Arc<dyn Transform>, inputs: Vec<Arc<Producer>>) -> Arc<Producer> {
        Arc::new(Producer {
            handle: ProducerHandle::new(),
            kind: ProducerKind::Prepared { op, inputs },
        })
    }

    pub fn preparable(op: Arc<dyn Prepare>, inputs: Vec<Arc<Producer>>) -> Arc<Producer> {
        Arc::new(Producer {
            handle: ProducerHandle::new(),
            kind: ProducerKind::Preparable { op, inputs },
        })
    }

    pub fn view(op: Arc<dyn Observe>, input: Arc<Producer>) -> Arc<Producer> {
        Arc::new(Producer {
            handle: ProducerHandle::new(),
            kind: ProducerKind::View { op, input },
        })
    }

    pub fn handle(&self) -> ProducerHandle {
        self.handle
    }

    pub fn kind(&self) -> &ProducerKind {
        &self.kind
    }

    /// Ordered parent producers; empty for roots.
    pub fn inputs(&self) -> &[Arc<Producer>] {
        match &self.kind {
            ProducerKind::Placeholder { .. } | ProducerKind::Generator(_) => &[],
            ProducerKind::Prepared { inputs, .. } | ProducerKind::Preparable { inputs, .. } => {
                inputs
            }
            ProducerKind::View { input, .. } => std::slice::from_ref(input),
        }
    }

    /// Same operation over replaced parents, under a fresh handle. Roots have
    /// no parents and are returned as new instances of themselves.
    pub fn with_inputs(self: &Arc<Self>, inputs: Vec<Arc<Producer>>) -> Arc<Producer> {
        let kind = match &self.kind {
            ProducerKind::Placeholder { name, positional } => ProducerKind::Placeholder {
                name: name.clone(),
                positional: *positional,
            },
            ProducerKind::Generator(op) => ProducerKind::Generator(op.clone()),
            ProducerKind::Prepared { op, .. } => ProducerKind::Prepared {
                op: op.clone(),
                inputs,
            },
            ProducerKind::Preparable { op, .. } => ProducerKind::Preparable {
                op: op.clone(),
                inputs,
            },
            ProducerKind::View { op, .. } => {
                let mut inputs = inputs;
                ProducerKind::View {
                    op: op.clone(),
                    input: inputs.pop().unwrap_or_else(|| {
                        // A view keeps its parent when none is supplied.
                        match &self.kind {
                            ProducerKind::View { input, .. } => input.clone(),
                            _ => unreachable!(),
                        }
                    }),
                }
            }
        };
        Arc::new(Producer {
            handle: ProducerHandle::new(),
            kind,
        })
    }

    /// Clone under a fresh handle. The clone is value-equal to the original
    /// (unless it is a placeholder, whose identity *is* its handle).
    pub fn with_new_handle(self: &Arc<Self>) -> Arc<Producer> {
        Arc::new(Producer {
            handle: ProducerHandle::new(),
            kind: self.kind.clone(),
        })
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.kind, ProducerKind::Placeholder { .. })
    }

    pub fn positional_index(&self) -> Option<usize> {
        match &self.kind {
            ProducerKind::Placeholder { positional, .. } => *positional,
            _ => None,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(
            self.kind,
            ProducerKind::Placeholder { .. } | ProducerKind::Generator(_)
        )
    }

    pub fn is_preparable(&self) -> bool {
        matches!(self.kind, ProducerKind::Preparable { .. })
    }

    pub fn is_view(&self) -> bool {
        matches!(self.kind, ProducerKind::View { .. })
    }

    pub fn transform_op(&self) -> Option<&Arc<dyn Transform>> {
        match &self.kind {
            ProducerKind::Prepared { op, .. } => Some(op),
            _ => None,
        }
    }

    pub fn prepare_op(&self) -> Option<&Arc<dyn Prepare>> {
        match &self.kind {
            ProducerKind::Preparable { op, .. } => Some(op),
            _ => None,
        }
    }

    pub fn observe_op(&self) -> Option<&Arc<dyn Observe>> {
        match &self.kind {
            ProducerKind::View { op, .. } => Some(op),
            _ => None,
        }
    }

    pub fn generate_op(&self) -> Option<&Arc<dyn Generate>> {
        match &self.kind {
            ProducerKind::Generator(op) => Some(op),
            _ => None,
        }
    }

    /// Class name for diagnostics and class-table rule lookups.
    pub fn class_name(&self) -> &'static str {
        match &self.kind {
            ProducerKind::Placeholder {
                positional: Some(_),
                ..
            } => "PositionalPlaceholder",
            ProducerKind::Placeholder { .. } => "Placeholder",
            ProducerKind::Generator(op) => op.signature().class,
            ProducerKind::Prepared { op, .. } => op.signature().class,
            ProducerKind::Preparable { op, .. } => op.signature().class,
            ProducerKind::View { op, .. } => op.signature().class,
        }
    }

    /// Diagnostic label: class plus short handle.
    pub fn label(&self) -> String {
        format!("{}:{}", self.class_name(), self.handle.short())
    }

    /// Declared constancy only; derived constancy is computed over the
    /// canonical graph.
    pub fn declared_constant(&self) -> bool {
        match &self.kind {
            ProducerKind::Placeholder { .. } => false,
            ProducerKind::Generator(op) => op.always_constant(),
            ProducerKind::Prepared { op, .. } => op.always_constant(),
            ProducerKind::Preparable { .. } => false,
            ProducerKind::View { .. } => true,
        }
    }

    pub fn commutative_inputs(&self) -> bool {
        match &self.kind {
            ProducerKind::Prepared { op, .. } => op.commutative_inputs(),
            ProducerKind::Preparable { op, .. } => op.commutative_inputs(),
            _ => false,
        }
    }

    pub fn specificity(&self) -> u32 {
        match &self.kind {
            ProducerKind::Placeholder { .. } => 0,
            ProducerKind::Generator(op) => op.specificity(),
            ProducerKind::Prepared { op, .. } => op.specificity(),
            ProducerKind::Preparable { op, .. } => op.specificity(),
            ProducerKind::View { op, .. } => op.specificity(),
        }
    }

    /// Per-class rewrite rules contributed by the operation.
    pub fn graph_reducers(&self) -> Vec<Arc<dyn GraphReducer>> {
        match &self.kind {
            ProducerKind::Prepared { op, .. } => op.graph_reducers(),
            ProducerKind::Preparable { op, .. } => op.graph_reducers(),
            _ => Vec::new(),
        }
    }

    /// Sanity check, eagerly run during canonicalization.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let result = match &self.kind {
            ProducerKind::Placeholder { name, .. } => {
                if name.is_empty() {
                    Err("placeholder requires a non-empty name".to_string())
                } else {
                    Ok(())
                }
            }
            ProducerKind::Generator(op) => op.validate(),
            ProducerKind::Prepared { op, inputs } => op.validate(inputs.len()),
            ProducerKind::Preparable { op, inputs } => op.validate(inputs.len()),
            ProducerKind::View { op, .. } => op.validate(),
        };
        result.map_err(|reason| ValidationError {
            class: self.class_name().to_string(),
            label: self.label(),
            reason,
        })
    }

    fn signature(&self) -> Option<Signature> {
        match &self.kind {
            ProducerKind::Placeholder { .. } => None,
            ProducerKind::Generator(op) => Some(op.signature()),
            ProducerKind::Prepared { op, .. } => Some(op.signature()),
            ProducerKind::Preparable { op, .. } => Some(op.signature()),
            ProducerKind::View { op, .. } => Some(op.signature()),
        }
    }

    /// Inputs in equality-canonical order: declared order, or sorted by
    /// handle for commutative operations. Canonical parents are interned, so
    /// value-equal parents share handles and the sort is stable across
    /// instances.
    fn inputs_for_equality(&self) -> Vec<&Arc<Producer>> {
        let mut inputs: Vec<&Arc<Producer>> = self.inputs().iter().collect();
        if self.commutative_inputs() {
            inputs.sort_by_key(|p| p.handle());
        }
        inputs
    }

    /// Structural value equality: same kind, equal signatures, pairwise-equal
    /// inputs. Placeholders are equal only to themselves; positional
    /// placeholders are equal by index.
    pub fn value_eq(&self, other: &Producer) -> bool {
        match (&self.kind, &other.kind) {
            (
                ProducerKind::Placeholder {
                    positional: Some(a),
                    ..
                },
                ProducerKind::Placeholder {
                    positional: Some(b),
                    ..
                },
            ) => a == b,
            (ProducerKind::Placeholder { positional: None, .. },
             ProducerKind::Placeholder { positional: None, .. }) => self.handle == other.handle,
            (ProducerKind::Placeholder { .. }, ProducerKind::Placeholder { .. }) => false,
            (ProducerKind::Generator(a), ProducerKind::Generator(b)) => {
                a.signature() == b.signature()
            }
            (ProducerKind::Prepared { .. }, ProducerKind::Prepared { .. })
            | (ProducerKind::Preparable { .. }, ProducerKind::Preparable { .. })
            | (ProducerKind::View { .. }, ProducerKind::View { .. }) => {
                if self.signature() != other.signature() {
                    return false;
                }
                let a = self.inputs_for_equality();
                let b = other.inputs_for_equality();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.value_eq(y))
            }
            _ => false,
        }
    }

    /// Hash consistent with [`Producer::value_eq`].
    pub fn value_hash<H: Hasher>(&self, state: &mut H) {
        match &self.kind {
            ProducerKind::Placeholder { positional, .. } => {
                0u8.hash(state);
                match positional {
                    Some(i) => {
                        1u8.hash(state);
                        i.hash(state);
                    }
                    None => {
                        0u8.hash(state);
                        self.handle.hash(state);
                    }
                }
            }
            ProducerKind::Generator(op) => {
                1u8.hash(state);
                op.signature().hash(state);
            }
            ProducerKind::Prepared { op, .. } => {
                2u8.hash(state);
                op.signature().hash(state);
                self.hash_inputs(state);
            }
            ProducerKind::Preparable { op, .. } => {
                3u8.hash(state);
                op.signature().hash(state);
                self.hash_inputs(state);
            }
            ProducerKind::View { op, input } => {
                4u8.hash(state);
                op.signature().hash(state);
                input.value_hash(state);
            }
        }
    }

    fn hash_inputs<H: Hasher>(&self, state: &mut H) {
        let inputs = self.inputs_for_equality();
        inputs.len().hash(state);
        for input in inputs {
            input.value_hash(state);
        }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} inputs)", self.label(), self.inputs().len())
    }
}
