// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Producer model, canonicalization, and the canonical DAG record.

mod canonicalizer;
mod constant;
mod dag;
mod fingerprint;
mod handle;
mod nested;
mod priority_queue;
mod producer;
mod tuple;
mod value;

#[cfg(test)]
mod integration_tests;

pub use canonicalizer::canonicalize;
pub(crate) use canonicalizer::assemble;
pub(crate) use fingerprint::substitute as substitute_tree;
pub use constant::{Constant, ConstantResult, FixedPreparable};
pub use dag::DagStructure;
pub use fingerprint::Fingerprint;
pub use handle::ProducerHandle;
pub use nested::NestedDag;
pub use producer::{
    ExecutionState, Generate, Observe, Prepare, PreparedPair, Preparer, PreparerMode, Producer,
    ProducerKind, Signature, Transform,
};
pub use tuple::Tupled;
pub use value::Value;
