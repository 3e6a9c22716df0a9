// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Cross-cutting canonicalizer tests: deduplication, phase assignment,
//! fingerprints, and the identity/value hashing separation.

use super::*;
use crate::errors::GraphError;
use crate::examples::arithmetic::{Add, Sub};
use crate::examples::stats::Mean;
use crate::examples::vector::Densify;
use std::sync::Arc;

#[test]
fn commutative_outputs_deduplicate_to_one_node() {
    let p0 = Producer::placeholder("a");
    let p1 = Producer::placeholder("b");
    let left = Producer::prepared(Add::new(), vec![p0.clone(), p1.clone()]);
    let right = Producer::prepared(Add::new(), vec![p1.clone(), p0.clone()]);

    let dag = canonicalize(&[p0.clone(), p1.clone()], &[left, right]).unwrap();

    let adds = dag
        .nodes()
        .iter()
        .filter(|n| n.class_name() == "Add")
        .count();
    assert_eq!(adds, 1, "mirrored commutative adds must intern to one node");
    assert_eq!(dag.output_indices()[0], dag.output_indices()[1]);

    // Fingerprint equality with a single Add used twice.
    let q0 = Producer::placeholder("x");
    let q1 = Producer::placeholder("y");
    let add = Producer::prepared(Add::new(), vec![q0.clone(), q1.clone()]);
    let twice = canonicalize(&[q0, q1], &[add.clone(), add]).unwrap();
    assert!(dag.fingerprint_eq(&twice));
}

#[test]
fn non_commutative_outputs_stay_distinct() {
    let p0 = Producer::placeholder("a");
    let p1 = Producer::placeholder("b");
    let left = Producer::prepared(Sub::new(), vec![p0.clone(), p1.clone()]);
    let right = Producer::prepared(Sub::new(), vec![p1.clone(), p0.clone()]);

    let dag = canonicalize(&[p0, p1], &[left, right]).unwrap();
    let subs = dag
        .nodes()
        .iter()
        .filter(|n| n.class_name() == "Sub")
        .count();
    assert_eq!(subs, 2);
}

/// Discovery adjacency is identity-keyed while interning hashes by value;
/// merging two value-equal parents must still leave the child with both of
/// its edges.
#[test]
fn identity_edges_survive_value_interning() {
    let p0 = Producer::placeholder("a");
    let p1 = Producer::placeholder("b");
    let add1 = Producer::prepared(Add::new(), vec![p0.clone(), p1.clone()]);
    let add2 = Producer::prepared(Add::new(), vec![p0.clone(), p1.clone()]);
    assert_ne!(add1.handle(), add2.handle());
    assert!(add1.value_eq(&add2));
    let out = Producer::prepared(Sub::new(), vec![add1, add2]);

    let dag = canonicalize(&[p0, p1], &[out]).unwrap();

    let add_index = dag
        .nodes()
        .iter()
        .position(|n| n.class_name() == "Add")
        .unwrap();
    let sub_index = dag
        .nodes()
        .iter()
        .position(|n| n.class_name() == "Sub")
        .unwrap();
    // Exactly one Add remains, and Sub consumes it through both edges.
    assert_eq!(
        dag.nodes().iter().filter(|n| n.class_name() == "Add").count(),
        1
    );
    assert_eq!(dag.parents(sub_index), &[add_index, add_index]);
    assert_eq!(dag.children(add_index), &[sub_index, sub_index]);
}

#[test]
fn phases_split_at_preparations() {
    let p0 = Producer::placeholder("x");
    let mean = Producer::preparable(Mean::new(), vec![p0.clone()]);
    let out = Producer::prepared(Sub::new(), vec![p0.clone(), mean.clone()]);
    let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();

    let phase_of = |class: &str| {
        let index = dag
            .nodes()
            .iter()
            .position(|n| n.class_name() == class)
            .unwrap();
        dag.phase(index)
    };
    assert_eq!(phase_of("Placeholder"), 0);
    assert_eq!(phase_of("Mean"), 1);
    assert_eq!(phase_of("Sub"), 2);
    assert_eq!(dag.phase_count(), 3);
    assert!(!dag.is_prepared());
    assert!(dag.has_idempotent_preparers());
}

#[test]
fn chained_prepared_nodes_share_a_phase() {
    let p0 = Producer::placeholder("x");
    let a = Producer::prepared(Add::new(), vec![p0.clone(), p0.clone()]);
    let b = Producer::prepared(Add::new(), vec![a.clone(), p0.clone()]);
    let dag = canonicalize(std::slice::from_ref(&p0), &[b]).unwrap();
    assert!(dag.phases.iter().all(|&p| p == 0));
    assert!(dag.is_prepared());
}

#[test]
fn views_live_one_phase_above_their_parent() {
    use crate::graph::{Observe, Signature, Transform};

    struct ReadMean;
    impl Observe for ReadMean {
        fn signature(&self) -> Signature {
            Signature::new("ReadMean")
        }
        fn observe(&self, prepared: &dyn Transform) -> anyhow::Result<Value> {
            prepared.apply(None, &[Value::Null])
        }
    }

    let p0 = Producer::placeholder("x");
    let mean = Producer::preparable(Mean::new(), vec![p0.clone()]);
    let view = Producer::view(Arc::new(ReadMean), mean.clone());
    let dag = canonicalize(std::slice::from_ref(&p0), &[view]).unwrap();

    let mean_index = dag
        .nodes()
        .iter()
        .position(|n| n.class_name() == "Mean")
        .unwrap();
    let view_index = dag
        .nodes()
        .iter()
        .position(|n| n.class_name() == "ReadMean")
        .unwrap();
    assert_eq!(dag.phase(view_index), dag.phase(mean_index) + 1);
    // Ordering invariant: within the arena, preparables precede views.
    assert!(mean_index < view_index);
}

#[test]
fn unreachable_placeholders_are_retained() {
    let p0 = Producer::placeholder("used");
    let p1 = Producer::placeholder("unused");
    let out = Producer::prepared(Add::new(), vec![p0.clone(), p0.clone()]);
    let dag = canonicalize(&[p0, p1.clone()], &[out]).unwrap();
    assert!(dag.index_of(p1.handle()).is_some());
    assert_eq!(dag.placeholders().len(), 2);
}

#[test]
fn undeclared_placeholder_is_rejected() {
    let p0 = Producer::placeholder("declared");
    let stray = Producer::placeholder("stray");
    let out = Producer::prepared(Add::new(), vec![p0.clone(), stray]);
    let err = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap_err();
    assert!(matches!(err, GraphError::UndeclaredPlaceholder(_)));
}

#[test]
fn duplicate_placeholder_is_rejected() {
    let p0 = Producer::placeholder("x");
    let err = canonicalize(&[p0.clone(), p0.clone()], &[p0.clone()]).unwrap_err();
    assert!(matches!(err, GraphError::DuplicatePlaceholder(_)));
}

#[test]
fn positional_placeholders_are_rejected_in_user_graphs() {
    let pos = Producer::positional(0);
    let err = canonicalize(&[], &[pos]).unwrap_err();
    assert!(matches!(err, GraphError::ForeignPositional(0)));
}

#[test]
fn view_over_non_preparable_is_rejected() {
    use crate::graph::{Observe, Signature, Transform};

    struct Peek;
    impl Observe for Peek {
        fn signature(&self) -> Signature {
            Signature::new("Peek")
        }
        fn observe(&self, _prepared: &dyn Transform) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    let p0 = Producer::placeholder("x");
    let view = Producer::view(Arc::new(Peek), p0.clone());
    let err = canonicalize(std::slice::from_ref(&p0), &[view]).unwrap_err();
    assert!(matches!(err, GraphError::ViewParent { .. }));
}

#[test]
fn validation_failures_carry_the_producer_label() {
    // Add requires exactly two inputs.
    let p0 = Producer::placeholder("x");
    let bad = Producer::prepared(Add::new(), vec![p0.clone()]);
    let err = canonicalize(std::slice::from_ref(&p0), &[bad]).unwrap_err();
    match err {
        GraphError::Validation(v) => assert_eq!(v.class, "Add"),
        other => panic!("expected Validation, got {other:?}"),
    }
}

/// Among value-equal producers the highest specificity rank becomes the
/// canonical representative.
#[test]
fn interning_prefers_the_most_specific_instance() {
    use crate::graph::{ExecutionState, Signature, Transform};

    struct Plain;
    impl Transform for Plain {
        fn signature(&self) -> Signature {
            Signature::new("Shadow")
        }
        fn apply(&self, _s: Option<&ExecutionState>, i: &[Value]) -> anyhow::Result<Value> {
            Ok(i[0].clone())
        }
    }

    struct Derived;
    impl Transform for Derived {
        fn signature(&self) -> Signature {
            Signature::new("Shadow")
        }
        fn apply(&self, _s: Option<&ExecutionState>, i: &[Value]) -> anyhow::Result<Value> {
            Ok(i[0].clone())
        }
        fn specificity(&self) -> u32 {
            7
        }
    }

    let p0 = Producer::placeholder("x");
    let plain = Producer::prepared(Arc::new(Plain), vec![p0.clone()]);
    let derived = Producer::prepared(Arc::new(Derived), vec![p0.clone()]);
    let out = Producer::prepared(Add::new(), vec![plain, derived]);
    let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();

    let shadow = dag
        .nodes()
        .iter()
        .find(|n| n.class_name() == "Shadow")
        .unwrap();
    assert_eq!(
        dag.nodes()
            .iter()
            .filter(|n| n.class_name() == "Shadow")
            .count(),
        1
    );
    assert_eq!(shadow.specificity(), 7);
}

#[test]
fn densify_graph_reports_flags() {
    let p0 = Producer::placeholder("v");
    let densify = Producer::preparable(Densify::new(), vec![p0.clone()]);
    let dag = canonicalize(std::slice::from_ref(&p0), &[densify]).unwrap();
    assert!(dag.has_idempotent_preparers());
    assert!(!dag.is_prepared());
    assert_eq!(dag.max_parent_count(), 1);
}

#[test]
fn fingerprints_ignore_placeholder_identity_but_not_structure() {
    let build = |swap: bool| {
        let p0 = Producer::placeholder("a");
        let p1 = Producer::placeholder("b");
        let out = if swap {
            Producer::prepared(Sub::new(), vec![p1.clone(), p0.clone()])
        } else {
            Producer::prepared(Sub::new(), vec![p0.clone(), p1.clone()])
        };
        canonicalize(&[p0, p1], &[out]).unwrap()
    };
    let straight = build(false);
    let straight2 = build(false);
    let swapped = build(true);
    assert!(straight.fingerprint_eq(&straight2));
    assert!(!straight.fingerprint_eq(&swapped));
}
