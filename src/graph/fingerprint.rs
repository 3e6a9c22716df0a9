// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Structural equality fingerprints.
//!
//! Two graphs are structurally equal when they compute the same thing from
//! the same input positions, regardless of which placeholder instances they
//! were declared with. The fingerprint captures this: a copy of the output
//! forest in which every placeholder is replaced by a positional placeholder
//! (equal by index), fed into a single no-op sink node so that a graph with
//! any number of outputs reduces to one comparable tree.

use super::handle::ProducerHandle;
use super::producer::{ExecutionState, Producer, Signature, Transform};
use super::value::Value;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Canonical no-op sink closing over positionally-substituted outputs.
#[derive(Clone, Debug)]
struct Sink;

impl Transform for Sink {
    fn signature(&self) -> Signature {
        Signature::new("##sink")
    }

    fn apply(&self, _state: Option<&ExecutionState>, _inputs: &[Value]) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }
}

/// The equality fingerprint of a canonical graph.
#[derive(Clone)]
pub struct Fingerprint {
    sink: Arc<Producer>,
}

impl Fingerprint {
    /// Substitutes each placeholder with its positional twin and closes the
    /// outputs over a sentinel sink.
    pub(crate) fn build(
        placeholders: &[Arc<Producer>],
        outputs: &[Arc<Producer>],
    ) -> Fingerprint {
        let mut memo: HashMap<ProducerHandle, Arc<Producer>> = placeholders
            .iter()
            .enumerate()
            .map(|(i, p)| (p.handle(), Producer::positional(i)))
            .collect();
        let rebuilt = outputs
            .iter()
            .map(|o| substitute(o, &mut memo))
            .collect::<Vec<_>>();
        Fingerprint {
            sink: Producer::prepared(Arc::new(Sink), rebuilt),
        }
    }
}

/// Memoized bottom-up rewrite: mapped producers are swapped wholesale,
/// everything above them is rebuilt copy-on-write.
pub(crate) fn substitute(
    producer: &Arc<Producer>,
    memo: &mut HashMap<ProducerHandle, Arc<Producer>>,
) -> Arc<Producer> {
    if let Some(done) = memo.get(&producer.handle()) {
        return done.clone();
    }
    let inputs = producer.inputs();
    let rebuilt_inputs: Vec<Arc<Producer>> =
        inputs.iter().map(|p| substitute(p, memo)).collect();
    let changed = inputs
        .iter()
        .zip(rebuilt_inputs.iter())
        .any(|(a, b)| !Arc::ptr_eq(a, b));
    let rebuilt = if changed {
        producer.with_inputs(rebuilt_inputs)
    } else {
        producer.clone()
    };
    memo.insert(producer.handle(), rebuilt.clone());
    rebuilt
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.sink.value_eq(&other.sink)
    }
}

impl Eq for Fingerprint {}

impl Hash for Fingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sink.value_hash(state);
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut h = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut h);
        write!(f, "Fingerprint({:016x})", h.finish())
    }
}
