// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Sparse-to-dense vector conversion.

use crate::graph::{
    ExecutionState, Prepare, PreparedPair, Preparer, PreparerMode, Signature, Transform, Value,
};
use crate::io::ObjectReader;
use std::sync::Arc;

/// Preparable densifier.
///
/// Declared self-idempotent: densifying an already dense vector changes
/// nothing, so `Densify(Densify(x))` reduces to `Densify(x)`.
#[derive(Clone, Debug)]
pub struct Densify;

impl Densify {
    pub fn new() -> Arc<dyn Prepare> {
        Arc::new(Densify)
    }
}

impl Prepare for Densify {
    fn signature(&self) -> Signature {
        Signature::new("Densify")
    }

    fn preparer(&self) -> Box<dyn Preparer> {
        Box::new(DensifyPreparer)
    }

    fn mode(&self) -> PreparerMode {
        PreparerMode::Stream
    }

    fn idempotent_preparer(&self) -> bool {
        true
    }

    fn self_idempotent(&self) -> bool {
        true
    }

    fn validate(&self, input_count: usize) -> Result<(), String> {
        (input_count == 1)
            .then_some(())
            .ok_or_else(|| format!("Densify takes 1 input, got {input_count}"))
    }
}

struct DensifyPreparer;

impl Preparer for DensifyPreparer {
    fn process(&mut self, _inputs: &[Value]) -> anyhow::Result<()> {
        Ok(())
    }

    fn finish(&mut self, _replay: Option<Arc<dyn ObjectReader>>) -> anyhow::Result<PreparedPair> {
        Ok(PreparedPair::shared(Arc::new(PreparedDensify)))
    }
}

/// Prepared form of [`Densify`]: expands a sparse vector up to its own
/// highest occupied index; dense vectors pass through unchanged.
#[derive(Clone, Debug)]
pub struct PreparedDensify;

impl Transform for PreparedDensify {
    fn signature(&self) -> Signature {
        Signature::new("PreparedDensify")
    }

    fn apply(&self, _state: Option<&ExecutionState>, inputs: &[Value]) -> anyhow::Result<Value> {
        match &inputs[0] {
            Value::Sparse(entries) => {
                let len = entries
                    .keys()
                    .next_back()
                    .map_or(0, |&max| max as usize + 1);
                let mut dense = vec![0.0; len];
                for (&index, &component) in entries.iter() {
                    dense[index as usize] = component;
                }
                Ok(Value::dense(dense))
            }
            dense @ Value::Dense(_) => Ok(dense.clone()),
            other => anyhow::bail!("cannot densify a {} value", other.type_name()),
        }
    }

    fn preferred_minibatch_size(&self) -> usize {
        1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_expands_to_own_extent() {
        let out = PreparedDensify
            .apply(None, &[Value::sparse([(2, 3.0)])])
            .unwrap();
        assert_eq!(out, Value::dense(vec![0.0, 0.0, 3.0]));
    }

    #[test]
    fn dense_passes_through() {
        let input = Value::dense(vec![1.0]);
        let out = PreparedDensify.apply(None, &[input.clone()]).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn densify_twice_equals_densify_once() {
        let once = PreparedDensify
            .apply(None, &[Value::sparse([(0, 1.0), (3, 2.0)])])
            .unwrap();
        let twice = PreparedDensify.apply(None, &[once.clone()]).unwrap();
        assert_eq!(once, twice);
    }
}
