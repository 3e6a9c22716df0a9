// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Trainable statistics over a single numeric input.

use crate::graph::{
    ExecutionState, Prepare, PreparedPair, Preparer, PreparerMode, Signature, Transform, Value,
};
use crate::io::ObjectReader;
use std::sync::Arc;

/// Preparable mean: sees every training value, prepares a transformer that
/// broadcasts the dataset mean.
///
/// The preparer is idempotent (two passes over the same data produce the same
/// mean), streaming (no replay needed), and emits one shared prepared form
/// for both data roles.
#[derive(Clone, Debug)]
pub struct Mean;

impl Mean {
    pub fn new() -> Arc<dyn Prepare> {
        Arc::new(Mean)
    }
}

impl Prepare for Mean {
    fn signature(&self) -> Signature {
        Signature::new("Mean")
    }

    fn preparer(&self) -> Box<dyn Preparer> {
        Box::new(MeanPreparer { sum: 0.0, count: 0 })
    }

    fn mode(&self) -> PreparerMode {
        PreparerMode::Stream
    }

    fn idempotent_preparer(&self) -> bool {
        true
    }

    fn validate(&self, input_count: usize) -> Result<(), String> {
        (input_count == 1)
            .then_some(())
            .ok_or_else(|| format!("Mean takes 1 input, got {input_count}"))
    }
}

struct MeanPreparer {
    sum: f64,
    count: u64,
}

impl Preparer for MeanPreparer {
    fn process(&mut self, inputs: &[Value]) -> anyhow::Result<()> {
        self.sum += inputs[0].expect_f64()?;
        self.count += 1;
        Ok(())
    }

    fn finish(&mut self, _replay: Option<Arc<dyn ObjectReader>>) -> anyhow::Result<PreparedPair> {
        let mean = if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        };
        Ok(PreparedPair::shared(Arc::new(PreparedMean { mean })))
    }
}

/// The prepared form of [`Mean`]: ignores its input and emits the learned
/// mean for every example.
#[derive(Clone, Debug)]
pub struct PreparedMean {
    pub mean: f64,
}

impl Transform for PreparedMean {
    fn signature(&self) -> Signature {
        Signature::with_params("PreparedMean", vec![Value::F64(self.mean)])
    }

    fn apply(&self, _state: Option<&ExecutionState>, _inputs: &[Value]) -> anyhow::Result<Value> {
        Ok(Value::F64(self.mean))
    }

    fn preferred_minibatch_size(&self) -> usize {
        1024
    }

    fn always_constant(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_over_four_values() {
        let mut preparer = Mean.preparer();
        for v in [1.0, 2.0, 3.0, 4.0] {
            preparer.process(&[Value::F64(v)]).unwrap();
        }
        let pair = preparer.finish(None).unwrap();
        let out = pair.for_new_data.apply(None, &[Value::F64(10.0)]).unwrap();
        assert_eq!(out, Value::F64(2.5));
    }

    #[test]
    fn empty_dataset_means_zero() {
        let mut preparer = Mean.preparer();
        let pair = preparer.finish(None).unwrap();
        let out = pair.for_new_data.apply(None, &[Value::Null]).unwrap();
        assert_eq!(out, Value::F64(0.0));
    }

    #[test]
    fn preparing_twice_yields_equal_transformers() {
        let run = || {
            let mut p = Mean.preparer();
            p.process(&[Value::F64(2.0)]).unwrap();
            p.process(&[Value::F64(4.0)]).unwrap();
            p.finish(None).unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.for_new_data.signature(), b.for_new_data.signature());
    }
}
