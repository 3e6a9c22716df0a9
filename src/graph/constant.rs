// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Constant-valued producers used by the reducer and as plain graph inputs.

use super::producer::{
    Generate, Prepare, PreparedPair, Preparer, Signature, Transform,
};
use super::value::Value;
use crate::io::ObjectReader;
use std::sync::Arc;

/// Sealed constant: the same value for every example index.
#[derive(Clone, Debug)]
pub struct Constant {
    value: Value,
}

impl Constant {
    pub fn new(value: Value) -> Arc<dyn Generate> {
        Arc::new(Constant { value })
    }

    /// Convenience for building a constant producer directly.
    pub fn producer(value: Value) -> Arc<super::producer::Producer> {
        super::producer::Producer::generator(Self::new(value))
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Generate for Constant {
    fn signature(&self) -> Signature {
        Signature::with_params("Constant", vec![self.value.clone()])
    }

    fn generate(&self, _index: u64) -> Value {
        self.value.clone()
    }

    fn always_constant(&self) -> bool {
        true
    }
}

/// A transformer folded down to two constants: one for new data, one for the
/// preparation data. Retained instead of a plain [`Constant`] whenever the
/// two differ, because training outputs and the inference graph then disagree
/// on the value.
#[derive(Clone, Debug)]
pub struct ConstantResult {
    for_new_data: Value,
    for_preparation_data: Value,
}

impl ConstantResult {
    pub fn new(for_new_data: Value, for_preparation_data: Value) -> Arc<dyn Transform> {
        Arc::new(ConstantResult {
            for_new_data,
            for_preparation_data,
        })
    }

    pub fn for_new_data(&self) -> &Value {
        &self.for_new_data
    }

    pub fn for_preparation_data(&self) -> &Value {
        &self.for_preparation_data
    }

    pub fn values_agree(&self) -> bool {
        self.for_new_data == self.for_preparation_data
    }
}

impl Transform for ConstantResult {
    fn signature(&self) -> Signature {
        Signature::with_params(
            "ConstantResult",
            vec![
                self.for_new_data.clone(),
                self.for_preparation_data.clone(),
            ],
        )
    }

    fn apply(
        &self,
        _state: Option<&super::producer::ExecutionState>,
        _inputs: &[Value],
    ) -> anyhow::Result<Value> {
        // Training-side application: preparation-data semantics.
        Ok(self.for_preparation_data.clone())
    }

    fn always_constant(&self) -> bool {
        true
    }
}

/// Trivially-preparable wrapper carrying an already-known prepared pair.
///
/// The constant folder substitutes this for an idempotent preparable whose
/// inputs folded to constants but which still has views attached: the views
/// need a preparable parent to observe, so the preparable shape must survive
/// even though nothing is left to learn.
pub struct FixedPreparable {
    pair: PreparedPair,
}

impl FixedPreparable {
    pub fn new(pair: PreparedPair) -> Arc<dyn Prepare> {
        Arc::new(FixedPreparable { pair })
    }

    pub fn pair(&self) -> &PreparedPair {
        &self.pair
    }
}

impl Prepare for FixedPreparable {
    fn signature(&self) -> Signature {
        let mut params = Vec::new();
        // Distinguish wrappers by what they wrap, not by instance.
        params.push(Value::str(self.pair.for_new_data.signature().class));
        params.extend(self.pair.for_new_data.signature().params);
        params.push(Value::str(self.pair.for_preparation_data.signature().class));
        params.extend(self.pair.for_preparation_data.signature().params);
        Signature::with_params("FixedPreparable", params)
    }

    fn preparer(&self) -> Box<dyn Preparer> {
        Box::new(FixedPreparer {
            pair: self.pair.clone(),
        })
    }

    fn idempotent_preparer(&self) -> bool {
        true
    }

    fn as_fixed(&self) -> Option<&FixedPreparable> {
        Some(self)
    }
}

struct FixedPreparer {
    pair: PreparedPair,
}

impl Preparer for FixedPreparer {
    fn process(&mut self, _inputs: &[Value]) -> anyhow::Result<()> {
        Ok(())
    }

    fn finish(&mut self, _replay: Option<Arc<dyn ObjectReader>>) -> anyhow::Result<PreparedPair> {
        Ok(self.pair.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Producer;

    #[test]
    fn equal_constants_are_value_equal() {
        let a = Constant::producer(Value::I64(7));
        let b = Constant::producer(Value::I64(7));
        let c = Constant::producer(Value::I64(8));
        assert!(a.value_eq(&b));
        assert!(!a.value_eq(&c));
    }

    #[test]
    fn constant_result_agreement() {
        let same = ConstantResult {
            for_new_data: Value::F64(1.5),
            for_preparation_data: Value::F64(1.5),
        };
        assert!(same.values_agree());
        let differs = ConstantResult {
            for_new_data: Value::F64(1.5),
            for_preparation_data: Value::F64(2.5),
        };
        assert!(!differs.values_agree());
    }

    #[test]
    fn fixed_preparable_finishes_without_data() {
        let constant: Arc<dyn Transform> = ConstantResult::new(Value::I64(1), Value::I64(1));
        let fixed = FixedPreparable::new(PreparedPair::shared(constant));
        let mut preparer = fixed.preparer();
        let pair = preparer.finish(None).unwrap();
        assert_eq!(pair.for_new_data.signature().class, "ConstantResult");
        // The wrapper survives as a preparable producer.
        let producer = Producer::preparable(fixed, vec![]);
        assert!(producer.is_preparable());
    }
}
