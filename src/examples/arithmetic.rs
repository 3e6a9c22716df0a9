// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Scalar arithmetic transformers.
//!
//! Integer inputs stay integers; anything mixed is computed in f64. `Add` and
//! `Mul` declare commutative inputs, so the canonicalizer merges mirrored
//! instances.

use crate::graph::{ExecutionState, Signature, Transform, Value};
use std::sync::Arc;

fn binary_numeric(
    a: &Value,
    b: &Value,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> anyhow::Result<Value> {
    match (a, b) {
        (Value::I64(x), Value::I64(y)) => Ok(Value::I64(int_op(*x, *y))),
        _ => Ok(Value::F64(float_op(a.expect_f64()?, b.expect_f64()?))),
    }
}

/// Commutative two-input addition.
#[derive(Clone, Debug)]
pub struct Add;

impl Add {
    pub fn new() -> Arc<dyn Transform> {
        Arc::new(Add)
    }
}

impl Transform for Add {
    fn signature(&self) -> Signature {
        Signature::new("Add")
    }

    fn apply(&self, _state: Option<&ExecutionState>, inputs: &[Value]) -> anyhow::Result<Value> {
        binary_numeric(&inputs[0], &inputs[1], |a, b| a + b, |a, b| a + b)
    }

    fn preferred_minibatch_size(&self) -> usize {
        1024
    }

    fn commutative_inputs(&self) -> bool {
        true
    }

    fn validate(&self, input_count: usize) -> Result<(), String> {
        (input_count == 2)
            .then_some(())
            .ok_or_else(|| format!("Add takes 2 inputs, got {input_count}"))
    }
}

/// Two-input subtraction.
#[derive(Clone, Debug)]
pub struct Sub;

impl Sub {
    pub fn new() -> Arc<dyn Transform> {
        Arc::new(Sub)
    }
}

impl Transform for Sub {
    fn signature(&self) -> Signature {
        Signature::new("Sub")
    }

    fn apply(&self, _state: Option<&ExecutionState>, inputs: &[Value]) -> anyhow::Result<Value> {
        binary_numeric(&inputs[0], &inputs[1], |a, b| a - b, |a, b| a - b)
    }

    fn preferred_minibatch_size(&self) -> usize {
        1024
    }

    fn validate(&self, input_count: usize) -> Result<(), String> {
        (input_count == 2)
            .then_some(())
            .ok_or_else(|| format!("Sub takes 2 inputs, got {input_count}"))
    }
}

/// Commutative two-input multiplication.
#[derive(Clone, Debug)]
pub struct Mul;

impl Mul {
    pub fn new() -> Arc<dyn Transform> {
        Arc::new(Mul)
    }
}

impl Transform for Mul {
    fn signature(&self) -> Signature {
        Signature::new("Mul")
    }

    fn apply(&self, _state: Option<&ExecutionState>, inputs: &[Value]) -> anyhow::Result<Value> {
        binary_numeric(&inputs[0], &inputs[1], |a, b| a * b, |a, b| a * b)
    }

    fn preferred_minibatch_size(&self) -> usize {
        1024
    }

    fn commutative_inputs(&self) -> bool {
        true
    }

    fn validate(&self, input_count: usize) -> Result<(), String> {
        (input_count == 2)
            .then_some(())
            .ok_or_else(|| format!("Mul takes 2 inputs, got {input_count}"))
    }
}

/// Numeric negation.
#[derive(Clone, Debug)]
pub struct Negate;

impl Negate {
    pub fn new() -> Arc<dyn Transform> {
        Arc::new(Negate)
    }
}

impl Transform for Negate {
    fn signature(&self) -> Signature {
        Signature::new("Negate")
    }

    fn apply(&self, _state: Option<&ExecutionState>, inputs: &[Value]) -> anyhow::Result<Value> {
        match &inputs[0] {
            Value::I64(v) => Ok(Value::I64(-v)),
            other => Ok(Value::F64(-other.expect_f64()?)),
        }
    }

    fn preferred_minibatch_size(&self) -> usize {
        1024
    }

    fn validate(&self, input_count: usize) -> Result<(), String> {
        (input_count == 1)
            .then_some(())
            .ok_or_else(|| format!("Negate takes 1 input, got {input_count}"))
    }
}
