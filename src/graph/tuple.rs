//! Arity-N tuple transformer.

use super::producer::{ExecutionState, Signature, Transform};
use super::value::Value;
use std::sync::Arc;

/// Packs its inputs into a [`Value::List`] tuple.
///
/// Inserted by the reducer when a multi-output sub-DAG is spliced into an
/// enclosing graph: the spliced node used to produce one value, so its
/// replacement wraps the sub-DAG's outputs in a tuple of matching arity.
#[derive(Clone, Debug)]
pub struct Tupled {
    arity: usize,
}

impl Tupled {
    pub fn new(arity: usize) -> Arc<dyn Transform> {
        Arc::new(Tupled { arity })
    }
}

impl Transform for Tupled {
    fn signature(&self) -> Signature {
        Signature::with_params("Tupled", vec![Value::I64(self.arity as i64)])
    }

    fn apply(&self, _state: Option<&ExecutionState>, inputs: &[Value]) -> anyhow::Result<Value> {
        Ok(Value::list(inputs.to_vec()))
    }

    fn preferred_minibatch_size(&self) -> usize {
        1024
    }

    fn validate(&self, input_count: usize) -> Result<(), String> {
        if input_count == self.arity {
            Ok(())
        } else {
            Err(format!(
                "tuple of arity {} got {} inputs",
                self.arity, input_count
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_inputs_in_order() {
        let t = Tupled::new(2);
        let out = t
            .apply(None, &[Value::I64(1), Value::str("x")])
            .unwrap();
        assert_eq!(out, Value::list(vec![Value::I64(1), Value::str("x")]));
    }

    #[test]
    fn arity_is_validated() {
        let t = Tupled::new(3);
        assert!(t.validate(3).is_ok());
        assert!(t.validate(2).is_err());
    }
}
