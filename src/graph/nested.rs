// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! A prepared DAG embedded as a single transformer.

use super::dag::DagStructure;
use super::producer::{ExecutionState, Signature, Transform};
use super::value::Value;
use std::sync::Arc;

/// Wraps a fully prepared graph as one vertex of an enclosing graph.
///
/// The wrapper's inputs line up positionally with the embedded graph's
/// placeholders. A single-output graph yields that output's value; a
/// multi-output graph yields a [`Value::List`] tuple.
///
/// The reducer recognizes this transformer and splices the embedded graph
/// into the enclosing one (its placeholders replaced by the wrapper's actual
/// parents), so in reduced graphs the wrapper only survives where splicing is
/// not allowed.
#[derive(Clone)]
pub struct NestedDag {
    dag: Arc<DagStructure>,
}

impl NestedDag {
    /// Embeds `dag`, which must already be prepared.
    pub fn new(dag: DagStructure) -> anyhow::Result<Arc<dyn Transform>> {
        if !dag.is_prepared() {
            anyhow::bail!("only a prepared graph can be embedded as a transformer");
        }
        Ok(Arc::new(NestedDag { dag: Arc::new(dag) }))
    }

    pub fn dag(&self) -> &DagStructure {
        &self.dag
    }
}

impl Transform for NestedDag {
    fn signature(&self) -> Signature {
        Signature {
            class: "NestedDag",
            params: Vec::new(),
            nested: Some(self.dag.fingerprint().clone()),
        }
    }

    fn apply(&self, _state: Option<&ExecutionState>, inputs: &[Value]) -> anyhow::Result<Value> {
        let mut outputs = self.dag.eval_row(0, inputs)?;
        if outputs.len() == 1 {
            Ok(outputs.pop().unwrap_or(Value::Null))
        } else {
            Ok(Value::list(outputs))
        }
    }

    fn preferred_minibatch_size(&self) -> usize {
        self.dag.max_minibatch_size()
    }

    fn validate(&self, input_count: usize) -> Result<(), String> {
        let expected = self.dag.placeholders().len();
        if input_count == expected {
            Ok(())
        } else {
            Err(format!(
                "embedded graph expects {expected} inputs, got {input_count}"
            ))
        }
    }

    fn as_nested(&self) -> Option<&NestedDag> {
        Some(self)
    }
}
