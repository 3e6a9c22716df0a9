// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The dynamic value type that crosses producer boundaries.
//!
//! Producers are heterogeneous: one vertex may emit sparse vectors while its
//! child emits scalars. `Value` is the closed union of everything the engine
//! moves between vertices, cheap to clone (aggregate variants are
//! reference-counted) and serializable so batches can spill to disk.
//!
//! Equality is structural and, for floats, bit-exact (`to_bits`) — so is the
//! hash, which is what deduplication and constant folding need: two constants
//! are merged only when they are the same bits, and equal values always land
//! in the same intern bucket.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A single per-example value flowing through the graph.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum Value {
    /// Absent value; also the input fed to always-constant transformers when
    /// they are folded without real data.
    #[default]
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(Arc<str>),
    /// Dense vector of f64 components.
    Dense(Arc<Vec<f64>>),
    /// Sparse vector: index -> component, indices unbounded.
    Sparse(Arc<BTreeMap<u64, f64>>),
    /// Tuple of values, used for multi-output sub-DAGs and zipped streams.
    List(Arc<Vec<Value>>),
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn dense(v: Vec<f64>) -> Self {
        Value::Dense(Arc::new(v))
    }

    pub fn sparse(entries: impl IntoIterator<Item = (u64, f64)>) -> Self {
        Value::Sparse(Arc::new(entries.into_iter().collect()))
    }

    pub fn list(values: Vec<Value>) -> Self {
        Value::List(Arc::new(values))
    }

    /// Short class name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::Str(_) => "str",
            Value::Dense(_) => "dense",
            Value::Sparse(_) => "sparse",
            Value::List(_) => "list",
        }
    }

    /// Numeric coercion: `I64` and `F64` read as f64, everything else is
    /// rejected.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric coercion that reports the offending type on failure.
    pub fn expect_f64(&self) -> anyhow::Result<f64> {
        self.as_f64()
            .ok_or_else(|| anyhow::anyhow!("expected a numeric value, found {}", self.type_name()))
    }

    pub fn expect_list(&self) -> anyhow::Result<&[Value]> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(anyhow::anyhow!(
                "expected a tuple value, found {}",
                other.type_name()
            )),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Dense(v) => write!(f, "dense[{}]", v.len()),
            Value::Sparse(v) => write!(f, "sparse[{}]", v.len()),
            Value::List(v) => write!(f, "tuple[{}]", v.len()),
        }
    }
}

// Bit-exact float comparison, consistent with `Hash` below. The derived
// impl would use IEEE-754 equality (`0.0 == -0.0`, `NaN != NaN`) and break
// the equal-implies-equal-hash contract the intern tables rely on.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Dense(a), Value::Dense(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Value::Sparse(a), Value::Sparse(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((i, x), (j, y))| i == j && x.to_bits() == y.to_bits())
            }
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::I64(v) => v.hash(state),
            Value::F64(v) => v.to_bits().hash(state),
            Value::Str(v) => v.hash(state),
            Value::Dense(v) => {
                v.len().hash(state);
                for c in v.iter() {
                    c.to_bits().hash(state);
                }
            }
            Value::Sparse(v) => {
                v.len().hash(state);
                for (i, c) in v.iter() {
                    i.hash(state);
                    c.to_bits().hash(state);
                }
            }
            Value::List(v) => {
                v.len().hash(state);
                for item in v.iter() {
                    item.hash(state);
                }
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(Value::dense(vec![1.0, 2.0]), Value::dense(vec![1.0, 2.0]));
        assert_ne!(Value::dense(vec![1.0, 2.0]), Value::dense(vec![2.0, 1.0]));
        assert_eq!(
            Value::sparse([(0, 1.0), (7, 2.0)]),
            Value::sparse([(7, 2.0), (0, 1.0)])
        );
    }

    #[test]
    fn hash_agrees_with_equality() {
        let a = Value::list(vec![Value::I64(3), Value::F64(0.5)]);
        let b = Value::list(vec![Value::I64(3), Value::F64(0.5)]);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn float_equality_and_hash_are_bit_exact() {
        // Signed zeros are different bits: unequal, and hashed apart.
        assert_ne!(Value::F64(0.0), Value::F64(-0.0));
        assert_ne!(hash_of(&Value::F64(0.0)), hash_of(&Value::F64(-0.0)));
        assert_ne!(
            Value::dense(vec![0.0]),
            Value::dense(vec![-0.0])
        );

        // Identical bits are equal, NaN included, so equality stays
        // reflexive for interning.
        let nan = Value::F64(f64::NAN);
        assert_eq!(nan.clone(), nan);
        assert_eq!(hash_of(&nan.clone()), hash_of(&nan));
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::I64(3).as_f64(), Some(3.0));
        assert_eq!(Value::F64(0.25).as_f64(), Some(0.25));
        assert!(Value::str("x").as_f64().is_none());
        assert!(Value::Null.expect_f64().is_err());
    }
}
