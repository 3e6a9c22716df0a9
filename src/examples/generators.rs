//! Demo generators.

use crate::graph::{Generate, Signature, Value};
use std::sync::Arc;

/// Emits the example's own 64-bit row index.
#[derive(Clone, Debug)]
pub struct IndexGenerator;

impl IndexGenerator {
    pub fn new() -> Arc<dyn Generate> {
        Arc::new(IndexGenerator)
    }
}

impl Generate for IndexGenerator {
    fn signature(&self) -> Signature {
        Signature::new("IndexGenerator")
    }

    fn generate(&self, index: u64) -> Value {
        Value::I64(index as i64)
    }
}

/// A generator that computes the same expensive-looking value for every row
/// and says so, making it a constant-folding candidate.
#[derive(Clone, Debug)]
pub struct FixedSeed {
    pub seed: i64,
}

impl FixedSeed {
    pub fn new(seed: i64) -> Arc<dyn Generate> {
        Arc::new(FixedSeed { seed })
    }
}

impl Generate for FixedSeed {
    fn signature(&self) -> Signature {
        Signature::with_params("FixedSeed", vec![Value::I64(self.seed)])
    }

    fn generate(&self, _index: u64) -> Value {
        Value::I64(self.seed.wrapping_mul(0x5851_f42d_4c95_7f2d))
    }

    fn always_constant(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_generator_tracks_index() {
        assert_eq!(IndexGenerator.generate(5), Value::I64(5));
        assert_eq!(IndexGenerator.generate(0), Value::I64(0));
    }

    #[test]
    fn fixed_seed_ignores_index() {
        let g = FixedSeed { seed: 9 };
        assert_eq!(g.generate(0), g.generate(123));
        assert!(g.always_constant());
    }
}
