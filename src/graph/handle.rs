//! Opaque producer identities.
//!
//! Every producer instance carries a globally unique 128-bit random handle.
//! Handles compare and order bytewise, which gives the engine a deterministic
//! tiebreaker wherever "some stable order" is needed (interning, commutative
//! input sorting, scheduling). Cloning a producer mints a fresh handle, so
//! handle equality is instance identity, never value equality.

use std::fmt;
use uuid::Uuid;

/// Globally unique opaque identifier of a single producer instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProducerHandle(Uuid);

impl ProducerHandle {
    /// Mints a fresh random handle.
    pub fn new() -> Self {
        ProducerHandle(Uuid::new_v4())
    }

    /// First eight hex digits, for log lines and labels.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ProducerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProducerHandle({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique() {
        let a = ProducerHandle::new();
        let b = ProducerHandle::new();
        assert_ne!(a, b);
    }

    #[test]
    fn handles_order_totally() {
        let mut handles: Vec<ProducerHandle> = (0..16).map(|_| ProducerHandle::new()).collect();
        handles.sort();
        for w in handles.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }
}
