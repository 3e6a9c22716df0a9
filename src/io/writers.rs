//! Heap-backed writer.

use super::{ObjectReader, ObjectWriter, VecReader};
use crate::errors::StorageError;
use crate::graph::Value;
use std::sync::Arc;

/// Append-only in-memory writer.
///
/// On `close` the accumulated column is frozen into a single shared buffer;
/// every subsequent `reader()` call hands out the same `Arc`, so a column
/// serving several consumers (a later-phase replay and an emitted output,
/// say) is held in memory exactly once.
pub struct HeapWriter {
    pending: Vec<Value>,
    frozen: Option<Arc<Vec<Value>>>,
}

impl HeapWriter {
    pub fn new() -> Self {
        HeapWriter {
            pending: Vec::new(),
            frozen: None,
        }
    }
}

impl Default for HeapWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectWriter for HeapWriter {
    fn write(&mut self, value: Value) -> Result<(), StorageError> {
        if self.frozen.is_some() {
            return Err(StorageError::State("write after close".into()));
        }
        self.pending.push(value);
        Ok(())
    }

    fn write_all64(&mut self, values: &[Value]) -> Result<(), StorageError> {
        if self.frozen.is_some() {
            return Err(StorageError::State("write after close".into()));
        }
        self.pending.extend_from_slice(values);
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if self.frozen.is_none() {
            self.frozen = Some(Arc::new(std::mem::take(&mut self.pending)));
        }
        Ok(())
    }

    fn reader(&mut self) -> Result<Arc<dyn ObjectReader>, StorageError> {
        match &self.frozen {
            Some(buffer) => Ok(Arc::new(VecReader::shared(buffer.clone()))),
            // Snapshot of everything written so far; the writer stays open.
            None => Ok(Arc::new(VecReader::new(self.pending.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::collect_reader;

    #[test]
    fn close_then_read() {
        let mut w = HeapWriter::new();
        w.write(Value::I64(1)).unwrap();
        w.write_all64(&[Value::I64(2), Value::I64(3)]).unwrap();
        w.close().unwrap();
        let r = w.reader().unwrap();
        assert_eq!(r.size64(), 3);
        assert_eq!(
            collect_reader(r.as_ref()).unwrap(),
            vec![Value::I64(1), Value::I64(2), Value::I64(3)]
        );
    }

    #[test]
    fn write_after_close_is_rejected() {
        let mut w = HeapWriter::new();
        w.close().unwrap();
        assert!(w.write(Value::Null).is_err());
    }

    #[test]
    fn closed_readers_share_one_buffer() {
        let mut w = HeapWriter::new();
        w.write(Value::I64(9)).unwrap();
        w.close().unwrap();
        let a = w.reader().unwrap();
        let b = w.reader().unwrap();
        // Both readers look at the identical frozen column.
        assert_eq!(a.size64(), b.size64());
        assert_eq!(
            collect_reader(a.as_ref()).unwrap(),
            collect_reader(b.as_ref()).unwrap()
        );
    }
}
