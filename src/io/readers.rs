// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Reader implementations and lazy combinators.
//!
//! Two families live here:
//!
//! * Concrete sources: [`VecReader`] over an in-memory column and
//!   [`ConstantReader`] broadcasting one value N times.
//! * Lazy combinators on `Arc<dyn ObjectReader>`: element-wise `mapped`,
//!   `filtered`, `flat_mapped`, a buffered seeded `shuffled`, and seeded
//!   `[a,b)` segment sampling, plus `zip_readers` / `split_reader` /
//!   `concat_readers` for tuple plumbing.
//!
//! # Sampling contract
//!
//! `sample_segment(lo, hi, seed)` includes row `i` iff a deterministic draw
//! in `[0,1)` derived from `(seed, i)` lands in `[lo, hi)`. Consequently two
//! disjoint segments under the same seed select disjoint row sets, and
//! segments that exactly cover `[0,1)` partition the reader.

use super::{ObjectIterator, ObjectReader};
use crate::errors::StorageError;
use crate::graph::Value;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

/// Reader over an immutable in-memory column.
#[derive(Clone)]
pub struct VecReader {
    values: Arc<Vec<Value>>,
}

impl VecReader {
    pub fn new(values: Vec<Value>) -> Self {
        VecReader {
            values: Arc::new(values),
        }
    }

    /// Wraps an existing shared column without copying.
    pub fn shared(values: Arc<Vec<Value>>) -> Self {
        VecReader { values }
    }
}

impl ObjectReader for VecReader {
    fn size64(&self) -> u64 {
        self.values.len() as u64
    }

    fn iter(&self) -> Box<dyn ObjectIterator> {
        Box::new(VecIterator {
            values: self.values.clone(),
            pos: 0,
        })
    }
}

struct VecIterator {
    values: Arc<Vec<Value>>,
    pos: usize,
}

impl ObjectIterator for VecIterator {
    fn next_value(&mut self) -> Result<Option<Value>, StorageError> {
        if self.pos < self.values.len() {
            let v = self.values[self.pos].clone();
            self.pos += 1;
            Ok(Some(v))
        } else {
            Ok(None)
        }
    }

    fn next_batch(&mut self, buf: &mut Vec<Value>, n: usize) -> Result<usize, StorageError> {
        let available = self.values.len() - self.pos;
        let take = available.min(n);
        buf.extend_from_slice(&self.values[self.pos..self.pos + take]);
        self.pos += take;
        Ok(take)
    }

    fn skip(&mut self, n: u64) -> Result<u64, StorageError> {
        let available = (self.values.len() - self.pos) as u64;
        let skipped = available.min(n);
        self.pos += skipped as usize;
        Ok(skipped)
    }
}

/// Reader broadcasting a single value `len` times, used for view outputs.
#[derive(Clone)]
pub struct ConstantReader {
    value: Value,
    len: u64,
}

impl ConstantReader {
    pub fn new(value: Value, len: u64) -> Self {
        ConstantReader { value, len }
    }
}

impl ObjectReader for ConstantReader {
    fn size64(&self) -> u64 {
        self.len
    }

    fn iter(&self) -> Box<dyn ObjectIterator> {
        Box::new(ConstantIterator {
            value: self.value.clone(),
            remaining: self.len,
        })
    }
}

struct ConstantIterator {
    value: Value,
    remaining: u64,
}

impl ObjectIterator for ConstantIterator {
    fn next_value(&mut self) -> Result<Option<Value>, StorageError> {
        if self.remaining > 0 {
            self.remaining -= 1;
            Ok(Some(self.value.clone()))
        } else {
            Ok(None)
        }
    }

    fn skip(&mut self, n: u64) -> Result<u64, StorageError> {
        let skipped = self.remaining.min(n);
        self.remaining -= skipped;
        Ok(skipped)
    }
}

/// Zips N parallel readers into one reader of N-tuples.
///
/// All parts must agree on length; the caller validates this (the executors
/// reject mismatched inputs before any zip is built).
pub fn zip_readers(parts: Vec<Arc<dyn ObjectReader>>) -> Arc<dyn ObjectReader> {
    Arc::new(ZipReader { parts })
}

struct ZipReader {
    parts: Vec<Arc<dyn ObjectReader>>,
}

impl ObjectReader for ZipReader {
    fn size64(&self) -> u64 {
        self.parts.iter().map(|p| p.size64()).min().unwrap_or(0)
    }

    fn iter(&self) -> Box<dyn ObjectIterator> {
        Box::new(ZipIterator {
            parts: self.parts.iter().map(|p| p.iter()).collect(),
            remaining: self.size64(),
        })
    }
}

struct ZipIterator {
    parts: Vec<Box<dyn ObjectIterator>>,
    remaining: u64,
}

impl ObjectIterator for ZipIterator {
    fn next_value(&mut self) -> Result<Option<Value>, StorageError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let mut row = Vec::with_capacity(self.parts.len());
        for part in &mut self.parts {
            match part.next_value()? {
                Some(v) => row.push(v),
                None => return Ok(None),
            }
        }
        self.remaining -= 1;
        Ok(Some(Value::list(row)))
    }

    fn skip(&mut self, n: u64) -> Result<u64, StorageError> {
        let mut skipped = u64::MAX;
        for part in &mut self.parts {
            skipped = skipped.min(part.skip(n)?);
        }
        if self.parts.is_empty() {
            skipped = 0;
        }
        self.remaining = self.remaining.saturating_sub(skipped);
        Ok(skipped)
    }
}

/// Splits a reader of N-tuples back into N parallel readers.
pub fn split_reader(reader: Arc<dyn ObjectReader>, arity: usize) -> Vec<Arc<dyn ObjectReader>> {
    (0..arity)
        .map(|i| {
            reader.clone().mapped(move |v| match v {
                Value::List(items) => items.get(i).cloned().unwrap_or(Value::Null),
                other => other,
            })
        })
        .collect()
}

/// Concatenates readers end to end.
pub fn concat_readers(parts: Vec<Arc<dyn ObjectReader>>) -> Arc<dyn ObjectReader> {
    Arc::new(ConcatReader { parts })
}

struct ConcatReader {
    parts: Vec<Arc<dyn ObjectReader>>,
}

impl ObjectReader for ConcatReader {
    fn size64(&self) -> u64 {
        self.parts.iter().map(|p| p.size64()).sum()
    }

    fn iter(&self) -> Box<dyn ObjectIterator> {
        Box::new(ConcatIterator {
            parts: self.parts.clone(),
            current: None,
            next_part: 0,
        })
    }
}

struct ConcatIterator {
    parts: Vec<Arc<dyn ObjectReader>>,
    current: Option<Box<dyn ObjectIterator>>,
    next_part: usize,
}

impl ObjectIterator for ConcatIterator {
    fn next_value(&mut self) -> Result<Option<Value>, StorageError> {
        loop {
            if let Some(it) = self.current.as_mut() {
                if let Some(v) = it.next_value()? {
                    return Ok(Some(v));
                }
                self.current = None;
            }
            if self.next_part >= self.parts.len() {
                return Ok(None);
            }
            self.current = Some(self.parts[self.next_part].iter());
            self.next_part += 1;
        }
    }
}

/// Deterministic draw in `[0,1)` from a seed and row index.
fn segment_draw(seed: u64, index: u64) -> f64 {
    let mut h = DefaultHasher::new();
    seed.hash(&mut h);
    index.hash(&mut h);
    // 53 mantissa bits give a uniform dyadic rational in [0,1).
    (h.finish() >> 11) as f64 / (1u64 << 53) as f64
}

/// Lazy combinators over shared readers.
pub trait ReaderCombinators {
    /// Element-wise transformation.
    fn mapped(self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Arc<dyn ObjectReader>;

    /// Keeps rows matching the predicate. Length is counted lazily on first
    /// use, so construction stays O(1).
    fn filtered(self, f: impl Fn(&Value) -> bool + Send + Sync + 'static)
        -> Arc<dyn ObjectReader>;

    /// Expands each row into zero or more rows.
    fn flat_mapped(
        self,
        f: impl Fn(Value) -> Vec<Value> + Send + Sync + 'static,
    ) -> Arc<dyn ObjectReader>;

    /// Seeded full shuffle. Buffers the sequence on first iteration.
    fn shuffled(self, seed: u64) -> Arc<dyn ObjectReader>;

    /// Seeded `[lo, hi)` segment sample; see the module docs for the
    /// disjointness and partition guarantees.
    fn sample_segment(self, lo: f64, hi: f64, seed: u64) -> Arc<dyn ObjectReader>;
}

impl ReaderCombinators for Arc<dyn ObjectReader> {
    fn mapped(self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Arc<dyn ObjectReader> {
        Arc::new(MapReader {
            inner: self,
            f: Arc::new(f),
        })
    }

    fn filtered(
        self,
        f: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Arc<dyn ObjectReader> {
        Arc::new(FilterReader {
            inner: self,
            pred: Arc::new(f),
            size: OnceLock::new(),
        })
    }

    fn flat_mapped(
        self,
        f: impl Fn(Value) -> Vec<Value> + Send + Sync + 'static,
    ) -> Arc<dyn ObjectReader> {
        Arc::new(FlatMapReader {
            inner: self,
            f: Arc::new(f),
            size: OnceLock::new(),
        })
    }

    fn shuffled(self, seed: u64) -> Arc<dyn ObjectReader> {
        Arc::new(ShuffleReader {
            inner: self,
            seed,
            buffered: OnceLock::new(),
        })
    }

    fn sample_segment(self, lo: f64, hi: f64, seed: u64) -> Arc<dyn ObjectReader> {
        Arc::new(SampleReader {
            inner: self,
            lo,
            hi,
            seed,
            size: OnceLock::new(),
        })
    }
}

type MapFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

struct MapReader {
    inner: Arc<dyn ObjectReader>,
    f: MapFn,
}

impl ObjectReader for MapReader {
    fn size64(&self) -> u64 {
        self.inner.size64()
    }

    fn iter(&self) -> Box<dyn ObjectIterator> {
        Box::new(MapIterator {
            inner: self.inner.iter(),
            f: self.f.clone(),
        })
    }
}

struct MapIterator {
    inner: Box<dyn ObjectIterator>,
    f: MapFn,
}

impl ObjectIterator for MapIterator {
    fn next_value(&mut self) -> Result<Option<Value>, StorageError> {
        Ok(self.inner.next_value()?.map(|v| (self.f)(v)))
    }

    fn skip(&mut self, n: u64) -> Result<u64, StorageError> {
        self.inner.skip(n)
    }
}

type PredFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

struct FilterReader {
    inner: Arc<dyn ObjectReader>,
    pred: PredFn,
    size: OnceLock<u64>,
}

impl ObjectReader for FilterReader {
    fn size64(&self) -> u64 {
        *self.size.get_or_init(|| {
            let mut it = self.inner.iter();
            let mut count = 0;
            while let Ok(Some(v)) = it.next_value() {
                if (self.pred)(&v) {
                    count += 1;
                }
            }
            count
        })
    }

    fn iter(&self) -> Box<dyn ObjectIterator> {
        Box::new(FilterIterator {
            inner: self.inner.iter(),
            pred: self.pred.clone(),
        })
    }
}

struct FilterIterator {
    inner: Box<dyn ObjectIterator>,
    pred: PredFn,
}

impl ObjectIterator for FilterIterator {
    fn next_value(&mut self) -> Result<Option<Value>, StorageError> {
        while let Some(v) = self.inner.next_value()? {
            if (self.pred)(&v) {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }
}

type FlatMapFn = Arc<dyn Fn(Value) -> Vec<Value> + Send + Sync>;

struct FlatMapReader {
    inner: Arc<dyn ObjectReader>,
    f: FlatMapFn,
    size: OnceLock<u64>,
}

impl ObjectReader for FlatMapReader {
    fn size64(&self) -> u64 {
        *self.size.get_or_init(|| {
            let mut it = self.inner.iter();
            let mut count = 0u64;
            while let Ok(Some(v)) = it.next_value() {
                count += (self.f)(v).len() as u64;
            }
            count
        })
    }

    fn iter(&self) -> Box<dyn ObjectIterator> {
        Box::new(FlatMapIterator {
            inner: self.inner.iter(),
            f: self.f.clone(),
            pending: Vec::new(),
        })
    }
}

struct FlatMapIterator {
    inner: Box<dyn ObjectIterator>,
    f: FlatMapFn,
    pending: Vec<Value>,
}

impl ObjectIterator for FlatMapIterator {
    fn next_value(&mut self) -> Result<Option<Value>, StorageError> {
        loop {
            if !self.pending.is_empty() {
                return Ok(Some(self.pending.remove(0)));
            }
            match self.inner.next_value()? {
                Some(v) => self.pending = (self.f)(v),
                None => return Ok(None),
            }
        }
    }
}

struct ShuffleReader {
    inner: Arc<dyn ObjectReader>,
    seed: u64,
    buffered: OnceLock<Arc<Vec<Value>>>,
}

impl ShuffleReader {
    fn buffer(&self) -> Arc<Vec<Value>> {
        self.buffered
            .get_or_init(|| {
                let mut values = Vec::with_capacity(self.inner.size64() as usize);
                let mut it = self.inner.iter();
                while let Ok(Some(v)) = it.next_value() {
                    values.push(v);
                }
                let mut rng = StdRng::seed_from_u64(self.seed);
                values.shuffle(&mut rng);
                Arc::new(values)
            })
            .clone()
    }
}

impl ObjectReader for ShuffleReader {
    fn size64(&self) -> u64 {
        self.inner.size64()
    }

    fn iter(&self) -> Box<dyn ObjectIterator> {
        Box::new(VecIterator {
            values: self.buffer(),
            pos: 0,
        })
    }
}

struct SampleReader {
    inner: Arc<dyn ObjectReader>,
    lo: f64,
    hi: f64,
    seed: u64,
    size: OnceLock<u64>,
}

impl SampleReader {
    fn included(&self, index: u64) -> bool {
        let draw = segment_draw(self.seed, index);
        draw >= self.lo && draw < self.hi
    }
}

impl ObjectReader for SampleReader {
    fn size64(&self) -> u64 {
        *self.size.get_or_init(|| {
            (0..self.inner.size64())
                .filter(|&i| self.included(i))
                .count() as u64
        })
    }

    fn iter(&self) -> Box<dyn ObjectIterator> {
        Box::new(SampleIterator {
            inner: self.inner.iter(),
            lo: self.lo,
            hi: self.hi,
            seed: self.seed,
            index: 0,
        })
    }
}

struct SampleIterator {
    inner: Box<dyn ObjectIterator>,
    lo: f64,
    hi: f64,
    seed: u64,
    index: u64,
}

impl ObjectIterator for SampleIterator {
    fn next_value(&mut self) -> Result<Option<Value>, StorageError> {
        while let Some(v) = self.inner.next_value()? {
            let draw = segment_draw(self.seed, self.index);
            self.index += 1;
            if draw >= self.lo && draw < self.hi {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::collect_reader;

    fn numbers(n: u64) -> Arc<dyn ObjectReader> {
        Arc::new(VecReader::new((0..n).map(|i| Value::I64(i as i64)).collect()))
    }

    #[test]
    fn vec_reader_bulk_and_skip() {
        let reader = numbers(10);
        let mut it = reader.iter();
        assert_eq!(it.skip(3).unwrap(), 3);
        let mut buf = Vec::new();
        assert_eq!(it.next_batch(&mut buf, 4).unwrap(), 4);
        assert_eq!(buf, vec![Value::I64(3), Value::I64(4), Value::I64(5), Value::I64(6)]);
        assert_eq!(it.skip(100).unwrap(), 3);
        assert_eq!(it.next_value().unwrap(), None);
    }

    #[test]
    fn zip_and_split_round() {
        let a = numbers(4);
        let b: Arc<dyn ObjectReader> = Arc::new(ConstantReader::new(Value::F64(0.5), 4));
        let zipped = zip_readers(vec![a, b]);
        assert_eq!(zipped.size64(), 4);
        let rows = collect_reader(zipped.as_ref()).unwrap();
        assert_eq!(rows[2], Value::list(vec![Value::I64(2), Value::F64(0.5)]));

        let parts = split_reader(zipped, 2);
        let left = collect_reader(parts[0].as_ref()).unwrap();
        assert_eq!(left, vec![Value::I64(0), Value::I64(1), Value::I64(2), Value::I64(3)]);
    }

    #[test]
    fn filter_counts_lazily() {
        let reader = numbers(10).filtered(|v| v.as_i64().unwrap() % 2 == 0);
        assert_eq!(reader.size64(), 5);
        let values = collect_reader(reader.as_ref()).unwrap();
        assert_eq!(values.len(), 5);
    }

    #[test]
    fn flat_map_expands() {
        let reader = numbers(3).flat_mapped(|v| vec![v.clone(), v]);
        assert_eq!(reader.size64(), 6);
    }

    #[test]
    fn shuffle_is_seed_deterministic() {
        let a = collect_reader(numbers(32).shuffled(7).as_ref()).unwrap();
        let b = collect_reader(numbers(32).shuffled(7).as_ref()).unwrap();
        let c = collect_reader(numbers(32).shuffled(8).as_ref()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        let mut sorted = a.clone();
        sorted.sort_by_key(|v| v.as_i64().unwrap());
        assert_eq!(sorted, collect_reader(numbers(32).as_ref()).unwrap());
    }

    #[test]
    fn sample_segments_partition() {
        let n = 200;
        let left = collect_reader(numbers(n).sample_segment(0.0, 0.35, 11).as_ref()).unwrap();
        let right = collect_reader(numbers(n).sample_segment(0.35, 1.0, 11).as_ref()).unwrap();

        // Disjoint.
        for v in &left {
            assert!(!right.contains(v));
        }

        // Exhaustive when the segments cover [0,1).
        let mut union: Vec<i64> = left
            .iter()
            .chain(right.iter())
            .map(|v| v.as_i64().unwrap())
            .collect();
        union.sort_unstable();
        assert_eq!(union, (0..n as i64).collect::<Vec<_>>());
    }

    #[test]
    fn sample_is_seed_deterministic() {
        let a = collect_reader(numbers(100).sample_segment(0.2, 0.6, 3).as_ref()).unwrap();
        let b = collect_reader(numbers(100).sample_segment(0.2, 0.6, 3).as_ref()).unwrap();
        assert_eq!(a, b);
    }
}
