// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Storage policies for intermediate value columns.
//!
//! The batched executor buffers whole columns whenever a value stream must be
//! replayed after a preparation barrier or surfaced as a run output. Where
//! those buffers live is a per-run policy:
//!
//! * [`StoragePolicy::Heap`] — plain vectors; fastest, memory-bound.
//! * `Disk*` — chunked spill files in the system temp directory. Chunks are
//!   `bincode`-framed and may independently be compressed (`flate2` zlib) and
//!   encrypted (ChaCha20-Poly1305 with a random per-writer key held only in
//!   memory, so spill files are unreadable after the process exits).
//!
//! Frame layout per chunk: `[rows: u32][len: u64][payload]`, where the row
//! count is stored outside the payload so `skip` can hop whole chunks without
//! decoding them.

use super::{HeapWriter, ObjectIterator, ObjectReader, ObjectWriter};
use crate::errors::StorageError;
use crate::graph::Value;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Values per disk chunk. Large enough to amortize framing and cipher
/// overhead, small enough that `skip` stays responsive.
const CHUNK_ROWS: usize = 1024;

/// Where a run buffers replayable intermediate columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoragePolicy {
    /// In-memory vectors.
    #[default]
    Heap,
    /// Spill files, bincode-framed.
    Disk,
    /// Spill files with zlib-compressed chunks.
    DiskCompressed,
    /// Spill files with encrypted chunks.
    DiskEncrypted,
    /// Spill files with compressed-then-encrypted chunks.
    DiskCompressedEncrypted,
}

impl StoragePolicy {
    pub fn on_disk(self) -> bool {
        !matches!(self, StoragePolicy::Heap)
    }

    pub fn compressed(self) -> bool {
        matches!(
            self,
            StoragePolicy::DiskCompressed | StoragePolicy::DiskCompressedEncrypted
        )
    }

    pub fn encrypted(self) -> bool {
        matches!(
            self,
            StoragePolicy::DiskEncrypted | StoragePolicy::DiskCompressedEncrypted
        )
    }

    /// Creates a writer for one intermediate column under this policy.
    pub fn writer(self) -> Result<Box<dyn ObjectWriter>, StorageError> {
        if self.on_disk() {
            Ok(Box::new(DiskWriter::create(self)?))
        } else {
            Ok(Box::new(HeapWriter::new()))
        }
    }
}

impl std::fmt::Display for StoragePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StoragePolicy::Heap => "heap",
            StoragePolicy::Disk => "disk",
            StoragePolicy::DiskCompressed => "disk+zlib",
            StoragePolicy::DiskEncrypted => "disk+chacha20",
            StoragePolicy::DiskCompressedEncrypted => "disk+zlib+chacha20",
        };
        f.write_str(name)
    }
}

/// Chunked spill-file writer.
pub struct DiskWriter {
    file: Option<BufWriter<File>>,
    temp: Arc<NamedTempFile>,
    policy: StoragePolicy,
    key: Option<[u8; 32]>,
    pending: Vec<Value>,
    chunk_index: u64,
    count: u64,
}

impl DiskWriter {
    pub fn create(policy: StoragePolicy) -> Result<Self, StorageError> {
        let temp = NamedTempFile::new()?;
        let file = BufWriter::new(temp.reopen()?);
        let key = policy
            .encrypted()
            .then(|| rand::thread_rng().gen::<[u8; 32]>());
        Ok(DiskWriter {
            file: Some(file),
            temp: Arc::new(temp),
            policy,
            key,
            pending: Vec::with_capacity(CHUNK_ROWS),
            chunk_index: 0,
            count: 0,
        })
    }

    fn flush_chunk(&mut self) -> Result<(), StorageError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rows = self.pending.len() as u32;
        let mut payload = bincode::serialize(&self.pending)
            .map_err(|e| StorageError::Codec(e.to_string()))?;
        self.pending.clear();

        if self.policy.compressed() {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&payload)?;
            payload = encoder.finish()?;
        }
        if let Some(key) = &self.key {
            let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
            let nonce = chunk_nonce(self.chunk_index);
            payload = cipher
                .encrypt(Nonce::from_slice(&nonce), payload.as_ref())
                .map_err(|_| StorageError::Crypto("chunk encryption failed".into()))?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::State("write after close".into()))?;
        file.write_all(&rows.to_le_bytes())?;
        file.write_all(&(payload.len() as u64).to_le_bytes())?;
        file.write_all(&payload)?;
        self.chunk_index += 1;
        Ok(())
    }
}

fn chunk_nonce(chunk_index: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&chunk_index.to_le_bytes());
    nonce
}

impl ObjectWriter for DiskWriter {
    fn write(&mut self, value: Value) -> Result<(), StorageError> {
        if self.file.is_none() {
            return Err(StorageError::State("write after close".into()));
        }
        self.pending.push(value);
        self.count += 1;
        if self.pending.len() >= CHUNK_ROWS {
            self.flush_chunk()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.flush_chunk()?;
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn reader(&mut self) -> Result<Arc<dyn ObjectReader>, StorageError> {
        self.flush_chunk()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(Arc::new(DiskReader {
            temp: self.temp.clone(),
            policy: self.policy,
            key: self.key,
            count: self.count,
        }))
    }
}

/// Reader over a sealed spill file. Holds the temp file alive; each `iter()`
/// reopens it for an independent pass.
pub struct DiskReader {
    temp: Arc<NamedTempFile>,
    policy: StoragePolicy,
    key: Option<[u8; 32]>,
    count: u64,
}

impl ObjectReader for DiskReader {
    fn size64(&self) -> u64 {
        self.count
    }

    fn iter(&self) -> Box<dyn ObjectIterator> {
        Box::new(DiskIterator {
            file: self.temp.reopen().map(BufReader::new),
            policy: self.policy,
            key: self.key,
            chunk_index: 0,
            chunk: Vec::new(),
            chunk_pos: 0,
        })
    }
}

struct DiskIterator {
    file: std::io::Result<BufReader<File>>,
    policy: StoragePolicy,
    key: Option<[u8; 32]>,
    chunk_index: u64,
    chunk: Vec<Value>,
    chunk_pos: usize,
}

impl DiskIterator {
    /// Reads the next frame header, or `None` at end of file.
    fn read_header(file: &mut BufReader<File>) -> Result<Option<(u32, u64)>, StorageError> {
        let mut rows_buf = [0u8; 4];
        match file.read_exact(&mut rows_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let mut len_buf = [0u8; 8];
        file.read_exact(&mut len_buf)?;
        Ok(Some((
            u32::from_le_bytes(rows_buf),
            u64::from_le_bytes(len_buf),
        )))
    }

    fn load_next_chunk(&mut self) -> Result<bool, StorageError> {
        let file = self
            .file
            .as_mut()
            .map_err(|e| StorageError::Io(std::io::Error::new(e.kind(), e.to_string())))?;
        let Some((_, len)) = Self::read_header(file)? else {
            return Ok(false);
        };
        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload)?;

        if let Some(key) = &self.key {
            let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
            let nonce = chunk_nonce(self.chunk_index);
            payload = cipher
                .decrypt(Nonce::from_slice(&nonce), payload.as_ref())
                .map_err(|_| StorageError::Crypto("chunk decryption failed".into()))?;
        }
        if self.policy.compressed() {
            let mut decoder = ZlibDecoder::new(&payload[..]);
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed)?;
            payload = decompressed;
        }

        self.chunk =
            bincode::deserialize(&payload).map_err(|e| StorageError::Codec(e.to_string()))?;
        self.chunk_pos = 0;
        self.chunk_index += 1;
        Ok(true)
    }
}

impl ObjectIterator for DiskIterator {
    fn next_value(&mut self) -> Result<Option<Value>, StorageError> {
        loop {
            if self.chunk_pos < self.chunk.len() {
                let v = self.chunk[self.chunk_pos].clone();
                self.chunk_pos += 1;
                return Ok(Some(v));
            }
            if !self.load_next_chunk()? {
                return Ok(None);
            }
        }
    }

    fn skip(&mut self, n: u64) -> Result<u64, StorageError> {
        let mut remaining = n;
        // Drain the partially consumed chunk first.
        while remaining > 0 {
            let in_chunk = (self.chunk.len() - self.chunk_pos) as u64;
            if in_chunk > 0 {
                let take = in_chunk.min(remaining);
                self.chunk_pos += take as usize;
                remaining -= take;
                continue;
            }
            // Hop whole chunks without decoding; encrypted chunks must still
            // be counted for the nonce sequence.
            let file = match self.file.as_mut() {
                Ok(f) => f,
                Err(e) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        e.kind(),
                        e.to_string(),
                    )))
                }
            };
            let Some((rows, len)) = Self::read_header(file)? else {
                break;
            };
            if u64::from(rows) <= remaining {
                std::io::copy(&mut file.take(len), &mut std::io::sink())?;
                self.chunk_index += 1;
                remaining -= u64::from(rows);
            } else {
                // Partial chunk: decode it after all.
                let mut payload = vec![0u8; len as usize];
                file.read_exact(&mut payload)?;
                if let Some(key) = &self.key {
                    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
                    let nonce = chunk_nonce(self.chunk_index);
                    payload = cipher
                        .decrypt(Nonce::from_slice(&nonce), payload.as_ref())
                        .map_err(|_| StorageError::Crypto("chunk decryption failed".into()))?;
                }
                if self.policy.compressed() {
                    let mut decoder = ZlibDecoder::new(&payload[..]);
                    let mut decompressed = Vec::new();
                    decoder.read_to_end(&mut decompressed)?;
                    payload = decompressed;
                }
                self.chunk = bincode::deserialize(&payload)
                    .map_err(|e| StorageError::Codec(e.to_string()))?;
                self.chunk_index += 1;
                self.chunk_pos = remaining as usize;
                remaining = 0;
            }
        }
        Ok(n - remaining)
    }
}
