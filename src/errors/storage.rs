// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Error types for intermediate-value storage back-ends.

use thiserror::Error;

/// A read or write failure on buffered or disk-backed intermediate storage.
///
/// Storage errors are fatal to the run that owns the writer or reader; there
/// are no retries at this layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// File I/O failure on a disk-backed writer or reader.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value chunk could not be encoded or decoded.
    #[error("storage codec error: {0}")]
    Codec(String),

    /// Encryption or decryption of a value chunk failed (bad key, truncated
    /// or tampered frame).
    #[error("storage crypto error: {0}")]
    Crypto(String),

    /// The writer was used after `close`, or a reader was requested from a
    /// writer in a state that cannot serve one.
    #[error("storage state error: {0}")]
    State(String),
}
