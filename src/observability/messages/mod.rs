// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging and tracing.
//!
//! Each message type implements:
//!
//! * `Display` - Human-readable output (supports future i18n)
//! * `StructuredLog` - Machine-readable fields + span creation
//!
//! # Organization
//!
//! * `graph` - canonicalization and reduction events
//! * `engine` - executor lifecycle and scheduling events
//!
//! # Usage Patterns
//!
//! ## Basic Logging (Human-Readable)
//! ```rust
//! use trellis::observability::messages::engine::ExecutionStarted;
//!
//! let msg = ExecutionStarted {
//!     executor: "batch",
//!     nodes: 5,
//!     batches: 12,
//!     max_threads: 4,
//! };
//!
//! tracing::info!("{}", msg);
//! ```
//!
//! ## Structured Logging (Machine-Readable)
//! ```rust
//! use trellis::observability::messages::{StructuredLog, engine::ExecutionStarted};
//!
//! let msg = ExecutionStarted {
//!     executor: "batch",
//!     nodes: 5,
//!     batches: 12,
//!     max_threads: 4,
//! };
//!
//! // Emits both the human-readable message AND structured fields.
//! msg.log();
//! ```

pub mod engine;
pub mod graph;

use tracing::Span;

/// Trait for messages that support structured logging and tracing.
///
/// Structured fields make log events queryable without string parsing and
/// stay stable when the human-readable wording changes. The appropriate log
/// level (debug, info, warn, error) is fixed by each message type's semantic
/// meaning, not chosen at the call site.
pub trait StructuredLog {
    /// Emit a log event with structured fields.
    fn log(&self);

    /// Create a span carrying the message fields as attributes.
    fn span(&self, name: &str) -> Span;
}
