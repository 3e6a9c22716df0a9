// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! This module provides centralized message types for all diagnostic and
//! operational logging throughout the engine. Message types follow a
//! struct-based pattern with `Display` trait implementation to:
//!
//! * Eliminate magic strings scattered throughout the codebase
//! * Enable future internationalization without code changes
//! * Provide consistent, structured logging output
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::graph` - canonicalization and reduction events
//! * `messages::engine` - executor lifecycle and scheduling events
//!
//! # Usage
//!
//! ```rust
//! use trellis::observability::messages::{StructuredLog, graph::ReductionPassCompleted};
//!
//! let msg = ReductionPassCompleted {
//!     pass: 1,
//!     modifications: 3,
//!     fixed_point: false,
//! };
//!
//! msg.log();
//! ```

pub mod messages;

use tracing_subscriber::EnvFilter;

/// Installs a default `tracing` subscriber honoring `RUST_LOG`.
///
/// Library code never calls this; it is a convenience for binaries and
/// integration tests that want output. Safe to call more than once (later
/// calls are no-ops).
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
