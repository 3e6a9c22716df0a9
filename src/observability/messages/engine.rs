// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for executor lifecycle and scheduling events.
//!
//! This module contains message types for logging events related to:
//! * Executor start and completion
//! * Phased round scheduling in the batched executor
//! * Preparation and view resolution
//! * Failure capture

use super::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// Execution started.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ExecutionStarted<'a> {
    pub executor: &'a str,
    pub nodes: usize,
    pub batches: u64,
    pub max_threads: usize,
}

impl Display for ExecutionStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Starting {} execution: {} nodes, {} batches, max_threads={}",
            self.executor, self.nodes, self.batches, self.max_threads
        )
    }
}

impl StructuredLog for ExecutionStarted<'_> {
    fn log(&self) {
        tracing::info!(
            executor = self.executor,
            nodes = self.nodes,
            batches = self.batches,
            max_threads = self.max_threads,
            "{}",
            self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "execution",
            span_name = name,
            executor = self.executor,
            nodes = self.nodes,
            batches = self.batches,
        )
    }
}

/// Execution finished and produced its outputs.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ExecutionCompleted<'a> {
    pub executor: &'a str,
    pub rows: u64,
    pub outputs: usize,
}

impl Display for ExecutionCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} execution completed: {} rows through {} outputs",
            self.executor, self.rows, self.outputs
        )
    }
}

impl StructuredLog for ExecutionCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            executor = self.executor,
            rows = self.rows,
            outputs = self.outputs,
            "{}",
            self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("execution_completed", span_name = name, executor = self.executor)
    }
}

/// A scheduling round of the batched executor began.
///
/// # Log Level
/// `debug!` - High-volume diagnostic event
pub struct RoundStarted {
    pub round: u32,
    pub sources: usize,
}

impl Display for RoundStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Round {} started with {} streaming sources",
            self.round, self.sources
        )
    }
}

impl StructuredLog for RoundStarted {
    fn log(&self) {
        tracing::debug!(round = self.round, sources = self.sources, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("round", span_name = name, round = self.round)
    }
}

/// A preparable transformer finished preparing.
///
/// # Log Level
/// `debug!` - High-volume diagnostic event
pub struct PreparationFinished<'a> {
    pub producer: &'a str,
    pub rows: u64,
}

impl Display for PreparationFinished<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Preparation of {} finished over {} rows",
            self.producer, self.rows
        )
    }
}

impl StructuredLog for PreparationFinished<'_> {
    fn log(&self) {
        tracing::debug!(producer = self.producer, rows = self.rows, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("preparation", span_name = name, producer = self.producer)
    }
}

/// A view resolved its constant after its parent finished preparing.
///
/// # Log Level
/// `debug!` - High-volume diagnostic event
pub struct ViewResolved<'a> {
    pub producer: &'a str,
}

impl Display for ViewResolved<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "View {} resolved", self.producer)
    }
}

impl StructuredLog for ViewResolved<'_> {
    fn log(&self) {
        tracing::debug!(producer = self.producer, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("view", span_name = name, producer = self.producer)
    }
}

/// Execution failed; the first captured cause is about to surface.
///
/// # Log Level
/// `error!` - Operator attention required
pub struct ExecutionFailed<'a> {
    pub executor: &'a str,
    pub error: &'a dyn std::fmt::Display,
}

impl Display for ExecutionFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} execution failed: {}", self.executor, self.error)
    }
}

impl StructuredLog for ExecutionFailed<'_> {
    fn log(&self) {
        tracing::error!(
            executor = self.executor,
            error = %self.error,
            "{}",
            self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!("execution_failed", span_name = name, executor = self.executor)
    }
}
