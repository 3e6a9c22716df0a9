// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for canonicalization and reduction events.

use super::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// Canonicalization produced a deduplicated, phased graph.
///
/// # Log Level
/// `debug!` - High-volume diagnostic event
pub struct CanonicalizationCompleted {
    pub nodes: usize,
    pub phases: u32,
    pub outputs: usize,
}

impl Display for CanonicalizationCompleted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Canonicalized graph: {} nodes across {} phases, {} outputs",
            self.nodes, self.phases, self.outputs
        )
    }
}

impl StructuredLog for CanonicalizationCompleted {
    fn log(&self) {
        tracing::debug!(
            nodes = self.nodes,
            phases = self.phases,
            outputs = self.outputs,
            "{}",
            self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "canonicalization",
            span_name = name,
            nodes = self.nodes,
            phases = self.phases,
        )
    }
}

/// One reduction pass finished.
///
/// # Log Level
/// `debug!` - High-volume diagnostic event
pub struct ReductionPassCompleted {
    pub pass: usize,
    /// Cumulative rewrite count across the whole reduction so far.
    pub modifications: usize,
    pub fixed_point: bool,
}

impl Display for ReductionPassCompleted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.fixed_point {
            write!(
                f,
                "Reduction reached a fixed point after pass {} ({} rewrites total)",
                self.pass, self.modifications
            )
        } else {
            write!(
                f,
                "Reduction pass {} modified the graph ({} rewrites total)",
                self.pass, self.modifications
            )
        }
    }
}

impl StructuredLog for ReductionPassCompleted {
    fn log(&self) {
        tracing::debug!(
            pass = self.pass,
            modifications = self.modifications,
            fixed_point = self.fixed_point,
            "{}",
            self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "reduction_pass",
            span_name = name,
            pass = self.pass,
        )
    }
}

/// A rewrite rule replaced a producer.
///
/// # Log Level
/// `debug!` - High-volume diagnostic event
pub struct ProducerReplaced<'a> {
    pub rule: &'a str,
    pub from: &'a str,
    pub to: &'a str,
}

impl Display for ProducerReplaced<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Rule {} replaced {} with {}", self.rule, self.from, self.to)
    }
}

impl StructuredLog for ProducerReplaced<'_> {
    fn log(&self) {
        tracing::debug!(rule = self.rule, from = self.from, to = self.to, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("producer_replaced", span_name = name, rule = self.rule)
    }
}
