// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Error types for graph construction, canonicalization, and reduction.
//!
//! Graph errors are fatal: they are raised before any execution starts and
//! abort the run. All variants implement `std::error::Error` via the
//! `thiserror` crate for consistent error handling.

use thiserror::Error;

/// A producer failed its own `validate()` check.
///
/// Raised eagerly during canonicalization and wrapped with the producer's
/// class and label so the offending vertex can be located in a large graph.
#[derive(Error, Debug)]
#[error("validation of {class} '{label}' failed: {reason}")]
pub struct ValidationError {
    /// Class name of the failing producer (its signature class).
    pub class: String,
    /// Human-readable label (class plus short handle).
    pub label: String,
    /// The reason reported by the producer itself.
    pub reason: String,
}

/// Errors raised while building, canonicalizing, or rewriting a producer graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// The graph contains a cycle. Producer trees are immutable so this can
    /// only arise from a corrupted adjacency structure; it is checked anyway
    /// because the canonicalizer's Kahn traversal detects it for free.
    #[error("cycle detected in producer graph near '{0}'")]
    Cycle(String),

    /// A placeholder is reachable from the outputs but was not declared in
    /// the ordered placeholder list.
    #[error("placeholder '{0}' is referenced by the graph but was not declared as an input")]
    UndeclaredPlaceholder(String),

    /// The same placeholder was declared more than once.
    #[error("placeholder '{0}' declared more than once")]
    DuplicatePlaceholder(String),

    /// A non-placeholder producer appeared in the declared placeholder list.
    #[error("producer '{0}' was declared as a placeholder but is not one")]
    InvalidPlaceholder(String),

    /// A positional placeholder appeared in a user-supplied graph. Positional
    /// placeholders exist only inside equality fingerprints.
    #[error("positional placeholder #{0} may not appear in a user graph")]
    ForeignPositional(usize),

    /// A view's sole parent must be a preparable transformer.
    #[error("view '{view}' requires a preparable parent, found {parent}")]
    ViewParent { view: String, parent: String },

    /// A rewrite rule attempted to introduce a placeholder that was not
    /// already part of the graph.
    #[error("a reduction attempted to introduce a new placeholder '{0}'")]
    PlaceholderIntroduced(String),

    /// A rewrite rule attempted to put a preparable transformer back into a
    /// graph that was already fully prepared.
    #[error("a reduction attempted to reintroduce preparable '{0}' into a prepared graph")]
    PreparableIntroduced(String),

    /// A rewrite rule attempted to replace a viewed preparable with a
    /// producer that has no prepared form for the views to observe.
    #[error("producer '{0}' is observed by a view and can only be replaced by another preparable")]
    ViewedReplacement(String),

    /// A producer failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
