// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Trellis: a dataflow execution engine for DAGs of trainable transformers.
//!
//! A pipeline is a directed acyclic graph of **producers** — placeholders,
//! generators, prepared transformers, trainable (preparable) transformers,
//! and views. Trellis canonicalizes the graph (deduplication, phases,
//! fingerprint), reduces it to a fixed point (constant folding, sub-DAG
//! inlining, idempotent collapsing), and executes it over a bulk dataset,
//! returning a fully prepared graph for later single-example inference plus,
//! optionally, the training-set outputs.

pub mod engine;        // DAG executors
pub mod errors;        // error handling
pub mod examples;      // demo producer vocabulary
pub mod graph;         // producers, canonicalization, DAG record
pub mod io;            // bulk readers/writers + storage back-ends
pub mod observability; // structured logging
pub mod reduce;        // graph rewrite rules
