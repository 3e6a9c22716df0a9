//! Working-graph state threaded through the rewrite rules.
//!
//! The context keeps the graph being rewritten apart from the immutable
//! producers it started from: replacements and in-place parent edits are
//! recorded in side tables (a mutation log), and only when a fixed point is
//! reached does `instantiate` rebuild real producer instances copy-on-write.
//! Equivalent in-place mutations therefore never force re-allocation during
//! the passes.

use crate::errors::GraphError;
use crate::graph::{DagStructure, Producer, ProducerHandle, ProducerKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Mutable rewrite state over one reduction run.
pub struct ReductionContext {
    placeholders: Vec<Arc<Producer>>,
    outputs: Vec<Arc<Producer>>,
    known_placeholders: HashSet<ProducerHandle>,
    /// Producer -> its replacement (chains allowed).
    replacements: HashMap<ProducerHandle, Arc<Producer>>,
    /// Producer -> overridden parent list (only when edited in place).
    parent_log: HashMap<ProducerHandle, Vec<Arc<Producer>>>,
    /// Producer -> number of views currently observing it.
    viewed: HashMap<ProducerHandle, usize>,
    is_prepared_dag: bool,
    modified: bool,
    modifications: usize,
    visited: HashSet<ProducerHandle>,
}

impl ReductionContext {
    pub(crate) fn new(dag: &DagStructure) -> Self {
        let mut viewed: HashMap<ProducerHandle, usize> = HashMap::new();
        for node in dag.nodes() {
            if let ProducerKind::View { input, .. } = node.kind() {
                *viewed.entry(input.handle()).or_default() += 1;
            }
        }
        ReductionContext {
            placeholders: dag.placeholders().to_vec(),
            outputs: dag.outputs().to_vec(),
            known_placeholders: dag.placeholders().iter().map(|p| p.handle()).collect(),
            replacements: HashMap::new(),
            parent_log: HashMap::new(),
            viewed,
            is_prepared_dag: dag.is_prepared(),
            modified: false,
            modifications: 0,
            visited: HashSet::new(),
        }
    }

    /// Follows the replacement chain to the producer currently standing in
    /// for `producer` in the working graph.
    pub fn resolve(&self, producer: &Arc<Producer>) -> Arc<Producer> {
        let mut current = producer.clone();
        while let Some(next) = self.replacements.get(&current.handle()) {
            current = next.clone();
        }
        current
    }

    /// `producer` is still part of the working graph (not replaced).
    pub fn is_current(&self, producer: &Arc<Producer>) -> bool {
        !self.replacements.contains_key(&producer.handle())
    }

    /// The producer's current parent list, each entry resolved.
    pub fn current_parents(&self, producer: &Arc<Producer>) -> Vec<Arc<Producer>> {
        let base = match self.parent_log.get(&producer.handle()) {
            Some(edited) => edited.clone(),
            None => producer.inputs().to_vec(),
        };
        base.iter().map(|p| self.resolve(p)).collect()
    }

    /// Edits the producer's parent list in place (no new instance until
    /// `instantiate`).
    pub fn set_parents(&mut self, producer: &Arc<Producer>, parents: Vec<Arc<Producer>>) {
        self.parent_log.insert(producer.handle(), parents);
        self.mark_modified();
    }

    /// Replaces `target` with `replacement` in the working graph, enforcing
    /// the rewrite constraints:
    ///
    /// * no placeholder may be introduced,
    /// * a prepared graph may not regain a preparable transformer,
    /// * a viewed producer may only be replaced by another preparable.
    pub fn replace(
        &mut self,
        target: &Arc<Producer>,
        replacement: Arc<Producer>,
    ) -> Result<(), GraphError> {
        self.check_subtree(&replacement)?;
        let views_on_target = self.viewed.get(&target.handle()).copied().unwrap_or(0);
        if views_on_target > 0 && !replacement.is_preparable() {
            return Err(GraphError::ViewedReplacement(target.label()));
        }

        // A replaced view stops observing its parent.
        if let ProducerKind::View { input, .. } = target.kind() {
            let parent = self.resolve(input);
            if let Some(count) = self.viewed.get_mut(&parent.handle()) {
                *count = count.saturating_sub(1);
            }
        }
        // Views tracking the target follow it onto the replacement.
        if views_on_target > 0 {
            *self.viewed.entry(replacement.handle()).or_default() += views_on_target;
            self.viewed.remove(&target.handle());
        }

        self.replacements.insert(target.handle(), replacement);
        self.mark_modified();
        Ok(())
    }

    /// Like [`ReductionContext::replace`] but fails when the target is
    /// observed by a view.
    pub fn replace_unviewed(
        &mut self,
        target: &Arc<Producer>,
        replacement: Arc<Producer>,
    ) -> Result<(), GraphError> {
        if self.is_viewed(target) {
            return Err(GraphError::ViewedReplacement(target.label()));
        }
        self.replace(target, replacement)
    }

    /// Non-failing variant: returns `false` (and does nothing) when the
    /// target is viewed.
    pub fn try_replace_unviewed(
        &mut self,
        target: &Arc<Producer>,
        replacement: Arc<Producer>,
    ) -> Result<bool, GraphError> {
        if self.is_viewed(target) {
            return Ok(false);
        }
        self.replace(target, replacement)?;
        Ok(true)
    }

    /// Whether any view currently observes this producer.
    pub fn is_viewed(&self, producer: &Arc<Producer>) -> bool {
        self.viewed
            .get(&producer.handle())
            .is_some_and(|&count| count > 0)
    }

    /// The graph being reduced was already fully prepared.
    pub fn is_prepared_dag(&self) -> bool {
        self.is_prepared_dag
    }

    /// This run reduces the whole graph, not an extracted subgraph.
    pub fn is_complete_graph_reduction(&self) -> bool {
        true
    }

    /// Ancestors of `producer` in the working graph, nearest first, bounded
    /// by `max_depth` levels.
    pub fn ancestors(&self, producer: &Arc<Producer>, max_depth: usize) -> Vec<Arc<Producer>> {
        let mut out = Vec::new();
        let mut frontier = vec![self.resolve(producer)];
        let mut seen = HashSet::new();
        for _ in 0..max_depth {
            let mut next = Vec::new();
            for p in &frontier {
                for parent in self.current_parents(p) {
                    if seen.insert(parent.handle()) {
                        out.push(parent.clone());
                        next.push(parent);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        out
    }

    pub(crate) fn outputs_snapshot(&self) -> Vec<Arc<Producer>> {
        self.outputs.clone()
    }

    pub(crate) fn mark_visited(&mut self, handle: ProducerHandle) -> bool {
        self.visited.insert(handle)
    }

    pub(crate) fn take_modified(&mut self) -> bool {
        std::mem::take(&mut self.modified)
    }

    pub(crate) fn modifications(&self) -> usize {
        self.modifications
    }

    /// Clears the per-pass visited set of producers no longer reachable.
    pub(crate) fn end_pass(&mut self) {
        self.visited.clear();
    }

    fn mark_modified(&mut self) {
        self.modified = true;
        self.modifications += 1;
    }

    /// Rejects replacement subtrees that introduce placeholders or, in a
    /// prepared graph, preparable transformers.
    fn check_subtree(&self, root: &Arc<Producer>) -> Result<(), GraphError> {
        let mut stack = vec![root.clone()];
        let mut seen = HashSet::new();
        while let Some(p) = stack.pop() {
            if !seen.insert(p.handle()) {
                continue;
            }
            if p.is_placeholder() && !self.known_placeholders.contains(&p.handle()) {
                return Err(GraphError::PlaceholderIntroduced(p.label()));
            }
            if self.is_prepared_dag && p.is_preparable() {
                return Err(GraphError::PreparableIntroduced(p.label()));
            }
            for input in p.inputs() {
                stack.push(input.clone());
            }
        }
        Ok(())
    }

    /// Materializes the reduced graph: every producer whose parents changed
    /// is re-instantiated (copy-on-write), everything untouched keeps its
    /// original instance.
    pub(crate) fn instantiate(&self) -> (Vec<Arc<Producer>>, Vec<Arc<Producer>>) {
        let mut memo: HashMap<ProducerHandle, Arc<Producer>> = HashMap::new();
        let outputs = self
            .outputs
            .iter()
            .map(|o| self.instantiate_producer(o, &mut memo))
            .collect();
        (self.placeholders.clone(), outputs)
    }

    fn instantiate_producer(
        &self,
        producer: &Arc<Producer>,
        memo: &mut HashMap<ProducerHandle, Arc<Producer>>,
    ) -> Arc<Producer> {
        let current = self.resolve(producer);
        if let Some(done) = memo.get(&current.handle()) {
            return done.clone();
        }
        let parents = self.current_parents(&current);
        let built: Vec<Arc<Producer>> = parents
            .iter()
            .map(|p| self.instantiate_producer(p, memo))
            .collect();
        let originals = current.inputs();
        let changed = originals.len() != built.len()
            || originals
                .iter()
                .zip(built.iter())
                .any(|(a, b)| !Arc::ptr_eq(a, b));
        let instance = if changed {
            current.with_inputs(built)
        } else {
            current.clone()
        };
        memo.insert(current.handle(), instance.clone());
        instance
    }
}
