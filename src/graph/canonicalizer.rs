//! Graph canonicalization.
//!
//! Takes the user's declared placeholders and output producers and builds the
//! canonical [`DagStructure`]:
//!
//! 1. **Edge discovery** — BFS upward from the outputs over an
//!    identity-keyed (handle-keyed) children map. Undeclared placeholders,
//!    positional placeholders, and views over non-preparables are rejected
//!    here.
//! 2. **Validation** — every discovered producer's `validate()` runs eagerly.
//! 3. **Deduplication** — a Kahn traversal over the identity graph, ordered
//!    by specificity, rewrites parent lists to canonical parents and interns
//!    each node by *value* equality, first instance wins. Identity keys and
//!    value keys never touch the same table: discovery adjacency stays
//!    handle-keyed while interning hashes structure. Mixing the two would
//!    merge semantically distinct nodes.
//! 4. **Phase assignment** — a second Kahn pass. Roots sit in phase 0; a
//!    preparable opens a new phase above its parents; prepared transformers
//!    and views are bumped past the phase of any preparable ancestor that
//!    shares their parents' maximum phase.
//! 5. **Fingerprint** — positional substitution plus a sentinel sink.
//!
//! Time is O(V + E); memory is bounded by one rewritten parent list per node.

use super::dag::DagStructure;
use super::fingerprint::Fingerprint;
use super::handle::ProducerHandle;
use super::priority_queue::{InternQueue, InternTask};
use super::producer::{Producer, ProducerKind};
use crate::errors::GraphError;
use crate::observability::messages::graph::CanonicalizationCompleted;
use crate::observability::messages::StructuredLog;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Value-equality key over a producer, used only by the intern table.
struct CanonicalKey(Arc<Producer>);

impl PartialEq for CanonicalKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.value_eq(&other.0)
    }
}

impl Eq for CanonicalKey {}

impl Hash for CanonicalKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.value_hash(state);
    }
}

/// Builds the canonical DAG for the given placeholders and outputs.
///
/// All declared placeholders are retained even when no output reaches them.
pub fn canonicalize(
    placeholders: &[Arc<Producer>],
    outputs: &[Arc<Producer>],
) -> Result<DagStructure, GraphError> {
    let declared = check_placeholders(placeholders)?;
    let (discovered, children_of) = discover(&declared, outputs)?;

    for producer in discovered.values() {
        producer.validate()?;
    }
    for placeholder in placeholders {
        placeholder.validate()?;
    }

    let canon_map = deduplicate(&discovered, &children_of)?;

    let canonical_outputs: Vec<Arc<Producer>> = outputs
        .iter()
        .map(|o| canon_map[&o.handle()].clone())
        .collect();

    let dag = assemble(placeholders, &canonical_outputs)?;
    CanonicalizationCompleted {
        nodes: dag.len(),
        phases: dag.phase_count(),
        outputs: dag.outputs().len(),
    }
    .log();
    Ok(dag)
}

/// Rejects duplicate and non-placeholder declarations.
fn check_placeholders(
    placeholders: &[Arc<Producer>],
) -> Result<HashSet<ProducerHandle>, GraphError> {
    let mut declared = HashSet::with_capacity(placeholders.len());
    for p in placeholders {
        if !p.is_placeholder() || p.positional_index().is_some() {
            return Err(GraphError::InvalidPlaceholder(p.label()));
        }
        if !declared.insert(p.handle()) {
            return Err(GraphError::DuplicatePlaceholder(p.label()));
        }
    }
    Ok(declared)
}

type IdentityChildren = HashMap<ProducerHandle, Vec<ProducerHandle>>;

/// BFS upward from the outputs. The children map is identity-keyed and keeps
/// duplicate edges (a child consuming one parent twice appears twice).
fn discover(
    declared: &HashSet<ProducerHandle>,
    outputs: &[Arc<Producer>],
) -> Result<(HashMap<ProducerHandle, Arc<Producer>>, IdentityChildren), GraphError> {
    let mut discovered: HashMap<ProducerHandle, Arc<Producer>> = HashMap::new();
    let mut children_of: IdentityChildren = HashMap::new();
    let mut queue: VecDeque<Arc<Producer>> = VecDeque::new();

    for output in outputs {
        if discovered.insert(output.handle(), output.clone()).is_none() {
            queue.push_back(output.clone());
        }
    }

    while let Some(producer) = queue.pop_front() {
        check_discovered(declared, &producer)?;
        for input in producer.inputs() {
            children_of
                .entry(input.handle())
                .or_default()
                .push(producer.handle());
            if discovered.insert(input.handle(), input.clone()).is_none() {
                queue.push_back(input.clone());
            }
        }
    }
    Ok((discovered, children_of))
}

fn check_discovered(
    declared: &HashSet<ProducerHandle>,
    producer: &Arc<Producer>,
) -> Result<(), GraphError> {
    if let Some(index) = producer.positional_index() {
        return Err(GraphError::ForeignPositional(index));
    }
    if producer.is_placeholder() && !declared.contains(&producer.handle()) {
        return Err(GraphError::UndeclaredPlaceholder(producer.label()));
    }
    if let ProducerKind::View { input, .. } = producer.kind() {
        if !input.is_preparable() {
            return Err(GraphError::ViewParent {
                view: producer.label(),
                parent: input.label(),
            });
        }
    }
    Ok(())
}

/// Specificity-ordered Kahn traversal interning each producer by value.
fn deduplicate(
    discovered: &HashMap<ProducerHandle, Arc<Producer>>,
    children_of: &IdentityChildren,
) -> Result<HashMap<ProducerHandle, Arc<Producer>>, GraphError> {
    let mut pending: HashMap<ProducerHandle, usize> = discovered
        .iter()
        .map(|(h, p)| (*h, p.inputs().len()))
        .collect();

    let mut queue = InternQueue::new();
    for (handle, producer) in discovered {
        if producer.inputs().is_empty() {
            queue.push(InternTask::new(*handle, producer.specificity()));
        }
    }

    let mut canon_map: HashMap<ProducerHandle, Arc<Producer>> = HashMap::new();
    let mut intern: HashMap<CanonicalKey, Arc<Producer>> = HashMap::new();
    let mut processed = 0usize;

    while let Some(task) = queue.pop() {
        let original = &discovered[&task.handle];
        processed += 1;

        let inputs = original.inputs();
        let rewritten: Vec<Arc<Producer>> = inputs
            .iter()
            .map(|i| canon_map[&i.handle()].clone())
            .collect();
        let changed = inputs
            .iter()
            .zip(rewritten.iter())
            .any(|(a, b)| !Arc::ptr_eq(a, b));
        let candidate = if changed {
            original.with_inputs(rewritten)
        } else {
            original.clone()
        };

        let canonical = intern
            .entry(CanonicalKey(candidate.clone()))
            .or_insert_with(|| candidate.clone())
            .clone();
        canon_map.insert(original.handle(), canonical);

        if let Some(children) = children_of.get(&task.handle) {
            for child in children {
                let count = pending
                    .get_mut(child)
                    .expect("child of a discovered producer is discovered");
                *count -= 1;
                if *count == 0 {
                    queue.push(InternTask::new(*child, discovered[child].specificity()));
                }
            }
        }
    }

    if processed != discovered.len() {
        let stuck = pending
            .iter()
            .find(|(_, &c)| c > 0)
            .map(|(h, _)| discovered[h].label())
            .unwrap_or_else(|| "<unknown>".to_string());
        return Err(GraphError::Cycle(stuck));
    }
    Ok(canon_map)
}

/// Builds the arena record over canonical producers.
pub(crate) fn assemble(
    placeholders: &[Arc<Producer>],
    outputs: &[Arc<Producer>],
) -> Result<DagStructure, GraphError> {
    // Collect the canonical node set: every producer reachable from the
    // outputs plus the declared placeholders (reachable or not).
    let mut set: HashMap<ProducerHandle, Arc<Producer>> = HashMap::new();
    let mut stack: Vec<Arc<Producer>> = Vec::new();
    for p in placeholders.iter().chain(outputs.iter()) {
        if set.insert(p.handle(), p.clone()).is_none() {
            stack.push(p.clone());
        }
    }
    while let Some(p) = stack.pop() {
        for input in p.inputs() {
            if set.insert(input.handle(), input.clone()).is_none() {
                stack.push(input.clone());
            }
        }
    }

    // Identity adjacency over the canonical set.
    let mut children_of: IdentityChildren = HashMap::new();
    for p in set.values() {
        for input in p.inputs() {
            children_of
                .entry(input.handle())
                .or_default()
                .push(p.handle());
        }
    }

    // Kahn pass assigning phases. `pre_anc[h]` is the maximum phase of any
    // preparable ancestor, which decides whether a prepared transformer or
    // view shares its parents' phase or opens the next one.
    let mut pending: HashMap<ProducerHandle, usize> =
        set.iter().map(|(h, p)| (*h, p.inputs().len())).collect();
    let mut ready: std::collections::BinaryHeap<std::cmp::Reverse<ProducerHandle>> = set
        .values()
        .filter(|p| p.inputs().is_empty())
        .map(|p| std::cmp::Reverse(p.handle()))
        .collect();

    let mut phase: HashMap<ProducerHandle, u32> = HashMap::new();
    let mut pre_anc: HashMap<ProducerHandle, Option<u32>> = HashMap::new();
    let mut topo: Vec<Arc<Producer>> = Vec::with_capacity(set.len());

    while let Some(std::cmp::Reverse(handle)) = ready.pop() {
        let producer = set[&handle].clone();
        let max_parent_phase = producer
            .inputs()
            .iter()
            .map(|i| phase[&i.handle()])
            .max();
        let ancestor = producer
            .inputs()
            .iter()
            .map(|i| {
                let inherited = pre_anc[&i.handle()];
                if i.is_preparable() {
                    Some(inherited.map_or(phase[&i.handle()], |a| a.max(phase[&i.handle()])))
                } else {
                    inherited
                }
            })
            .fold(None, |acc: Option<u32>, a| match (acc, a) {
                (Some(x), Some(y)) => Some(x.max(y)),
                (x, y) => x.or(y),
            });

        let own_phase = match producer.kind() {
            ProducerKind::Placeholder { .. } | ProducerKind::Generator(_) => 0,
            ProducerKind::Preparable { .. } => max_parent_phase.map_or(1, |p| p + 1),
            ProducerKind::Prepared { .. } | ProducerKind::View { .. } => {
                let p = max_parent_phase.unwrap_or(0);
                if ancestor == Some(p) && !producer.inputs().is_empty() {
                    p + 1
                } else {
                    p
                }
            }
        };

        phase.insert(handle, own_phase);
        pre_anc.insert(handle, ancestor);
        topo.push(producer);

        if let Some(children) = children_of.get(&handle) {
            for child in children {
                let count = pending.get_mut(child).expect("child in canonical set");
                *count -= 1;
                if *count == 0 {
                    ready.push(std::cmp::Reverse(*child));
                }
            }
        }
    }

    if topo.len() != set.len() {
        return Err(GraphError::Cycle("canonical graph".to_string()));
    }

    // Final arena order: declared placeholders first, then everything else
    // stably sorted by (phase, kind rank). The stable sort over a valid
    // topological order preserves parent-before-child within each group.
    let declared: HashSet<ProducerHandle> = placeholders.iter().map(|p| p.handle()).collect();
    let mut rest: Vec<Arc<Producer>> = topo
        .into_iter()
        .filter(|p| !declared.contains(&p.handle()))
        .collect();
    rest.sort_by_key(|p| (phase[&p.handle()], kind_rank(p)));

    let mut nodes: Vec<Arc<Producer>> = placeholders.to_vec();
    nodes.extend(rest);

    let index_by_handle: HashMap<ProducerHandle, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, p)| (p.handle(), i))
        .collect();

    let parents: Vec<Vec<usize>> = nodes
        .iter()
        .map(|p| {
            p.inputs()
                .iter()
                .map(|i| index_by_handle[&i.handle()])
                .collect()
        })
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (index, parent_list) in parents.iter().enumerate() {
        for &parent in parent_list {
            children[parent].push(index);
        }
    }

    let phases: Vec<u32> = nodes.iter().map(|p| phase[&p.handle()]).collect();

    // Derived per-node constancy: declared by roots, inherited by non-roots
    // whose parents are all constant; views are constant by definition.
    let mut constant: Vec<bool> = vec![false; nodes.len()];
    for (index, node) in nodes.iter().enumerate() {
        constant[index] = match node.kind() {
            ProducerKind::Placeholder { .. } => false,
            ProducerKind::Generator(op) => op.always_constant(),
            ProducerKind::Prepared { op, .. } => {
                op.always_constant()
                    || (!parents[index].is_empty()
                        && parents[index].iter().all(|&p| constant[p]))
            }
            ProducerKind::Preparable { .. } => {
                !parents[index].is_empty() && parents[index].iter().all(|&p| constant[p])
            }
            ProducerKind::View { .. } => true,
        };
    }

    let output_indices: Vec<usize> = outputs
        .iter()
        .map(|o| index_by_handle[&o.handle()])
        .collect();

    let is_prepared = !nodes.iter().any(|p| p.is_preparable());
    let max_parent_count = parents.iter().map(Vec::len).max().unwrap_or(0);
    let max_minibatch_size = nodes
        .iter()
        .filter_map(|p| p.transform_op().map(|op| op.preferred_minibatch_size()))
        .max()
        .unwrap_or(1)
        .max(1);
    let is_always_constant = output_indices.iter().all(|&i| constant[i]);
    let has_idempotent_preparers = nodes
        .iter()
        .filter_map(|p| p.prepare_op())
        .any(|op| op.idempotent_preparer());

    let fingerprint = Fingerprint::build(placeholders, outputs);

    Ok(DagStructure {
        placeholders: placeholders.to_vec(),
        outputs: outputs.to_vec(),
        nodes,
        phases,
        parents,
        children,
        output_indices,
        index_by_handle,
        is_prepared,
        max_parent_count,
        max_minibatch_size,
        is_always_constant,
        has_idempotent_preparers,
        fingerprint,
    })
}

fn kind_rank(producer: &Producer) -> u8 {
    match producer.kind() {
        ProducerKind::Placeholder { .. } | ProducerKind::Generator(_) => 0,
        ProducerKind::Preparable { .. } => 1,
        ProducerKind::View { .. } => 2,
        ProducerKind::Prepared { .. } => 3,
    }
}
