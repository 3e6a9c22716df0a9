//! Static wiring of the batched executor.
//!
//! Built once per run, before any task is spawned. Every node is assigned a
//! **stream round** — the scheduling round in which its values flow through
//! the pipeline — and a set of delivery targets split into *live* targets
//! (consumers streaming in the same round) and *replay* targets (later-round
//! consumers, served from the node's recorded append buffer).
//!
//! Rounds realize the phase-barrier contract: a preparable consumes its
//! parents' stream sequentially during their round, finishes at the round
//! barrier, and streams its own column (the prepared-for-preparation-data
//! application) in the next round. Views resolve at the same barrier and
//! tile their constant alongside.
//!
//! Generators, constant-result transformers, and views are regenerated
//! rather than recorded when a later round needs them; everything else that
//! is consumed across a barrier, feeds a preparation finish, or surfaces as
//! a run output is recorded through a batch-append buffer.

use crate::graph::{DagStructure, ProducerKind};
use std::collections::BTreeMap;

/// One delivery edge: batch columns of the owning node go to input slot
/// `pos` of node `node`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Target {
    pub node: usize,
    pub pos: usize,
}

/// Scheduling role of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Role {
    /// Placeholder: reads its input reader sequentially.
    Source,
    /// Generator: synthesizes values from the row index.
    Generator,
    /// Prepared transformer: computes one task per ready batch.
    Apply,
    /// Preparable transformer: sequential intake during `intake_round`,
    /// finish at its barrier, optional application stream afterwards.
    Prepare {
        intake_round: u32,
        has_applier: bool,
        batch_mode: bool,
    },
    /// View: resolves once, then tiles its constant.
    View,
}

/// Per-node wiring.
#[derive(Clone, Debug)]
pub(crate) struct NodePlan {
    pub role: Role,
    /// Round in which this node's values stream.
    pub stream_round: u32,
    /// Same-round consumers, one entry per consuming edge.
    pub live: Vec<Target>,
    /// Later-round consumers, grouped by the round that serves them.
    pub replays: BTreeMap<u32, Vec<Target>>,
    /// Record the stream into an append buffer (replay, finish, or output).
    pub needs_append: bool,
    /// Output slots (indices into the graph's output list) served by this
    /// node.
    pub output_slots: Vec<usize>,
}

impl NodePlan {
    /// Number of consuming edges in the given round (append included).
    pub fn consumers_in_round(&self, round: u32) -> usize {
        if round == self.stream_round {
            self.live.len() + usize::from(self.needs_append)
        } else {
            self.replays.get(&round).map_or(0, Vec::len)
        }
    }
}

/// The full wiring: one plan per node plus the number of rounds to run.
pub(crate) struct Wiring {
    pub plans: Vec<NodePlan>,
    pub max_round: u32,
}

pub(crate) fn build_wiring(dag: &DagStructure, emit_outputs: bool) -> Wiring {
    let len = dag.len();

    // Pass 1: roles and stream rounds, in topological (arena) order.
    let mut plans: Vec<NodePlan> = Vec::with_capacity(len);
    for (index, node) in dag.nodes().iter().enumerate() {
        let parent_rounds = |plans: &Vec<NodePlan>| {
            dag.parents(index)
                .iter()
                .map(|&p| plans[p].stream_round)
                .max()
                .unwrap_or(0)
        };
        let (role, stream_round) = match node.kind() {
            ProducerKind::Placeholder { .. } => (Role::Source, 0),
            ProducerKind::Generator(_) => (Role::Generator, 0),
            ProducerKind::Prepared { .. } => (Role::Apply, parent_rounds(&plans)),
            ProducerKind::Preparable { op, .. } => {
                let intake_round = parent_rounds(&plans);
                let has_applier = dag
                    .children(index)
                    .iter()
                    .any(|&c| !dag.node(c).is_view())
                    || dag.output_indices().contains(&index);
                (
                    Role::Prepare {
                        intake_round,
                        has_applier,
                        batch_mode: matches!(op.mode(), crate::graph::PreparerMode::Batch),
                    },
                    intake_round + 1,
                )
            }
            ProducerKind::View { .. } => (Role::View, parent_rounds(&plans)),
        };
        plans.push(NodePlan {
            role,
            stream_round,
            live: Vec::new(),
            replays: BTreeMap::new(),
            needs_append: false,
            output_slots: Vec::new(),
        });
    }

    // Pass 2: delivery targets. Views subscribe to nothing; a preparable
    // consumes during its intake round; everything else consumes in its own
    // stream round.
    for consumer in 0..len {
        let consume_round = match plans[consumer].role {
            Role::View => continue,
            Role::Prepare { intake_round, .. } => intake_round,
            _ => plans[consumer].stream_round,
        };
        for (pos, &parent) in dag.parents(consumer).iter().enumerate() {
            let target = Target {
                node: consumer,
                pos,
            };
            if consume_round == plans[parent].stream_round {
                plans[parent].live.push(target);
            } else {
                plans[parent]
                    .replays
                    .entry(consume_round)
                    .or_default()
                    .push(target);
            }
        }
    }

    // Pass 3: appends and output slots.
    if emit_outputs {
        for (slot, &index) in dag.output_indices().iter().enumerate() {
            plans[index].output_slots.push(slot);
        }
    }
    for index in 0..len {
        // A batch-mode preparable's finish replays every parent's append; a
        // preparable with an applier streams from them too.
        let wants_parent_appends = match plans[index].role {
            Role::Prepare {
                has_applier,
                batch_mode,
                ..
            } => has_applier || batch_mode,
            _ => false,
        };
        if wants_parent_appends {
            for &parent in dag.parents(index) {
                plans[parent].needs_append = true;
            }
        }
    }
    for plan in plans.iter_mut() {
        let regenerable = matches!(plan.role, Role::Generator | Role::View);
        if !regenerable && !plan.replays.is_empty() {
            plan.needs_append = true;
        }
        // Views surface as constant readers, never as appends.
        if !plan.output_slots.is_empty() && !matches!(plan.role, Role::View) {
            plan.needs_append = true;
        }
    }

    let max_round = plans
        .iter()
        .map(|plan| match plan.role {
            Role::Prepare {
                intake_round,
                has_applier,
                ..
            } => {
                if has_applier {
                    plan.stream_round
                } else {
                    intake_round
                }
            }
            _ => {
                let replay_max = plan.replays.keys().next_back().copied().unwrap_or(0);
                plan.stream_round.max(replay_max)
            }
        })
        .max()
        .unwrap_or(0);

    Wiring { plans, max_round }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::examples::arithmetic::{Add, Sub};
    use crate::examples::stats::Mean;
    use crate::graph::{canonicalize, Producer};

    #[test]
    fn same_round_chain_stays_live() {
        let p0 = Producer::placeholder("x");
        let a = Producer::prepared(Add::new(), vec![p0.clone(), p0.clone()]);
        let b = Producer::prepared(Add::new(), vec![a.clone(), p0.clone()]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[b]).unwrap();
        let wiring = build_wiring(&dag, true);
        assert_eq!(wiring.max_round, 0);
        let p0_plan = &wiring.plans[0];
        // Three consuming edges of the placeholder, all live in round 0.
        assert_eq!(p0_plan.live.len(), 3);
        assert!(p0_plan.replays.is_empty());
    }

    #[test]
    fn preparation_splits_rounds() {
        let p0 = Producer::placeholder("x");
        let mean = Producer::preparable(Mean::new(), vec![p0.clone()]);
        let out = Producer::prepared(Sub::new(), vec![p0.clone(), mean]);
        let dag = canonicalize(std::slice::from_ref(&p0), &[out]).unwrap();
        let wiring = build_wiring(&dag, true);
        assert_eq!(wiring.max_round, 1);

        let p0_plan = &wiring.plans[0];
        // Mean's intake is live in round 0; Sub reads the replay in round 1.
        assert_eq!(p0_plan.live.len(), 1);
        assert_eq!(p0_plan.replays.len(), 1);
        assert!(p0_plan.needs_append);

        let mean_index = dag
            .nodes()
            .iter()
            .position(|n| n.class_name() == "Mean")
            .unwrap();
        let mean_plan = &wiring.plans[mean_index];
        assert_eq!(mean_plan.stream_round, 1);
        assert_eq!(mean_plan.live.len(), 1);
    }

    #[test]
    fn outputs_force_appends() {
        let p0 = Producer::placeholder("x");
        let dag = canonicalize(std::slice::from_ref(&p0), &[p0.clone()]).unwrap();
        let with_outputs = build_wiring(&dag, true);
        assert!(with_outputs.plans[0].needs_append);
        let without_outputs = build_wiring(&dag, false);
        assert!(!without_outputs.plans[0].needs_append);
    }
}
