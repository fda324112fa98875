//! Removal of nested stable regions of almost the same size.
//!
//! Every valid node is linked to its nearest valid ancestor when the two
//! differ in size by less than `duplicate_variation`. Links form stable
//! chains along every root-to-leaf path. A node is dropped when a more
//! stable node is linked to it along one path, above or below. Siblings
//! linked to one ancestor never compete with each other.

use std::cmp::Ordering;

use crate::recognize::{Stability, Verdict};
use crate::tree::{NodeId, RegionNode, RegionTree, NO_NODE};

/// Scratch for duplicate removal, reused across passes.
#[derive(Debug, Default)]
pub(crate) struct DuplicateFilter {
    /// Nearest valid strict ancestor of every node, or `NO_NODE`.
    nearest_valid: Vec<NodeId>,
    /// Nearest valid ancestor when similar in size, or `NO_NODE`.
    link: Vec<NodeId>,
    /// Most stable node of the chain above every node.
    best_above: Vec<NodeId>,
    /// Most stable node linked below every node, over all branches.
    best_below: Vec<NodeId>,
}

/// Stability order: lower variation, then lower level, then lower id.
fn compare(nodes: &[RegionNode], states: &[Stability], a: NodeId, b: NodeId) -> Ordering {
    let variation = |id: NodeId| states[id as usize].variation.unwrap_or(f32::INFINITY);
    variation(a)
        .total_cmp(&variation(b))
        .then(nodes[a as usize].gray_level.cmp(&nodes[b as usize].gray_level))
        .then(a.cmp(&b))
}

/// More stable of two optional nodes.
fn more_stable(nodes: &[RegionNode], states: &[Stability], a: NodeId, b: NodeId) -> NodeId {
    if a == NO_NODE {
        b
    } else if b == NO_NODE || compare(nodes, states, a, b).is_lt() {
        a
    } else {
        b
    }
}

impl DuplicateFilter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark every valid node with a more stable node on its chain as
    /// [`Verdict::Duplicate`]. Returns the number of marked nodes.
    pub(crate) fn apply(
        &mut self,
        tree: &RegionTree,
        states: &mut [Stability],
        duplicate_variation: f32,
    ) -> usize {
        let nodes = tree.nodes();
        for scratch in [
            &mut self.nearest_valid,
            &mut self.link,
            &mut self.best_above,
            &mut self.best_below,
        ] {
            scratch.clear();
            scratch.resize(nodes.len(), NO_NODE);
        }
        let is_valid = |states: &[Stability], id: NodeId| states[id as usize].verdict == Verdict::Valid;

        // Parents come before children in descending gray order.
        for &id in tree.gray_order().iter().rev() {
            let node = &nodes[id as usize];
            let ancestor = match node.parent {
                Some(p) if is_valid(states, p) => p,
                Some(p) => self.nearest_valid[p as usize],
                None => NO_NODE,
            };
            self.nearest_valid[id as usize] = ancestor;
            if ancestor == NO_NODE || !is_valid(states, id) {
                continue;
            }

            let grown = (nodes[ancestor as usize].size - node.size) as f32;
            if grown / (node.size as f32) < duplicate_variation {
                self.link[id as usize] = ancestor;
                self.best_above[id as usize] =
                    more_stable(nodes, states, ancestor, self.best_above[ancestor as usize]);
            }
        }

        // Children come before parents in ascending gray order.
        for &id in tree.gray_order() {
            let ancestor = self.link[id as usize];
            if ancestor == NO_NODE {
                continue;
            }
            let below = more_stable(nodes, states, id, self.best_below[id as usize]);
            self.best_below[ancestor as usize] =
                more_stable(nodes, states, below, self.best_below[ancestor as usize]);
        }

        let mut removed = 0;
        for &id in tree.gray_order() {
            if !is_valid(states, id) {
                continue;
            }
            let best = more_stable(
                nodes,
                states,
                self.best_above[id as usize],
                self.best_below[id as usize],
            );
            if best != NO_NODE && compare(nodes, states, best, id).is_lt() {
                states[id as usize].verdict = Verdict::Duplicate;
                removed += 1;
            }
        }
        removed
    }
}
