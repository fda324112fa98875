//! Stability recognition on a finalized region tree.
//!
//! The variation of a node is the relative growth of its component while the
//! threshold rises by `delta` levels. Stable regions are the local minima of
//! the variation along every branch that also pass the size and variation
//! limits.


use rayon::prelude::*;

use crate::common::split_ranges_mut;
use crate::config::Config;
use crate::tree::{NodeId, RegionNode, RegionTree};

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Verdict {
    /// Not judged yet, or a merged node.
    #[default]
    Unknown,
    Invalid,
    Valid,
    /// Valid but dropped in favor of a more stable nested region.
    Duplicate,
}

/// Recognition state of one node.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Stability {
    /// `None` until computed.
    pub variation: Option<f32>,
    /// A neighbor in the tree has a strictly lower variation.
    pub dominated: bool,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct StabilityParams {
    pub delta: u8,
    pub max_variation: f32,
    pub min_area: usize,
    pub max_area: usize,
}

impl From<&Config> for StabilityParams {
    fn from(config: &Config) -> Self {
        Self {
            delta: config.delta,
            max_variation: config.max_variation,
            min_area: config.min_area,
            max_area: config.max_area,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RecognitionStats {
    /// Number of variations computed.
    pub evaluations: usize,
    pub valid: usize,
}

// ============================================================================
// Variation
// ============================================================================

/// Relative size growth of `id` over `delta` levels.
///
/// Infinite when the tree ends before the window is covered.
pub(crate) fn variation(nodes: &[RegionNode], id: NodeId, delta: u8) -> f32 {
    let node = &nodes[id as usize];
    let limit = node.gray_level as u16 + delta as u16;

    let mut top = id;
    while let Some(parent) = nodes[top as usize].parent {
        if nodes[parent as usize].gray_level as u16 > limit {
            break;
        }
        top = parent;
    }

    let top = &nodes[top as usize];
    if top.parent.is_none() && (top.gray_level as u16) < limit {
        return f32::INFINITY;
    }
    (top.size - node.size) as f32 / node.size as f32
}

fn judge(state: &mut Stability, node: &RegionNode, params: &StabilityParams) -> bool {
    let variation = state.variation.expect("variation computed before judging");
    let size = node.size as usize;
    let valid = !state.dominated
        && size >= params.min_area
        && size <= params.max_area
        && variation < params.max_variation;
    state.verdict = if valid {
        Verdict::Valid
    } else {
        Verdict::Invalid
    };
    valid
}

// ============================================================================
// Recognizer
// ============================================================================

/// Per-node stability states, reused across passes.
#[derive(Debug, Default)]
pub(crate) struct Recognizer {
    states: Vec<Stability>,
    /// Immutable snapshot of all variations for the parallel comparison.
    variations: Vec<f32>,
    evaluations: usize,
}

impl Recognizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn states(&self) -> &[Stability] {
        &self.states
    }

    pub(crate) fn states_mut(&mut self) -> &mut [Stability] {
        &mut self.states
    }

    /// Judge every live node of `tree`.
    ///
    /// With `parallel` set and more than one patch, nodes are partitioned by
    /// patch. Both modes give the same verdicts.
    pub(crate) fn recognize(
        &mut self,
        tree: &RegionTree,
        params: &StabilityParams,
        parallel: bool,
    ) -> RecognitionStats {
        self.states.clear();
        self.states.resize(tree.nodes().len(), Stability::default());
        self.evaluations = 0;

        if parallel && tree.node_ranges().len() > 1 {
            self.recognize_parallel(tree, params)
        } else {
            self.recognize_serial(tree, params)
        }
    }

    /// Variation of `id`, computed at most once.
    fn memoized_variation(&mut self, nodes: &[RegionNode], id: NodeId, delta: u8) -> f32 {
        let state = &mut self.states[id as usize];
        match state.variation {
            Some(v) => v,
            None => {
                let v = variation(nodes, id, delta);
                state.variation = Some(v);
                self.evaluations += 1;
                v
            }
        }
    }

    fn recognize_serial(&mut self, tree: &RegionTree, params: &StabilityParams) -> RecognitionStats {
        let nodes = tree.nodes();

        for &id in tree.gray_order() {
            let var = self.memoized_variation(nodes, id, params.delta);
            if let Some(parent) = nodes[id as usize].parent {
                let parent_var = self.memoized_variation(nodes, parent, params.delta);
                if var > parent_var {
                    self.states[id as usize].dominated = true;
                } else if parent_var > var {
                    self.states[parent as usize].dominated = true;
                }
            }
        }

        let mut valid = 0;
        for &id in tree.gray_order() {
            if judge(&mut self.states[id as usize], &nodes[id as usize], params) {
                valid += 1;
            }
        }

        RecognitionStats {
            evaluations: self.evaluations,
            valid,
        }
    }

    fn recognize_parallel(&mut self, tree: &RegionTree, params: &StabilityParams) -> RecognitionStats {
        let nodes = tree.nodes();
        let ranges = tree.node_ranges();
        let delta = params.delta;

        // Variations of every partition's own nodes.
        let evaluations: usize = split_ranges_mut(&mut self.states, ranges)
            .into_par_iter()
            .zip(ranges.par_iter())
            .map(|(states, range)| {
                let mut count = 0;
                for (state, id) in states.iter_mut().zip(range.clone()) {
                    if nodes[id].is_live() {
                        state.variation = Some(variation(nodes, id as NodeId, delta));
                        count += 1;
                    }
                }
                count
            })
            .sum();

        self.variations.clear();
        self.variations
            .extend(self.states.iter().map(|s| s.variation.unwrap_or(f32::NAN)));
        let variations = &self.variations;

        // Compare with parents. Parents outside the partition are deferred.
        let deferred: Vec<Vec<NodeId>> = split_ranges_mut(&mut self.states, ranges)
            .into_par_iter()
            .zip(ranges.par_iter())
            .map(|(states, range)| {
                let mut foreign = Vec::new();
                for id in range.clone() {
                    let node = &nodes[id];
                    let Some(parent) = node.parent.filter(|_| node.is_live()) else {
                        continue;
                    };
                    let (var, parent_var) = (variations[id], variations[parent as usize]);
                    if var > parent_var {
                        states[id - range.start].dominated = true;
                    } else if parent_var > var {
                        if range.contains(&(parent as usize)) {
                            states[parent as usize - range.start].dominated = true;
                        } else {
                            foreign.push(parent);
                        }
                    }
                }
                foreign
            })
            .collect();

        for parent in deferred.into_iter().flatten() {
            self.states[parent as usize].dominated = true;
        }

        let valid: usize = split_ranges_mut(&mut self.states, ranges)
            .into_par_iter()
            .zip(ranges.par_iter())
            .map(|(states, range)| {
                let mut valid = 0;
                for (state, id) in states.iter_mut().zip(range.clone()) {
                    if nodes[id].is_live() && judge(state, &nodes[id], params) {
                        valid += 1;
                    }
                }
                valid
            })
            .sum();

        self.evaluations = evaluations;
        RecognitionStats { evaluations, valid }
    }
}
