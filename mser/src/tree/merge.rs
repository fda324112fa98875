//! Merging patch trees along their seams.
//!
//! Patches are merged in a tournament: first neighboring column groups inside
//! every patch row (spans 1, 2, 4, ...), then neighboring row groups over the
//! full width. Patches are numbered row-major, so every group owns a
//! contiguous range of the global arena and all merges of one step run in
//! parallel on disjoint slices.
//!
//! Two components touching across a seam are joined with the union-find
//! procedure of Wilkinson et al., "Concurrent computation of attribute
//! filters on shared memory parallel machines" (2008), mirrored for trees
//! whose parents have higher gray levels.

use std::ops::Range;

use rayon::prelude::*;

use super::{NodeId, NodeState, PatchGrid, PatchTree, RegionNode, RegionTree, NO_NODE};
use crate::common::split_ranges_mut;
use crate::config::Connectivity;

/// Shared edge between two patch groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Seam {
    /// Between columns `x - 1` and `x`, rows `y0..y1`.
    Vertical { x: usize, y0: usize, y1: usize },
    /// Between rows `y - 1` and `y`, columns `x0..x1`.
    Horizontal { y: usize, x0: usize, x1: usize },
}

#[derive(Debug, Clone)]
pub(crate) struct MergeJob {
    pub seam: Seam,
    /// Arena range covering both groups.
    pub nodes: Range<usize>,
}

/// Merge steps of the tournament, each a list of independent jobs.
pub(crate) fn merge_schedule(grid: &PatchGrid, node_ranges: &[Range<usize>]) -> Vec<Vec<MergeJob>> {
    let (cols, rows) = (grid.cols(), grid.rows());
    let (xs, ys) = (grid.xs(), grid.ys());
    let group_nodes = |first: usize, last: usize| node_ranges[first].start..node_ranges[last].end;
    let mut steps = Vec::new();

    let mut span = 1;
    while span < cols {
        let mut jobs = Vec::new();
        for r in 0..rows {
            for c in (0..cols).step_by(2 * span) {
                if c + span >= cols {
                    continue;
                }
                let end = (c + 2 * span).min(cols);
                jobs.push(MergeJob {
                    seam: Seam::Vertical {
                        x: xs[c + span],
                        y0: ys[r],
                        y1: ys[r + 1],
                    },
                    nodes: group_nodes(r * cols + c, r * cols + end - 1),
                });
            }
        }
        steps.push(jobs);
        span *= 2;
    }

    let width = xs[cols];
    let mut span = 1;
    while span < rows {
        let mut jobs = Vec::new();
        for r in (0..rows).step_by(2 * span) {
            if r + span >= rows {
                continue;
            }
            let end = (r + 2 * span).min(rows);
            jobs.push(MergeJob {
                seam: Seam::Horizontal {
                    y: ys[r + span],
                    x0: 0,
                    x1: width,
                },
                nodes: group_nodes(r * cols, end * cols - 1),
            });
        }
        steps.push(jobs);
        span *= 2;
    }

    steps
}

impl RegionTree {
    /// Join all patch trees into one tree. No-op for a single patch.
    pub(crate) fn merge_patches(&mut self) {
        if self.patches.len() < 2 {
            return;
        }

        let steps = merge_schedule(&self.grid, &self.node_ranges);
        let connectivity = self.connectivity;
        for jobs in steps {
            self.generation += 1;
            let generation = self.generation;
            let ranges: Vec<Range<usize>> = jobs.iter().map(|j| j.nodes.clone()).collect();
            let slices = split_ranges_mut(&mut self.nodes, &ranges);
            let grid = &self.grid;
            let patches = &self.patches;

            let merged: usize = jobs
                .par_iter()
                .zip(slices.into_par_iter())
                .map(|(job, slice)| {
                    let mut slab = NodeSlab::new(slice, job.nodes.start, generation);
                    let owners = OwnerLookup { grid, patches };
                    walk_seam(&mut slab, &owners, job.seam, connectivity);
                    slab.merged
                })
                .sum();
            self.merged_count += merged;
        }
    }
}

/// Pixel owner lookup across all patches.
struct OwnerLookup<'a> {
    grid: &'a PatchGrid,
    patches: &'a [PatchTree],
}

impl OwnerLookup<'_> {
    #[inline]
    fn owner(&self, x: usize, y: usize) -> NodeId {
        self.patches[self.grid.patch_at(x, y)].owner(x, y)
    }
}

/// Connect owners of every neighboring pixel pair across `seam`.
fn walk_seam(slab: &mut NodeSlab, owners: &OwnerLookup, seam: Seam, connectivity: Connectivity) {
    let diagonal = connectivity == Connectivity::Eight;
    match seam {
        Seam::Vertical { x, y0, y1 } => {
            for y in y0..y1 {
                let a = owners.owner(x - 1, y);
                if a == NO_NODE {
                    continue;
                }
                slab.connect_owners(a, owners.owner(x, y));
                if diagonal {
                    if y > y0 {
                        slab.connect_owners(a, owners.owner(x, y - 1));
                    }
                    if y + 1 < y1 {
                        slab.connect_owners(a, owners.owner(x, y + 1));
                    }
                }
            }
        }
        Seam::Horizontal { y, x0, x1 } => {
            for x in x0..x1 {
                let a = owners.owner(x, y - 1);
                if a == NO_NODE {
                    continue;
                }
                slab.connect_owners(a, owners.owner(x, y));
                if diagonal {
                    if x > x0 {
                        slab.connect_owners(a, owners.owner(x - 1, y));
                    }
                    if x + 1 < x1 {
                        slab.connect_owners(a, owners.owner(x + 1, y));
                    }
                }
            }
        }
    }
}

/// Mutable view of a contiguous arena range addressed by global ids.
pub(crate) struct NodeSlab<'a> {
    nodes: &'a mut [RegionNode],
    base: usize,
    generation: u8,
    /// Nodes absorbed through this view.
    pub merged: usize,
}

impl<'a> NodeSlab<'a> {
    pub(crate) fn new(nodes: &'a mut [RegionNode], base: usize, generation: u8) -> Self {
        Self {
            nodes,
            base,
            generation,
            merged: 0,
        }
    }

    #[inline]
    fn get(&self, id: NodeId) -> &RegionNode {
        &self.nodes[id as usize - self.base]
    }

    #[inline]
    fn get_mut(&mut self, id: NodeId) -> &mut RegionNode {
        &mut self.nodes[id as usize - self.base]
    }

    #[inline]
    fn gray(&self, id: NodeId) -> u8 {
        self.get(id).gray_level
    }

    #[inline]
    fn connect_owners(&mut self, a: NodeId, b: NodeId) {
        if b != NO_NODE {
            self.connect(a, b);
        }
    }

    /// Surviving node of `id`'s level, compressing the alias path.
    ///
    /// A survivor is live when it absorbs a node, so generations along an
    /// alias path never decrease. A node absorbed into an alias that was
    /// already merged earlier is a stale merge.
    pub(crate) fn level_root(&mut self, id: NodeId) -> NodeId {
        let mut root = id;
        let mut previous = 0;
        while let NodeState::Merged { generation } = self.get(root).state {
            assert!(
                generation >= previous,
                "node {root} merged in generation {generation} before its alias (generation {previous})"
            );
            assert!(
                generation <= self.generation,
                "node {root} merged in generation {generation} after current {}",
                self.generation
            );
            previous = generation;
            root = self.get(root).parent.expect("merged node has a survivor");
        }

        let mut cursor = id;
        while cursor != root {
            let next = self.get(cursor).parent.expect("merged node has a survivor");
            self.get_mut(cursor).parent = Some(root);
            cursor = next;
        }
        root
    }

    /// Join the components of `a` and `b` and all their ancestors.
    pub(crate) fn connect(&mut self, a: NodeId, b: NodeId) {
        let mut x = self.level_root(a);
        let mut y = self.level_root(b);

        while x != y {
            // x is the lower node, or the larger id on a tie.
            let (gx, gy) = (self.gray(x), self.gray(y));
            if gx > gy || (gx == gy && x < y) {
                std::mem::swap(&mut x, &mut y);
            }

            let parent = self.get(x).parent;
            let z = parent.map(|p| self.level_root(p));
            match z {
                Some(z) if self.gray(z) <= self.gray(y) => x = z,
                _ => {
                    if self.gray(x) == self.gray(y) {
                        self.absorb(x, y);
                    } else {
                        self.attach(x, y);
                    }
                    match z {
                        Some(z) => {
                            x = y;
                            y = z;
                        }
                        None => break,
                    }
                }
            }
        }
    }

    /// Fold `x` into `y` at the same level.
    fn absorb(&mut self, x: NodeId, y: NodeId) {
        let generation = self.generation;
        let node = self.get_mut(x);
        assert!(
            node.state == NodeState::Live,
            "node {x} is already merged: {:?}",
            node.state
        );
        let own = node.own_size;
        node.state = NodeState::Merged { generation };
        node.parent = Some(y);
        node.own_size = 0;

        self.get_mut(y).own_size += own;
        self.merged += 1;
    }

    /// Make `y` the parent of `x`.
    fn attach(&mut self, x: NodeId, y: NodeId) {
        assert!(
            self.gray(x) < self.gray(y),
            "parent {y} (level {}) must be above child {x} (level {})",
            self.gray(y),
            self.gray(x)
        );
        self.get_mut(x).parent = Some(y);
    }
}
