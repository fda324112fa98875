//! Gray-level component tree over all pixels of an image.
//!
//! The image is split into a grid of patches. Each patch is flooded into its
//! own forest of [`RegionNode`]s by a [`PatchBuilder`], the patch arenas are
//! concatenated into one global arena and the patch trees are merged along
//! their seams. After [`RegionTree::finalize`] every live node knows its live
//! parent and subtree size, and live nodes are available in ascending gray
//! order.

pub(crate) mod builder;
pub(crate) mod merge;


use std::ops::Range;

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::config::{Connectivity, Parallelism};
use crate::image::{GrayImage, PixelMask};

pub(crate) use builder::PatchBuilder;

// ============================================================================
// Constants
// ============================================================================

/// Handle of a node in an arena.
pub(crate) type NodeId = u32;

/// Owner of a pixel excluded by the mask.
pub(crate) const NO_NODE: NodeId = u32::MAX;

/// Number of distinct processing levels.
pub(crate) const LEVELS: usize = 256;

// ============================================================================
// Nodes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    Live,
    /// Absorbed into its parent (same gray level) during merge step `generation`.
    Merged { generation: u8 },
}

/// One connected component at one processing level.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegionNode {
    pub gray_level: u8,
    pub patch: u8,
    pub state: NodeState,
    /// Live parent, or the survivor for merged nodes.
    pub parent: Option<NodeId>,
    /// Pixels whose level equals `gray_level`.
    pub own_size: u32,
    /// Pixels of the whole subtree.
    pub size: u32,
}

impl RegionNode {
    pub(crate) fn new(gray_level: u8, patch: u8) -> Self {
        Self {
            gray_level,
            patch,
            state: NodeState::Live,
            parent: None,
            own_size: 0,
            size: 0,
        }
    }

    #[inline]
    pub(crate) fn is_live(&self) -> bool {
        self.state == NodeState::Live
    }
}

/// Pixel-to-level mapping of one detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LevelParams {
    pub gray_mask: u8,
    pub level_shift: u8,
    pub connectivity: Connectivity,
}

impl LevelParams {
    #[inline]
    pub(crate) fn level(&self, value: u8) -> u8 {
        (value ^ self.gray_mask) >> self.level_shift
    }

    /// Inclusive image threshold of a processing level.
    ///
    /// Every value mapped to `level` lies within the threshold: the highest
    /// such value for dark regions, the lowest for bright regions.
    #[inline]
    pub(crate) fn intensity(&self, level: u8) -> u8 {
        let bucket_top = ((level as u16) << self.level_shift) | ((1u16 << self.level_shift) - 1);
        bucket_top as u8 ^ self.gray_mask
    }
}

// ============================================================================
// Patch grid
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct PatchRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl PatchRect {
    #[inline]
    pub(crate) fn area(&self) -> usize {
        self.width * self.height
    }
}

/// Column and row boundaries of the patch grid. Patches are numbered row-major.
#[derive(Debug, Clone, Default)]
pub(crate) struct PatchGrid {
    xs: SmallVec<[usize; 9]>,
    ys: SmallVec<[usize; 5]>,
}

impl PatchGrid {
    /// Grid for `parallelism`, with no more columns than pixels per row and
    /// no more rows than image rows.
    pub(crate) fn new(width: usize, height: usize, parallelism: Parallelism) -> Self {
        assert!(width > 0 && height > 0, "patch grid needs a non-empty image");
        let (cols, rows) = parallelism.grid();
        let cols = cols.min(width);
        let rows = rows.min(height);
        Self {
            xs: (0..=cols).map(|c| c * width / cols).collect(),
            ys: (0..=rows).map(|r| r * height / rows).collect(),
        }
    }

    #[inline]
    pub(crate) fn cols(&self) -> usize {
        self.xs.len() - 1
    }

    #[inline]
    pub(crate) fn rows(&self) -> usize {
        self.ys.len() - 1
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.cols() * self.rows()
    }

    pub(crate) fn xs(&self) -> &[usize] {
        &self.xs
    }

    pub(crate) fn ys(&self) -> &[usize] {
        &self.ys
    }

    pub(crate) fn rect(&self, index: usize) -> PatchRect {
        let (c, r) = (index % self.cols(), index / self.cols());
        PatchRect {
            x: self.xs[c],
            y: self.ys[r],
            width: self.xs[c + 1] - self.xs[c],
            height: self.ys[r + 1] - self.ys[r],
        }
    }

    /// Index of the patch containing pixel `(x, y)`.
    #[inline]
    pub(crate) fn patch_at(&self, x: usize, y: usize) -> usize {
        let c = self.xs.partition_point(|&b| b <= x) - 1;
        let r = self.ys.partition_point(|&b| b <= y) - 1;
        r * self.cols() + c
    }
}

// ============================================================================
// Patch tree
// ============================================================================

/// Forest built over one patch, reused across images.
#[derive(Debug, Default)]
pub(crate) struct PatchTree {
    pub rect: PatchRect,
    /// Node arena. Cleared between images, capacity is kept.
    pub nodes: Vec<RegionNode>,
    /// Owning node of every patch pixel, row-major, or [`NO_NODE`].
    pub owners: Vec<NodeId>,
}

impl PatchTree {
    pub(crate) fn reset(&mut self, rect: PatchRect) {
        self.rect = rect;
        self.nodes.clear();
        self.owners.clear();
        self.owners.resize(rect.area(), NO_NODE);
    }

    #[inline]
    pub(crate) fn push_node(&mut self, gray_level: u8, patch: u8) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(RegionNode::new(gray_level, patch));
        id
    }

    /// Owner of the pixel at image coordinates `(x, y)`.
    #[inline]
    pub(crate) fn owner(&self, x: usize, y: usize) -> NodeId {
        debug_assert!(x >= self.rect.x && x < self.rect.x + self.rect.width);
        debug_assert!(y >= self.rect.y && y < self.rect.y + self.rect.height);
        self.owners[(y - self.rect.y) * self.rect.width + (x - self.rect.x)]
    }
}

// ============================================================================
// Region tree
// ============================================================================

/// Global component tree of one detection pass.
#[derive(Debug, Default)]
pub(crate) struct RegionTree {
    width: usize,
    height: usize,
    connectivity: Connectivity,
    grid: PatchGrid,
    patches: Vec<PatchTree>,
    /// Range of every patch's nodes in the global arena.
    node_ranges: Vec<Range<usize>>,
    nodes: Vec<RegionNode>,
    /// Live nodes sorted by gray level, then id.
    gray_order: Vec<NodeId>,
    /// Start of every level in `gray_order`, plus the end.
    level_start: Vec<u32>,
    /// Merge step counter.
    generation: u8,
    merged_count: usize,
    finalized: bool,
}

impl RegionTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Build the tree of `image` for one pass.
    ///
    /// `builders` grows to one builder per patch and is reused across calls.
    pub(crate) fn build(
        &mut self,
        builders: &mut Vec<PatchBuilder>,
        image: &GrayImage,
        mask: &dyn PixelMask,
        params: &LevelParams,
        parallelism: Parallelism,
    ) {
        self.reset(image.width(), image.height(), params.connectivity, parallelism);
        if builders.len() < self.grid.len() {
            builders.resize_with(self.grid.len(), PatchBuilder::new);
        }

        let grid = &self.grid;
        if self.patches.len() == 1 {
            builders[0].build(image, mask, params, grid.rect(0), 0, &mut self.patches[0]);
        } else {
            self.patches
                .par_iter_mut()
                .zip(builders.par_iter_mut())
                .enumerate()
                .for_each(|(index, (patch, builder))| {
                    builder.build(image, mask, params, grid.rect(index), index as u8, patch);
                });
        }

        self.assemble();
        self.merge_patches();
        self.finalize();
    }

    fn reset(
        &mut self,
        width: usize,
        height: usize,
        connectivity: Connectivity,
        parallelism: Parallelism,
    ) {
        self.width = width;
        self.height = height;
        self.connectivity = connectivity;
        self.grid = PatchGrid::new(width, height, parallelism);
        let count = self.grid.len();
        self.patches.truncate(count);
        self.patches.resize_with(count, PatchTree::default);
        self.node_ranges.clear();
        self.nodes.clear();
        self.gray_order.clear();
        self.level_start.clear();
        self.generation = 0;
        self.merged_count = 0;
        self.finalized = false;
    }

    /// Concatenate patch arenas into the global arena, rebasing parents and
    /// owners to global ids.
    fn assemble(&mut self) {
        let total: usize = self.patches.iter().map(|p| p.nodes.len()).sum();
        self.nodes.reserve(total);

        for patch in &mut self.patches {
            let offset = self.nodes.len();
            let base = offset as NodeId;
            self.nodes.extend(patch.nodes.iter().map(|node| RegionNode {
                parent: node.parent.map(|p| p + base),
                ..*node
            }));
            if base > 0 {
                for owner in patch.owners.iter_mut().filter(|o| **o != NO_NODE) {
                    *owner += base;
                }
            }
            self.node_ranges.push(offset..self.nodes.len());
        }
    }

    /// Resolve merged aliases, rebuild subtree sizes and the gray order.
    pub(crate) fn finalize(&mut self) {
        let nodes = &self.nodes;
        self.patches.par_iter_mut().for_each(|patch| {
            for owner in patch.owners.iter_mut().filter(|o| **o != NO_NODE) {
                *owner = resolve(nodes, *owner);
            }
        });

        if self.merged_count > 0 {
            for id in 0..self.nodes.len() {
                if self.nodes[id].is_live() {
                    let parent = self.nodes[id].parent.map(|p| resolve(&self.nodes, p));
                    self.nodes[id].parent = parent;
                }
            }
        }

        let mut level_size = [0u32; LEVELS];
        for node in self.nodes.iter().filter(|n| n.is_live()) {
            level_size[node.gray_level as usize] += 1;
        }
        self.level_start.clear();
        self.level_start.push(0);
        for level in 0..LEVELS {
            let start = self.level_start[level];
            self.level_start.push(start + level_size[level]);
        }

        let live = self.level_start[LEVELS] as usize;
        self.gray_order.clear();
        self.gray_order.resize(live, 0);
        let mut cursor: Vec<u32> = self.level_start[..LEVELS].to_vec();
        for (id, node) in self.nodes.iter().enumerate() {
            if node.is_live() {
                let slot = &mut cursor[node.gray_level as usize];
                self.gray_order[*slot as usize] = id as NodeId;
                *slot += 1;
            }
        }

        if self.patches.len() > 1 {
            for node in self.nodes.iter_mut().filter(|n| n.is_live()) {
                node.size = node.own_size;
            }
            for i in 0..self.gray_order.len() {
                let id = self.gray_order[i] as usize;
                if let Some(parent) = self.nodes[id].parent {
                    let size = self.nodes[id].size;
                    self.nodes[parent as usize].size += size;
                }
            }
        }

        self.finalized = true;
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    #[inline]
    pub(crate) fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub(crate) fn height(&self) -> usize {
        self.height
    }

    pub(crate) fn grid(&self) -> &PatchGrid {
        &self.grid
    }

    pub(crate) fn patches(&self) -> &[PatchTree] {
        &self.patches
    }

    /// Node range of every patch in the global arena.
    pub(crate) fn node_ranges(&self) -> &[Range<usize>] {
        &self.node_ranges
    }

    pub(crate) fn nodes(&self) -> &[RegionNode] {
        &self.nodes
    }

    #[inline]
    pub(crate) fn node(&self, id: NodeId) -> &RegionNode {
        &self.nodes[id as usize]
    }

    /// Live nodes in ascending gray order.
    pub(crate) fn gray_order(&self) -> &[NodeId] {
        debug_assert!(self.finalized);
        &self.gray_order
    }

    /// Live nodes of one processing level.
    pub(crate) fn level_nodes(&self, level: u8) -> &[NodeId] {
        let start = self.level_start[level as usize] as usize;
        let end = self.level_start[level as usize + 1] as usize;
        &self.gray_order[start..end]
    }

    pub(crate) fn live_count(&self) -> usize {
        self.gray_order.len()
    }

    pub(crate) fn merged_count(&self) -> usize {
        self.merged_count
    }

    pub(crate) fn generation(&self) -> u8 {
        self.generation
    }

    /// Owning node of pixel `(x, y)` or [`NO_NODE`] if masked.
    #[inline]
    pub(crate) fn owner_at(&self, x: usize, y: usize) -> NodeId {
        self.patches[self.grid.patch_at(x, y)].owner(x, y)
    }
}

/// Follow merged aliases to the surviving node.
#[inline]
pub(crate) fn resolve(nodes: &[RegionNode], mut id: NodeId) -> NodeId {
    while let NodeState::Merged { .. } = nodes[id as usize].state {
        id = nodes[id as usize]
            .parent
            .expect("merged node must point at its survivor");
    }
    id
}
