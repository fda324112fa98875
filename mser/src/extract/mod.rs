//! Pixel extraction of accepted regions.
//!
//! All pixels are laid out in one buffer where every live node owns a
//! contiguous span: its own pixels first, followed by the spans of its
//! children. The pixels of any region are then a single slice. Exclusive
//! regions skip the spans of their nearest accepted descendants.

pub(crate) mod duplicates;


use std::sync::atomic::{AtomicU32, Ordering};

use glam::UVec2;
use rayon::prelude::*;

use crate::common::UnsafeSendPtr;
use crate::recognize::{Stability, Verdict};
use crate::region::{Bounds, Region};
use crate::tree::{LevelParams, NodeId, RegionTree, NO_NODE};

pub(crate) use duplicates::DuplicateFilter;

/// Span layout and pixel buffer, reused across passes.
#[derive(Debug, Default)]
pub(crate) struct PixelExtractor {
    span_start: Vec<u32>,
    cursor: Vec<u32>,
    atomic_cursor: Vec<AtomicU32>,
    points: Vec<UVec2>,
    accepted: Vec<NodeId>,
    /// Nearest accepted strict ancestor of every node, or `NO_NODE`.
    nearest_accepted: Vec<NodeId>,
    /// Spans claimed by nested accepted regions as `(ancestor, start, end)`,
    /// sorted.
    claims: Vec<(NodeId, u32, u32)>,
}

impl PixelExtractor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Regions of all nodes marked [`Verdict::Valid`], in ascending gray order.
    ///
    /// With `exclusive` set, pixels of a nested accepted region are reported
    /// only there and not again in its accepted ancestors.
    pub(crate) fn extract(
        &mut self,
        tree: &RegionTree,
        states: &[Stability],
        params: &LevelParams,
        exclusive: bool,
        parallel: bool,
    ) -> Vec<Region> {
        self.accepted.clear();
        self.accepted.extend(
            tree.gray_order()
                .iter()
                .copied()
                .filter(|&id| states[id as usize].verdict == Verdict::Valid),
        );
        if self.accepted.is_empty() {
            return Vec::new();
        }

        self.layout(tree);
        let parallel = parallel && tree.patches().len() > 1;
        if parallel {
            self.fill_parallel(tree);
        } else {
            self.fill_serial(tree);
        }
        self.claims.clear();
        if exclusive {
            self.claim_nested(tree, states);
        }

        let make_region = |&id: &NodeId| {
            let node = tree.node(id);
            let start = self.span_start[id as usize];
            let pixels = self.unclaimed_pixels(id, start, start + node.size);
            Region {
                gray_level: params.intensity(node.gray_level),
                variation: states[id as usize]
                    .variation
                    .expect("accepted region has a variation"),
                size: node.size as usize,
                bounds: Bounds::from_points(&pixels),
                pixels,
            }
        };

        if parallel {
            self.accepted.par_iter().map(make_region).collect()
        } else {
            self.accepted.iter().map(make_region).collect()
        }
    }

    /// Assign every live node its span start. Roots are laid out one after
    /// another, children follow their parent's own pixels.
    fn layout(&mut self, tree: &RegionTree) {
        let nodes = tree.nodes();
        self.span_start.clear();
        self.span_start.resize(nodes.len(), 0);
        self.cursor.clear();
        self.cursor.resize(nodes.len(), 0);

        let mut offset = 0u32;
        for &id in tree.gray_order().iter().rev() {
            let node = &nodes[id as usize];
            let start = match node.parent {
                Some(parent) => {
                    let start = self.cursor[parent as usize];
                    self.cursor[parent as usize] += node.size;
                    start
                }
                None => {
                    let start = offset;
                    offset += node.size;
                    start
                }
            };
            self.span_start[id as usize] = start;
            self.cursor[id as usize] = start + node.own_size;
        }

        self.points.clear();
        self.points.resize(offset as usize, UVec2::ZERO);
    }

    /// Record the span of every accepted node as claimed from its nearest
    /// accepted ancestor. Claims of one ancestor never overlap.
    fn claim_nested(&mut self, tree: &RegionTree, states: &[Stability]) {
        let nodes = tree.nodes();
        let accepted = |id: NodeId| states[id as usize].verdict == Verdict::Valid;
        self.nearest_accepted.clear();
        self.nearest_accepted.resize(nodes.len(), NO_NODE);

        for &id in tree.gray_order().iter().rev() {
            let node = &nodes[id as usize];
            let ancestor = match node.parent {
                Some(p) if accepted(p) => p,
                Some(p) => self.nearest_accepted[p as usize],
                None => NO_NODE,
            };
            self.nearest_accepted[id as usize] = ancestor;
            if ancestor != NO_NODE && accepted(id) {
                let start = self.span_start[id as usize];
                self.claims.push((ancestor, start, start + node.size));
            }
        }
        self.claims.sort_unstable();
    }

    /// Points of `start..end` outside the spans claimed from `id`.
    fn unclaimed_pixels(&self, id: NodeId, start: u32, end: u32) -> Vec<UVec2> {
        let first = self.claims.partition_point(|c| c.0 < id);
        let mut pixels = Vec::with_capacity((end - start) as usize);
        let mut cursor = start;
        for &(_, claim_start, claim_end) in self.claims[first..].iter().take_while(|c| c.0 == id) {
            pixels.extend_from_slice(&self.points[cursor as usize..claim_start as usize]);
            cursor = claim_end;
        }
        pixels.extend_from_slice(&self.points[cursor as usize..end as usize]);
        pixels
    }

    fn fill_serial(&mut self, tree: &RegionTree) {
        self.cursor.copy_from_slice(&self.span_start);
        for patch in tree.patches() {
            let rect = patch.rect;
            for (i, &owner) in patch.owners.iter().enumerate() {
                if owner == NO_NODE {
                    continue;
                }
                let slot = &mut self.cursor[owner as usize];
                self.points[*slot as usize] =
                    UVec2::new((rect.x + i % rect.width) as u32, (rect.y + i / rect.width) as u32);
                *slot += 1;
            }
        }
    }

    /// One worker per patch. Nodes spanning several patches hand out slots
    /// through atomic cursors, so every point is written exactly once.
    fn fill_parallel(&mut self, tree: &RegionTree) {
        self.atomic_cursor.clear();
        self.atomic_cursor
            .extend(self.span_start.iter().map(|&s| AtomicU32::new(s)));

        let points = UnsafeSendPtr::new(self.points.as_mut_ptr());
        let len = self.points.len();
        let cursor = &self.atomic_cursor;

        tree.patches().par_iter().for_each(|patch| {
            let rect = patch.rect;
            for (i, &owner) in patch.owners.iter().enumerate() {
                if owner == NO_NODE {
                    continue;
                }
                let slot = cursor[owner as usize].fetch_add(1, Ordering::Relaxed) as usize;
                assert!(slot < len, "pixel slot {slot} out of {len}");
                let point =
                    UVec2::new((rect.x + i % rect.width) as u32, (rect.y + i / rect.width) as u32);
                // SAFETY: every slot is handed out once by the atomic cursors
                // and lies inside the buffer.
                unsafe {
                    *points.get().add(slot) = point;
                }
            }
        });
    }
}
