//! Per-patch component tree construction.
//!
//! Linear-time immersion flood with one bucket per level (Nistér and
//! Stewénius, "Linear Time Maximally Stable Extremal Regions", ECCV 2008).
//! Pixels wait in the bucket of their level and the flood always continues
//! from the lowest waiting level. A pixel whose neighbor is lower is pushed
//! back, the flood descends into the neighbor and opens a new component.
//! Raising the water level closes components into their parents.

use arrayvec::ArrayVec;

use super::{LevelParams, NodeId, PatchRect, PatchTree, LEVELS};
use crate::config::Connectivity;
use crate::image::{GrayImage, PixelMask};

/// Flag bit of padding, masked and already reached pixels.
const VISITED: u8 = 0x80;

/// Low bits of a flag byte hold the next neighbor direction to explore.
const DIR_MASK: u8 = 0x0f;

/// An open component on the flood stack.
#[derive(Debug, Clone, Copy)]
struct ComponentSlot {
    node: NodeId,
    gray_level: u8,
    size: u32,
}

/// Scratch state for flooding one patch. Reused across images.
#[derive(Debug, Default)]
pub(crate) struct PatchBuilder {
    /// Padded width.
    stride: usize,
    rect: PatchRect,
    patch: u8,
    /// Processing level of every padded pixel.
    levels: Vec<u8>,
    /// `VISITED` plus next direction of every padded pixel.
    flags: Vec<u8>,
    /// Bucket heap storage, bucket `l` starts at `bucket_start[l]`.
    heap: Vec<u32>,
    bucket_start: Vec<u32>,
    bucket_top: Vec<u32>,
    /// One bit per level with a non-empty bucket.
    occupied: [u64; 4],
    stack: ArrayVec<ComponentSlot, LEVELS>,
    offsets: ArrayVec<isize, 8>,
}

impl PatchBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Flood every unmasked pixel of `rect` into `tree`.
    pub(crate) fn build(
        &mut self,
        image: &GrayImage,
        mask: &dyn PixelMask,
        params: &LevelParams,
        rect: PatchRect,
        patch: u8,
        tree: &mut PatchTree,
    ) {
        assert!(
            rect.width > 0 && rect.height > 0,
            "patch {patch} is empty: {rect:?}"
        );
        assert!(
            rect.x + rect.width <= image.width() && rect.y + rect.height <= image.height(),
            "patch {patch} {rect:?} exceeds image {}x{}",
            image.width(),
            image.height()
        );

        tree.reset(rect);
        self.prepare(image, mask, params, rect, patch);

        for py in 1..=rect.height {
            let row = py * self.stride;
            for px in 1..=rect.width {
                if self.flags[row + px] & VISITED == 0 {
                    self.flood(row + px, tree);
                }
            }
        }
    }

    /// Fill the padded level image, flags, bucket layout and direction table.
    fn prepare(
        &mut self,
        image: &GrayImage,
        mask: &dyn PixelMask,
        params: &LevelParams,
        rect: PatchRect,
        patch: u8,
    ) {
        self.rect = rect;
        self.patch = patch;
        self.stride = rect.width + 2;
        let padded = self.stride * (rect.height + 2);

        self.levels.clear();
        self.levels.resize(padded, 0);
        self.flags.clear();
        self.flags.resize(padded, VISITED);

        let mut histogram = [0u32; LEVELS];
        for py in 1..=rect.height {
            let y = rect.y + py - 1;
            let src = &image.row(y)[rect.x..rect.x + rect.width];
            let dst = py * self.stride + 1;
            for (i, &value) in src.iter().enumerate() {
                if mask.includes(rect.x + i, y) {
                    let level = params.level(value);
                    self.levels[dst + i] = level;
                    self.flags[dst + i] = 0;
                    histogram[level as usize] += 1;
                }
            }
        }

        self.bucket_start.clear();
        self.bucket_start.push(0);
        for level in 0..LEVELS {
            let start = self.bucket_start[level];
            self.bucket_start.push(start + histogram[level]);
        }
        self.bucket_top.clear();
        self.bucket_top.extend_from_slice(&self.bucket_start[..LEVELS]);
        self.heap.clear();
        self.heap.resize(self.bucket_start[LEVELS] as usize, 0);
        self.occupied = [0; 4];
        self.stack.clear();

        let w = self.stride as isize;
        self.offsets.clear();
        match params.connectivity {
            Connectivity::Four => self.offsets.extend([1, w, -1, -w]),
            Connectivity::Eight => self.offsets.extend([1, w + 1, w, w - 1, -1, -w - 1, -w, -w + 1]),
        }
    }

    /// Flood the connected unmasked area around `seed`.
    fn flood(&mut self, seed: usize, tree: &mut PatchTree) {
        let mut current = seed;
        let mut level = self.levels[current];
        self.flags[current] = VISITED;
        self.open(level, tree);

        loop {
            // Explore neighbors starting at the saved direction.
            let mut dir = (self.flags[current] & DIR_MASK) as usize;
            let mut descended = false;
            while dir < self.offsets.len() {
                let neighbor = (current as isize + self.offsets[dir]) as usize;
                dir += 1;
                if self.flags[neighbor] & VISITED != 0 {
                    continue;
                }
                self.flags[neighbor] = VISITED;
                let neighbor_level = self.levels[neighbor];
                if neighbor_level >= level {
                    self.push_pixel(neighbor, neighbor_level);
                } else {
                    self.flags[current] = VISITED | dir as u8;
                    self.push_pixel(current, level);
                    current = neighbor;
                    level = neighbor_level;
                    self.open(level, tree);
                    descended = true;
                    break;
                }
            }
            if descended {
                continue;
            }

            self.accumulate(current, tree);

            let Some(next) = self.pop_pixel() else {
                self.close_flood(tree);
                return;
            };
            current = next;
            let next_level = self.levels[current];
            if next_level > level {
                self.raise(next_level, tree);
                level = next_level;
            }
        }
    }

    /// Open a new component at `level` on top of the stack.
    fn open(&mut self, level: u8, tree: &mut PatchTree) {
        let node = tree.push_node(level, self.patch);
        self.stack.push(ComponentSlot {
            node,
            gray_level: level,
            size: 0,
        });
    }

    /// Add a fully explored pixel to the top component.
    fn accumulate(&mut self, pixel: usize, tree: &mut PatchTree) {
        let slot = self.stack.last_mut().expect("flood has an open component");
        slot.size += 1;
        tree.nodes[slot.node as usize].own_size += 1;

        let py = pixel / self.stride - 1;
        let px = pixel % self.stride - 1;
        tree.owners[py * self.rect.width + px] = slot.node;
    }

    /// Close components below `new_level`, merging into the next open one or
    /// opening a parent at `new_level`.
    fn raise(&mut self, new_level: u8, tree: &mut PatchTree) {
        loop {
            let top = self.stack.pop().expect("flood has an open component");
            tree.nodes[top.node as usize].size = top.size;

            match self.stack.last_mut() {
                Some(next) if next.gray_level <= new_level => {
                    next.size += top.size;
                    tree.nodes[top.node as usize].parent = Some(next.node);
                    if next.gray_level == new_level {
                        return;
                    }
                }
                _ => {
                    let node = tree.push_node(new_level, self.patch);
                    tree.nodes[top.node as usize].parent = Some(node);
                    self.stack.push(ComponentSlot {
                        node,
                        gray_level: new_level,
                        size: top.size,
                    });
                    return;
                }
            }
        }
    }

    /// Collapse the remaining stack into its bottom component, the root.
    fn close_flood(&mut self, tree: &mut PatchTree) {
        while let Some(top) = self.stack.pop() {
            tree.nodes[top.node as usize].size = top.size;
            if let Some(next) = self.stack.last_mut() {
                next.size += top.size;
                tree.nodes[top.node as usize].parent = Some(next.node);
            }
        }
    }

    #[inline]
    fn push_pixel(&mut self, pixel: usize, level: u8) {
        let l = level as usize;
        let top = &mut self.bucket_top[l];
        self.heap[*top as usize] = pixel as u32;
        *top += 1;
        self.occupied[l >> 6] |= 1u64 << (l & 63);
    }

    /// Pop a pixel from the lowest non-empty bucket.
    #[inline]
    fn pop_pixel(&mut self) -> Option<usize> {
        let word = self.occupied.iter().position(|&w| w != 0)?;
        let l = (word << 6) + self.occupied[word].trailing_zeros() as usize;

        let top = &mut self.bucket_top[l];
        *top -= 1;
        let pixel = self.heap[*top as usize] as usize;
        if *top == self.bucket_start[l] {
            self.occupied[word] &= !(1u64 << (l & 63));
        }
        Some(pixel)
    }
}
