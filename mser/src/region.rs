//! Detected region output types.

use glam::UVec2;

/// Inclusive pixel bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: UVec2,
    pub max: UVec2,
}

impl Bounds {
    /// Empty bounds that any point will expand.
    pub fn empty() -> Self {
        Self {
            min: UVec2::splat(u32::MAX),
            max: UVec2::ZERO,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    #[inline]
    pub fn include(&mut self, point: UVec2) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn from_points(points: &[UVec2]) -> Self {
        let mut bounds = Self::empty();
        for &p in points {
            bounds.include(p);
        }
        bounds
    }

    pub fn width(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.max.x - self.min.x + 1
        }
    }

    pub fn height(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.max.y - self.min.y + 1
        }
    }

    pub fn contains(&self, point: UVec2) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

/// A maximally stable extremal region.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Inclusive threshold of the region as an image intensity. Dark regions
    /// hold pixels at or below it, bright regions pixels at or above it.
    pub gray_level: u8,
    /// Relative area growth over the delta window. Lower is more stable.
    pub variation: f32,
    /// Pixels of the whole component, nested regions included.
    pub size: usize,
    /// Pixel coordinates. Order is unspecified. With exclusive pixels,
    /// pixels of nested reported regions are left out.
    pub pixels: Vec<UVec2>,
    /// Bounds of `pixels`.
    pub bounds: Bounds,
}

impl Region {
    /// Number of reported pixels.
    #[inline]
    pub fn area(&self) -> usize {
        self.pixels.len()
    }

    /// Mean pixel position.
    pub fn centroid(&self) -> glam::Vec2 {
        if self.pixels.is_empty() {
            return glam::Vec2::ZERO;
        }
        let sum = self
            .pixels
            .iter()
            .fold(glam::DVec2::ZERO, |acc, p| acc + p.as_dvec2());
        (sum / self.pixels.len() as f64).as_vec2()
    }
}
