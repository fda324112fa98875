//! Configuration types for MSER detection.
//!
//! This module defines the flat [`Config`] struct and associated enums used by
//! the detector. All parameters are grouped by comments into logical sections.

use strum_macros::{Display, EnumIter};

// ============================================================================
// Enums
// ============================================================================

/// Pixel connectivity used when flooding components and walking patch seams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter)]
pub enum Connectivity {
    /// Only horizontal and vertical neighbors.
    #[default]
    Four,
    /// Horizontal, vertical and diagonal neighbors.
    Eight,
}

/// Execution mode of tree building, recognition and extraction.
///
/// Parallel modes split the image into a fixed grid of patches, build one
/// component tree per patch on separate workers and merge the trees along
/// the patch seams. All modes produce the same regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter)]
pub enum Parallelism {
    /// One patch covering the whole image.
    #[default]
    Serial,
    /// 2x2 patch grid.
    Four,
    /// 8x4 patch grid.
    ThirtyTwo,
}

impl Parallelism {
    /// Patch grid as `(columns, rows)` before clamping to the image size.
    pub fn grid(self) -> (usize, usize) {
        match self {
            Self::Serial => (1, 1),
            Self::Four => (2, 2),
            Self::ThirtyTwo => (8, 4),
        }
    }

    pub fn is_parallel(self) -> bool {
        self != Self::Serial
    }
}

/// Which intensity extremes are detected.
///
/// Dark regions are components of pixels below a threshold (the tree is built
/// on the image as is). Bright regions use the inverted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter)]
pub enum Polarity {
    /// Dark regions on a brighter surrounding.
    #[default]
    Dark,
    /// Bright regions on a darker surrounding.
    Bright,
    /// Both passes, dark first.
    Both,
}

impl Polarity {
    /// Gray masks XOR-ed onto pixel values, one per detection pass.
    pub fn gray_masks(self) -> &'static [u8] {
        match self {
            Self::Dark => &[0x00],
            Self::Bright => &[0xff],
            Self::Both => &[0x00, 0xff],
        }
    }
}

// ============================================================================
// Detection Configuration
// ============================================================================

/// Configuration for the MSER detector.
///
/// # Example
///
/// ```rust,ignore
/// use mser::{Config, Parallelism, Polarity};
///
/// let config = Config {
///     delta: 2,
///     min_area: 16,
///     polarity: Polarity::Both,
///     parallelism: Parallelism::Four,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // -- Stability --
    /// Gray-level window used for the variation of a region.
    pub delta: u8,
    /// Regions with a variation at or above this value are rejected.
    pub max_variation: f32,

    // -- Region size --
    /// Minimum region area in pixels.
    pub min_area: usize,
    /// Maximum region area in pixels.
    pub max_area: usize,

    // -- Duplicate removal --
    /// Remove nested stable regions of almost the same size.
    pub remove_duplicates: bool,
    /// Relative size difference below which a stable region and its nearest
    /// stable ancestor are considered duplicates.
    pub duplicate_variation: f32,

    // -- Traversal --
    /// Pixel connectivity.
    pub connectivity: Connectivity,
    /// Dark regions, bright regions, or both.
    pub polarity: Polarity,
    /// Right shift applied to every pixel value before processing.
    /// 0 keeps all 256 levels, 1 processes 128 levels, and so on.
    pub level_shift: u8,

    // -- Output --
    /// Leave the pixels of nested reported regions out of their ancestors,
    /// so no pixel appears in two regions of one pass. When off, every
    /// region lists all pixels of its component.
    pub exclusive_pixels: bool,

    // -- Execution --
    /// Serial or patch-parallel processing.
    pub parallelism: Parallelism,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Stability
            delta: 5,
            max_variation: 0.25,

            // Region size
            min_area: 60,
            max_area: 14_400,

            // Duplicate removal
            remove_duplicates: true,
            duplicate_variation: 0.2,

            // Traversal
            connectivity: Connectivity::Four,
            polarity: Polarity::Dark,
            level_shift: 0,

            // Output
            exclusive_pixels: true,

            // Execution
            parallelism: Parallelism::Serial,
        }
    }
}

impl Config {
    /// Validate all parameters.
    ///
    /// # Panics
    ///
    /// Panics with a descriptive message if any parameter is out of range.
    pub fn validate(&self) {
        assert!(self.delta > 0, "delta must be > 0");
        assert!(
            self.max_variation > 0.0,
            "max_variation must be positive, got {}",
            self.max_variation
        );
        assert!(self.min_area > 0, "min_area must be > 0");
        assert!(
            self.max_area >= self.min_area,
            "max_area ({}) must be >= min_area ({})",
            self.max_area,
            self.min_area
        );
        assert!(
            self.duplicate_variation >= 0.0,
            "duplicate_variation must be non-negative, got {}",
            self.duplicate_variation
        );
        assert!(
            self.level_shift < 8,
            "level_shift must be < 8, got {}",
            self.level_shift
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate();
    }

    #[test]
    #[should_panic(expected = "delta must be > 0")]
    fn test_zero_delta_rejected() {
        Config {
            delta: 0,
            ..Default::default()
        }
        .validate();
    }

    #[test]
    #[should_panic(expected = "max_area")]
    fn test_inverted_area_bounds_rejected() {
        Config {
            min_area: 100,
            max_area: 10,
            ..Default::default()
        }
        .validate();
    }

    #[test]
    #[should_panic(expected = "level_shift")]
    fn test_level_shift_bound() {
        Config {
            level_shift: 8,
            ..Default::default()
        }
        .validate();
    }

    #[test]
    fn test_parallelism_grids() {
        let patches: Vec<usize> = Parallelism::iter()
            .map(|p| {
                let (cols, rows) = p.grid();
                cols * rows
            })
            .collect();
        assert_eq!(patches, vec![1, 4, 32]);
        assert!(!Parallelism::Serial.is_parallel());
        assert!(Parallelism::ThirtyTwo.is_parallel());
    }

    #[test]
    fn test_polarity_gray_masks() {
        assert_eq!(Polarity::Dark.gray_masks(), &[0x00]);
        assert_eq!(Polarity::Bright.gray_masks(), &[0xff]);
        assert_eq!(Polarity::Both.gray_masks(), &[0x00, 0xff]);
    }
}
