//! MSER detector implementation and related types.
//!
//! This module contains the main [`MserDetector`] struct which drives the
//! detection passes and owns the scratch memory reused between images.

#[cfg(test)]
mod tests;

// =============================================================================
// Imports
// =============================================================================

use strum_macros::Display;

use crate::config::Config;
use crate::extract::{DuplicateFilter, PixelExtractor};
use crate::image::{FullMask, GrayImage, PixelMask};
use crate::recognize::{Recognizer, StabilityParams};
use crate::region::Region;
use crate::tree::{LevelParams, PatchBuilder, RegionTree};

/// Which intensity extremes a region set holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Pass {
    /// Regions darker than their surrounding.
    Dark,
    /// Regions brighter than their surrounding.
    Bright,
}

impl Pass {
    fn from_gray_mask(gray_mask: u8) -> Self {
        if gray_mask == 0 {
            Self::Dark
        } else {
            Self::Bright
        }
    }
}

/// Diagnostic information from one detection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassDiagnostics {
    /// Number of image patches the tree was built on.
    pub patches: usize,
    /// Number of live nodes in the merged tree.
    pub tree_nodes: usize,
    /// Number of patch nodes absorbed while merging.
    pub merged_nodes: usize,
    /// Number of variations computed.
    pub variations_computed: usize,
    /// Number of stable regions before duplicate removal.
    pub stable_regions: usize,
    /// Number of stable regions removed as duplicates.
    pub duplicates_removed: usize,
}

/// Regions of one detection pass.
#[derive(Debug, Clone)]
pub struct RegionSet {
    pub pass: Pass,
    /// Regions sorted by gray level, darkest processing level first.
    pub regions: Vec<Region>,
    pub diagnostics: PassDiagnostics,
}

/// Result of MSER detection, one region set per pass.
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    pub sets: Vec<RegionSet>,
}

impl DetectionResult {
    /// Region set of `pass`, if it ran.
    pub fn set(&self, pass: Pass) -> Option<&RegionSet> {
        self.sets.iter().find(|s| s.pass == pass)
    }

    /// Total number of regions over all passes.
    pub fn region_count(&self) -> usize {
        self.sets.iter().map(|s| s.regions.len()).sum()
    }
}

// =============================================================================
// MserDetector
// =============================================================================

/// MSER detector.
///
/// Holds the configuration and all scratch memory (patch builders, node
/// arenas, recognition states, pixel buffers). Scratch grows to the largest
/// image seen and is kept until [`MserDetector::clear_memory_cache`].
///
/// # Example
///
/// ```rust,ignore
/// use mser::{Config, GrayImage, MserDetector, Polarity};
///
/// let mut detector = MserDetector::from_config(Config {
///     polarity: Polarity::Both,
///     ..Default::default()
/// });
/// let result = detector.detect(&GrayImage::new(width, height, &pixels));
/// ```
#[derive(Debug, Default)]
pub struct MserDetector {
    config: Config,
    builders: Vec<PatchBuilder>,
    tree: RegionTree,
    recognizer: Recognizer,
    duplicates: DuplicateFilter,
    extractor: PixelExtractor,
}

impl MserDetector {
    /// Create a new detector with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detector from an existing configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn from_config(config: Config) -> Self {
        config.validate();
        Self {
            config,
            ..Default::default()
        }
    }

    /// Get reference to the underlying configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Detect regions over every pixel of `image`.
    pub fn detect(&mut self, image: &GrayImage) -> DetectionResult {
        self.detect_masked(image, &FullMask)
    }

    /// Detect regions over the pixels included by `mask`.
    pub fn detect_masked(&mut self, image: &GrayImage, mask: &dyn PixelMask) -> DetectionResult {
        self.config.validate();
        if let Some((width, height)) = mask.dimensions() {
            assert!(
                width == image.width() && height == image.height(),
                "mask {width}x{height} does not match image {}x{}",
                image.width(),
                image.height()
            );
        }

        let gray_masks = self.config.polarity.gray_masks();
        let sets = gray_masks
            .iter()
            .map(|&gray_mask| {
                let pass = Pass::from_gray_mask(gray_mask);
                if image.is_empty() {
                    RegionSet {
                        pass,
                        regions: Vec::new(),
                        diagnostics: PassDiagnostics::default(),
                    }
                } else {
                    self.run_pass(image, mask, gray_mask, pass)
                }
            })
            .collect();

        DetectionResult { sets }
    }

    /// Release all scratch memory.
    pub fn clear_memory_cache(&mut self) {
        self.builders = Vec::new();
        self.tree = RegionTree::new();
        self.recognizer = Recognizer::new();
        self.duplicates = DuplicateFilter::new();
        self.extractor = PixelExtractor::new();
    }

    fn run_pass(
        &mut self,
        image: &GrayImage,
        mask: &dyn PixelMask,
        gray_mask: u8,
        pass: Pass,
    ) -> RegionSet {
        let config = &self.config;
        let parallel = config.parallelism.is_parallel();
        let params = LevelParams {
            gray_mask,
            level_shift: config.level_shift,
            connectivity: config.connectivity,
        };

        // Step 1: Component tree over all patches
        self.tree
            .build(&mut self.builders, image, mask, &params, config.parallelism);

        // Step 2: Stability
        let stats = self
            .recognizer
            .recognize(&self.tree, &StabilityParams::from(config), parallel);

        // Step 3: Duplicates
        let duplicates_removed = if config.remove_duplicates {
            self.duplicates.apply(
                &self.tree,
                self.recognizer.states_mut(),
                config.duplicate_variation,
            )
        } else {
            0
        };

        // Step 4: Pixels
        let regions = self
            .extractor
            .extract(
                &self.tree,
                self.recognizer.states(),
                &params,
                config.exclusive_pixels,
                parallel,
            );

        let diagnostics = PassDiagnostics {
            patches: self.tree.patches().len(),
            tree_nodes: self.tree.live_count(),
            merged_nodes: self.tree.merged_count(),
            variations_computed: stats.evaluations,
            stable_regions: stats.valid,
            duplicates_removed,
        };
        tracing::debug!(
            "{pass} pass: {} nodes ({} merged over {} patches), {} stable, {} duplicates, {} regions",
            diagnostics.tree_nodes,
            diagnostics.merged_nodes,
            diagnostics.patches,
            diagnostics.stable_regions,
            diagnostics.duplicates_removed,
            regions.len()
        );

        RegionSet {
            pass,
            regions,
            diagnostics,
        }
    }
}
