//! Fast MSER - Maximally Stable Extremal Region detection.
//!
//! This library provides:
//! - A gray-level component tree builder that can run on 1, 4 or 32 image
//!   patches in parallel and merge the patch trees afterwards
//! - Variation-based stability recognition with duplicate removal
//! - Span-based pixel extraction of the detected regions
//! - A thread-aware matrix buffer cache with a memory budget
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use mser::{Config, GrayImage, MserDetector, Parallelism};
//!
//! let image = GrayImage::new(width, height, &pixels);
//!
//! let config = Config {
//!     parallelism: Parallelism::Four,
//!     ..Default::default()
//! };
//! let mut detector = MserDetector::from_config(config);
//! let result = detector.detect(&image);
//!
//! for set in &result.sets {
//!     println!("{}: {} regions", set.pass, set.regions.len());
//! }
//! ```

pub(crate) mod common;
mod config;
mod detector;
pub(crate) mod extract;
mod image;
pub mod mat;
pub(crate) mod recognize;
mod region;
pub(crate) mod tree;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Detection
// ============================================================================

pub use config::{Config, Connectivity, Parallelism, Polarity};
pub use detector::{DetectionResult, MserDetector, Pass, PassDiagnostics, RegionSet};
pub use region::{Bounds, Region};

// ============================================================================
// Image input
// ============================================================================

pub use image::{BitMask, FullMask, GrayImage, PixelMask, RectMask};

// ============================================================================
// Matrix buffers
// ============================================================================

pub use mat::cache::{CacheScope, CacheStatistics, MatCache, DEFAULT_BUDGET};
pub use mat::{Depth, DepthChannel, Mat, MatElement, MatError};
