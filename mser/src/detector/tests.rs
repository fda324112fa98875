//! Tests for MserDetector.

use glam::UVec2;
use strum::IntoEnumIterator;

use super::*;
use crate::config::{Connectivity, Parallelism, Polarity};
use crate::image::{BitMask, RectMask};
use crate::testing::{draw_cone, fill_rect, init_tracing, random_noise, uniform_image};

// =============================================================================
// Helper Functions
// =============================================================================

/// 16x16 image with a 4x4 square of gray 10 on gray 200, crossing the patch
/// seams of every parallel grid.
fn dark_square() -> Vec<u8> {
    let mut pixels = uniform_image(16, 16, 200);
    fill_rect(&mut pixels, 16, 6, 6, 4, 4, 10);
    pixels
}

fn square_config(parallelism: Parallelism, connectivity: Connectivity) -> Config {
    Config {
        delta: 1,
        min_area: 4,
        max_area: 256,
        connectivity,
        parallelism,
        ..Default::default()
    }
}

/// Two cones on a flat background.
fn two_cones() -> (Vec<u8>, usize, usize) {
    let (width, height) = (64, 48);
    let mut pixels = uniform_image(width, height, 200);
    draw_cone(&mut pixels, width, 16.0, 16.0, 11.0, 20, 180);
    draw_cone(&mut pixels, width, 45.0, 31.0, 9.0, 40, 170);
    (pixels, width, height)
}

/// Regions as comparable, order-independent keys.
fn region_keys(regions: &[Region]) -> Vec<(u8, u32, Vec<(u32, u32)>)> {
    let mut keys: Vec<_> = regions
        .iter()
        .map(|r| {
            let mut pixels: Vec<(u32, u32)> = r.pixels.iter().map(|p| (p.x, p.y)).collect();
            pixels.sort_unstable();
            (r.gray_level, r.variation.to_bits(), pixels)
        })
        .collect();
    keys.sort();
    keys
}

fn is_subset(inner: &Region, outer: &Region) -> bool {
    inner.pixels.iter().all(|p| outer.pixels.contains(p))
}

// =============================================================================
// End-to-end detection
// =============================================================================

#[test]
fn test_dark_square_single_region() {
    init_tracing();
    let pixels = dark_square();
    let image = GrayImage::new(16, 16, &pixels);

    for parallelism in Parallelism::iter() {
        for connectivity in Connectivity::iter() {
            let mut detector = MserDetector::from_config(square_config(parallelism, connectivity));
            let result = detector.detect(&image);

            assert_eq!(result.sets.len(), 1);
            let set = &result.sets[0];
            assert_eq!(set.pass, Pass::Dark);
            assert_eq!(set.regions.len(), 1, "{parallelism} {connectivity}");

            let region = &set.regions[0];
            assert_eq!(region.gray_level, 10);
            assert_eq!(region.area(), 16);
            assert_eq!(region.variation, 0.0);
            assert_eq!(region.bounds.min, UVec2::new(6, 6));
            assert_eq!(region.bounds.max, UVec2::new(9, 9));
        }
    }
}

#[test]
fn test_two_blobs_two_localized_regions() {
    let mut pixels = uniform_image(64, 48, 180);
    fill_rect(&mut pixels, 64, 8, 8, 5, 5, 20);
    fill_rect(&mut pixels, 64, 40, 30, 5, 5, 20);
    let image = GrayImage::new(64, 48, &pixels);

    for parallelism in Parallelism::iter() {
        let mut detector = MserDetector::from_config(Config {
            delta: 1,
            min_area: 4,
            max_area: 1000,
            parallelism,
            ..Default::default()
        });
        let result = detector.detect(&image);
        let mut regions = result.sets[0].regions.clone();
        regions.sort_by_key(|r| r.bounds.min.x);

        assert_eq!(regions.len(), 2, "{parallelism}");
        assert_eq!(regions[0].bounds.min, UVec2::new(8, 8));
        assert_eq!(regions[0].bounds.max, UVec2::new(12, 12));
        assert_eq!(regions[1].bounds.min, UVec2::new(40, 30));
        assert_eq!(regions[1].bounds.max, UVec2::new(44, 34));
        assert!(regions.iter().all(|r| r.area() == 25 && r.gray_level == 20));
    }
}

#[test]
fn test_bright_polarity() {
    let mut pixels = uniform_image(16, 16, 40);
    fill_rect(&mut pixels, 16, 3, 5, 4, 4, 230);
    let image = GrayImage::new(16, 16, &pixels);

    let mut detector = MserDetector::from_config(Config {
        delta: 1,
        min_area: 4,
        max_area: 100,
        polarity: Polarity::Both,
        ..Default::default()
    });
    let result = detector.detect(&image);

    assert_eq!(result.sets.len(), 2);
    assert!(result.set(Pass::Dark).unwrap().regions.is_empty());
    let bright = result.set(Pass::Bright).unwrap();
    assert_eq!(bright.regions.len(), 1);
    assert_eq!(bright.regions[0].gray_level, 230);
    assert_eq!(bright.regions[0].area(), 16);
    assert_eq!(result.region_count(), 1);
}

#[test]
fn test_all_modes_give_same_regions() {
    let (pixels, width, height) = two_cones();
    let image = GrayImage::new(width, height, &pixels);

    for connectivity in Connectivity::iter() {
        let results: Vec<_> = Parallelism::iter()
            .map(|parallelism| {
                let mut detector = MserDetector::from_config(Config {
                    min_area: 20,
                    connectivity,
                    parallelism,
                    polarity: Polarity::Both,
                    ..Default::default()
                });
                let result = detector.detect(&image);
                result
                    .sets
                    .iter()
                    .map(|s| region_keys(&s.regions))
                    .collect::<Vec<_>>()
            })
            .collect();

        assert!(!results[0][0].is_empty());
        assert_eq!(results[0], results[1], "{connectivity} four");
        assert_eq!(results[0], results[2], "{connectivity} thirty-two");
    }
}

#[test]
fn test_noise_modes_agree() {
    let pixels = random_noise(50, 40, 9);
    let image = GrayImage::new(50, 40, &pixels);

    let keys: Vec<_> = Parallelism::iter()
        .map(|parallelism| {
            let mut detector = MserDetector::from_config(Config {
                delta: 2,
                min_area: 3,
                max_variation: 1.0,
                parallelism,
                ..Default::default()
            });
            region_keys(&detector.detect(&image).sets[0].regions)
        })
        .collect();

    assert_eq!(keys[0], keys[1]);
    assert_eq!(keys[0], keys[2]);
}

#[test]
fn test_cone_regions_stay_inside_cones() {
    let (pixels, width, height) = two_cones();
    let image = GrayImage::new(width, height, &pixels);
    let mut detector = MserDetector::from_config(Config {
        min_area: 20,
        parallelism: Parallelism::Four,
        ..Default::default()
    });
    let result = detector.detect(&image);
    let regions = &result.sets[0].regions;

    assert!(regions.len() >= 2);
    for region in regions {
        let c = region.centroid();
        let near_first = c.distance(glam::Vec2::new(16.0, 16.0)) < 11.0;
        let near_second = c.distance(glam::Vec2::new(45.0, 31.0)) < 9.0;
        assert!(near_first || near_second, "region centered at {c} outside cones");
        assert!(region.variation < 0.25);
        assert!(region.size >= 20);
    }
}

#[test]
fn test_duplicate_chain_keeps_most_stable() {
    // Nested components of 100, 101, 118, 119 and 219 pixels at levels 0..=4.
    let mut pixels = uniform_image(40, 40, 100);
    fill_rect(&mut pixels, 40, 5, 5, 10, 10, 0);
    fill_rect(&mut pixels, 40, 15, 5, 1, 1, 1);
    fill_rect(&mut pixels, 40, 15, 6, 1, 9, 2);
    fill_rect(&mut pixels, 40, 16, 5, 1, 8, 2);
    fill_rect(&mut pixels, 40, 16, 13, 1, 1, 3);
    fill_rect(&mut pixels, 40, 5, 15, 10, 10, 4);
    let image = GrayImage::new(40, 40, &pixels);

    let config = Config {
        delta: 1,
        min_area: 10,
        max_area: 150,
        ..Default::default()
    };
    for parallelism in Parallelism::iter() {
        let mut with_removal = MserDetector::from_config(Config {
            parallelism,
            ..config.clone()
        });
        let set = with_removal.detect(&image).sets.remove(0);
        assert_eq!(set.diagnostics.stable_regions, 2);
        assert_eq!(set.diagnostics.duplicates_removed, 1);
        assert_eq!(set.regions.len(), 1);
        assert_eq!(set.regions[0].gray_level, 2);
        assert_eq!(set.regions[0].area(), 118);

        let mut without_removal = MserDetector::from_config(Config {
            parallelism,
            remove_duplicates: false,
            ..config.clone()
        });
        let set = without_removal.detect(&image).sets.remove(0);
        let areas: Vec<(usize, usize)> = set.regions.iter().map(|r| (r.area(), r.size)).collect();
        assert_eq!(areas, vec![(100, 100), (18, 118)]);
    }
}

#[test]
fn test_sibling_regions_survive_similar_parent() {
    // Two 5x5 squares at 0 joined into a 55 pixel strip at 50.
    let mut pixels = uniform_image(40, 40, 200);
    fill_rect(&mut pixels, 40, 5, 5, 11, 5, 50);
    fill_rect(&mut pixels, 40, 5, 5, 5, 5, 0);
    fill_rect(&mut pixels, 40, 11, 5, 5, 5, 0);
    let image = GrayImage::new(40, 40, &pixels);

    for parallelism in Parallelism::iter() {
        let mut detector = MserDetector::from_config(Config {
            duplicate_variation: 2.0,
            ..square_config(parallelism, Connectivity::Four)
        });
        let set = detector.detect(&image).sets.remove(0);
        assert_eq!(set.diagnostics.stable_regions, 3, "{parallelism}");
        assert_eq!(set.diagnostics.duplicates_removed, 1);

        let mut xs: Vec<u32> = set
            .regions
            .iter()
            .map(|r| {
                assert_eq!((r.gray_level, r.area()), (0, 25));
                r.bounds.min.x
            })
            .collect();
        xs.sort_unstable();
        assert_eq!(xs, vec![5, 11]);
    }
}

#[test]
fn test_nested_regions_share_no_pixels() {
    // 5x5 square at 0 inside a 20x20 square at 50.
    let mut pixels = uniform_image(40, 40, 200);
    fill_rect(&mut pixels, 40, 8, 8, 20, 20, 50);
    fill_rect(&mut pixels, 40, 10, 10, 5, 5, 0);
    let image = GrayImage::new(40, 40, &pixels);

    for parallelism in Parallelism::iter() {
        let config = Config {
            max_area: 1000,
            ..square_config(parallelism, Connectivity::Four)
        };
        let mut detector = MserDetector::from_config(config.clone());
        let result = detector.detect(&image);
        let regions = &result.sets[0].regions;
        let sizes: Vec<(usize, usize)> = regions.iter().map(|r| (r.area(), r.size)).collect();
        assert_eq!(sizes, vec![(25, 25), (375, 400)], "{parallelism}");
        assert!(regions[0].pixels.iter().all(|p| !regions[1].pixels.contains(p)));

        let mut shared = MserDetector::from_config(Config {
            exclusive_pixels: false,
            ..config
        });
        let result = shared.detect(&image);
        let regions = &result.sets[0].regions;
        assert_eq!(regions[1].area(), 400);
        assert!(is_subset(&regions[0], &regions[1]));
    }
}

#[test]
fn test_no_similar_nested_regions_survive() {
    let (pixels, width, height) = two_cones();
    let image = GrayImage::new(width, height, &pixels);
    let config = Config {
        delta: 2,
        min_area: 10,
        max_variation: 0.5,
        exclusive_pixels: false,
        ..Default::default()
    };

    let mut with_removal = MserDetector::from_config(config.clone());
    let mut without_removal = MserDetector::from_config(Config {
        remove_duplicates: false,
        ..config.clone()
    });
    let kept = with_removal.detect(&image).sets.remove(0);
    let all = without_removal.detect(&image).sets.remove(0);

    assert_eq!(
        kept.regions.len() + kept.diagnostics.duplicates_removed,
        all.regions.len()
    );
    assert_eq!(all.diagnostics.duplicates_removed, 0);

    for inner in &kept.regions {
        for outer in &kept.regions {
            if inner.area() < outer.area() && is_subset(inner, outer) {
                let growth = (outer.area() - inner.area()) as f32 / inner.area() as f32;
                assert!(growth >= config.duplicate_variation);
            }
        }
    }
}

// =============================================================================
// Masks, diagnostics and reuse
// =============================================================================

#[test]
fn test_masked_pixels_never_in_regions() {
    let pixels = dark_square();
    let image = GrayImage::new(16, 16, &pixels);
    let mut detector = MserDetector::from_config(square_config(Parallelism::Four, Connectivity::Four));

    // The square is excluded entirely.
    let mask = |x: usize, y: usize| !(6..10).contains(&x) || !(6..10).contains(&y);
    let result = detector.detect_masked(&image, &mask);
    assert!(result.sets[0].regions.is_empty());

    // Only the square and its border are included.
    let result = detector.detect_masked(&image, &RectMask::new(4, 4, 8, 8));
    let regions = &result.sets[0].regions;
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].area(), 16);

    let mut bits = BitMask::new_filled(16, 16, true);
    bits.set(7, 7, false);
    let result = detector.detect_masked(&image, &bits);
    assert_eq!(result.sets[0].regions[0].area(), 15);
    assert!(!result.sets[0].regions[0].pixels.contains(&UVec2::new(7, 7)));
}

#[test]
#[should_panic(expected = "does not match image")]
fn test_mask_dimension_mismatch() {
    let pixels = dark_square();
    let image = GrayImage::new(16, 16, &pixels);
    let mask = BitMask::new_filled(15, 16, true);
    MserDetector::new().detect_masked(&image, &mask);
}

#[test]
#[should_panic(expected = "delta must be > 0")]
fn test_invalid_config_rejected() {
    MserDetector::from_config(Config {
        delta: 0,
        ..Default::default()
    });
}

#[test]
fn test_diagnostics() {
    let pixels = dark_square();
    let image = GrayImage::new(16, 16, &pixels);

    let mut serial = MserDetector::from_config(square_config(Parallelism::Serial, Connectivity::Four));
    let diagnostics = serial.detect(&image).sets[0].diagnostics;
    assert_eq!(
        diagnostics,
        PassDiagnostics {
            patches: 1,
            tree_nodes: 2,
            merged_nodes: 0,
            variations_computed: 2,
            stable_regions: 1,
            duplicates_removed: 0,
        }
    );

    let mut parallel = MserDetector::from_config(square_config(Parallelism::ThirtyTwo, Connectivity::Four));
    let diagnostics = parallel.detect(&image).sets[0].diagnostics;
    assert_eq!(diagnostics.patches, 32);
    assert_eq!(diagnostics.tree_nodes, 2);
    assert!(diagnostics.merged_nodes > 0);
    assert_eq!(diagnostics.variations_computed, 2);
}

#[test]
fn test_empty_image() {
    let image = GrayImage::new(0, 0, &[]);
    let mut detector = MserDetector::from_config(Config {
        polarity: Polarity::Both,
        ..Default::default()
    });
    let result = detector.detect(&image);
    assert_eq!(result.sets.len(), 2);
    assert_eq!(result.region_count(), 0);
    assert_eq!(result.sets[0].diagnostics, PassDiagnostics::default());
}

#[test]
fn test_detector_reuse_and_clear() {
    let (pixels, width, height) = two_cones();
    let cones = GrayImage::new(width, height, &pixels);
    let square_pixels = dark_square();
    let square = GrayImage::new(16, 16, &square_pixels);

    let mut detector = MserDetector::from_config(Config {
        delta: 1,
        min_area: 4,
        parallelism: Parallelism::Four,
        ..Default::default()
    });
    let first = region_keys(&detector.detect(&cones).sets[0].regions);
    let small = region_keys(&detector.detect(&square).sets[0].regions);
    let second = region_keys(&detector.detect(&cones).sets[0].regions);
    assert_eq!(first, second);
    assert_eq!(small.len(), 1);

    detector.clear_memory_cache();
    let third = region_keys(&detector.detect(&cones).sets[0].regions);
    assert_eq!(first, third);
    assert_eq!(detector.config().delta, 1);
}

#[test]
fn test_level_shift_merges_close_levels() {
    // Square of 8..=11 on 200: one level after shifting by 2.
    let mut pixels = uniform_image(16, 16, 200);
    fill_rect(&mut pixels, 16, 6, 6, 2, 4, 8);
    fill_rect(&mut pixels, 16, 8, 6, 2, 4, 11);
    let image = GrayImage::new(16, 16, &pixels);

    let mut detector = MserDetector::from_config(Config {
        level_shift: 2,
        ..square_config(Parallelism::Serial, Connectivity::Four)
    });
    let result = detector.detect(&image);
    let regions = &result.sets[0].regions;
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].area(), 16);
    assert_eq!(regions[0].gray_level, 11);
}

#[test]
fn test_level_shift_bright_threshold_reached_by_pixels() {
    let mut pixels = uniform_image(16, 16, 20);
    fill_rect(&mut pixels, 16, 4, 4, 4, 4, 200);
    let image = GrayImage::new(16, 16, &pixels);

    let mut detector = MserDetector::from_config(Config {
        level_shift: 1,
        polarity: Polarity::Bright,
        ..square_config(Parallelism::Serial, Connectivity::Four)
    });
    let result = detector.detect(&image);
    let regions = &result.sets[0].regions;
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].gray_level, 200);
}
