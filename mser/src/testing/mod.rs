//! Testing utilities for mser.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Image of `block`x`block` plateaus with random levels `0, step, 2*step, ...`.
///
/// Few distinct levels and large flat areas produce many equal-level
/// components touching across patch seams.
pub fn random_plateaus(width: usize, height: usize, block: usize, levels: u8, seed: u64) -> Vec<u8> {
    assert!(block > 0 && levels > 0);
    let mut rng = StdRng::seed_from_u64(seed);
    let step = (255 / levels as usize).max(1) as u8;
    let bw = width.div_ceil(block);
    let bh = height.div_ceil(block);
    let blocks: Vec<u8> = (0..bw * bh)
        .map(|_| rng.random_range(0..levels) * step)
        .collect();

    let mut pixels = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            pixels[y * width + x] = blocks[(y / block) * bw + x / block];
        }
    }
    pixels
}

/// Uniform random noise.
pub fn random_noise(width: usize, height: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..width * height).map(|_| rng.random::<u8>()).collect()
}

/// Constant background.
pub fn uniform_image(width: usize, height: usize, value: u8) -> Vec<u8> {
    vec![value; width * height]
}

/// Fill the axis-aligned rectangle `[x, x + w) x [y, y + h)` with `value`.
pub fn fill_rect(
    pixels: &mut [u8],
    width: usize,
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    value: u8,
) {
    for row in y..y + h {
        pixels[row * width + x..row * width + x + w].fill(value);
    }
}

/// Draw a disk whose level rises from `center_value` at the center towards
/// `edge_value` at `radius`.
pub fn draw_cone(
    pixels: &mut [u8],
    width: usize,
    cx: f32,
    cy: f32,
    radius: f32,
    center_value: u8,
    edge_value: u8,
) {
    let height = pixels.len() / width;
    for y in 0..height {
        for x in 0..width {
            let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
            if d < radius {
                let t = d / radius;
                let value = center_value as f32 + t * (edge_value as f32 - center_value as f32);
                pixels[y * width + x] = value.round() as u8;
            }
        }
    }
}
