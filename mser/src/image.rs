//! Grayscale image view and pixel masks.

/// Number of bits per mask storage word.
const BITS_PER_WORD: usize = 64;

// ============================================================================
// GrayImage
// ============================================================================

/// Borrowed row-major 8-bit grayscale image.
#[derive(Debug, Clone, Copy)]
pub struct GrayImage<'a> {
    width: usize,
    height: usize,
    pixels: &'a [u8],
}

impl<'a> GrayImage<'a> {
    /// Wrap a pixel slice. The slice length must equal `width * height`.
    pub fn new(width: usize, height: usize, pixels: &'a [u8]) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixel length {} does not match dimensions {}x{}",
            pixels.len(),
            width,
            height
        );
        Self {
            width,
            height,
            pixels,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub fn pixels(&self) -> &'a [u8] {
        self.pixels
    }

    /// One row of pixels.
    #[inline]
    pub fn row(&self, y: usize) -> &'a [u8] {
        debug_assert!(y < self.height);
        &self.pixels[y * self.width..(y + 1) * self.width]
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        debug_assert!(x < self.width && y < self.height);
        self.pixels[y * self.width + x]
    }
}

// ============================================================================
// Masks
// ============================================================================

/// Per-pixel inclusion test. Excluded pixels never belong to any region.
pub trait PixelMask: Sync {
    /// Whether the pixel at `(x, y)` takes part in detection.
    fn includes(&self, x: usize, y: usize) -> bool;

    /// Mask dimensions, if the mask has any. Checked against the image.
    fn dimensions(&self) -> Option<(usize, usize)> {
        None
    }
}

/// Mask including every pixel.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullMask;

impl PixelMask for FullMask {
    #[inline]
    fn includes(&self, _x: usize, _y: usize) -> bool {
        true
    }
}

/// Mask including only the pixels inside a rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectMask {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl RectMask {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl PixelMask for RectMask {
    #[inline]
    fn includes(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

impl<F> PixelMask for F
where
    F: Fn(usize, usize) -> bool + Sync,
{
    #[inline]
    fn includes(&self, x: usize, y: usize) -> bool {
        self(x, y)
    }
}

/// Bit-packed mask, one bit per pixel in `u64` words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitMask {
    words: Vec<u64>,
    width: usize,
    height: usize,
}

impl BitMask {
    /// Create a mask with every pixel set to `value`.
    pub fn new_filled(width: usize, height: usize, value: bool) -> Self {
        let num_words = (width * height).div_ceil(BITS_PER_WORD);
        let fill = if value { !0u64 } else { 0u64 };
        Self {
            words: vec![fill; num_words],
            width,
            height,
        }
    }

    /// Create a mask from one boolean per pixel, row-major.
    pub fn from_slice(width: usize, height: usize, data: &[bool]) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length {} does not match dimensions {}x{}",
            data.len(),
            width,
            height
        );

        let mut mask = Self::new_filled(width, height, false);
        for (i, &value) in data.iter().enumerate() {
            if value {
                mask.words[i / BITS_PER_WORD] |= 1u64 << (i % BITS_PER_WORD);
            }
        }
        mask
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        debug_assert!(x < self.width && y < self.height);
        let idx = y * self.width + x;
        (self.words[idx / BITS_PER_WORD] >> (idx % BITS_PER_WORD)) & 1 != 0
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        debug_assert!(x < self.width && y < self.height);
        let idx = y * self.width + x;
        let bit = 1u64 << (idx % BITS_PER_WORD);
        if value {
            self.words[idx / BITS_PER_WORD] |= bit;
        } else {
            self.words[idx / BITS_PER_WORD] &= !bit;
        }
    }

    /// Number of included pixels.
    pub fn count_ones(&self) -> usize {
        let len = self.width * self.height;
        let full_words = len / BITS_PER_WORD;
        let mut count: usize = self.words[..full_words]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum();
        let tail_bits = len % BITS_PER_WORD;
        if tail_bits > 0 {
            let tail_mask = (1u64 << tail_bits) - 1;
            count += (self.words[full_words] & tail_mask).count_ones() as usize;
        }
        count
    }
}

impl PixelMask for BitMask {
    #[inline]
    fn includes(&self, x: usize, y: usize) -> bool {
        self.get(x, y)
    }

    fn dimensions(&self) -> Option<(usize, usize)> {
        Some((self.width, self.height))
    }
}
