//! Reference-counted n-dimensional matrix buffers.
//!
//! A [`Mat`] is a shared handle: cloning it shares the buffer and raises the
//! reference count, which is how [`cache::MatCache`] tells free buffers from
//! buffers in use.

pub mod cache;


use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;
use strum_macros::{Display, EnumIter};
use thiserror::Error;

/// Maximum number of channels per element.
pub const MAX_CHANNELS: u8 = 16;

/// Scalar type of matrix values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Depth {
    U8,
    I8,
    U16,
    I16,
    I32,
    F32,
    F64,
}

impl Depth {
    /// Size of one value in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Scalar type and channel count of matrix elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthChannel {
    pub depth: Depth,
    pub channels: u8,
}

impl DepthChannel {
    pub fn new(depth: Depth, channels: u8) -> Self {
        assert!(
            (1..=MAX_CHANNELS).contains(&channels),
            "channel count must be in 1..={MAX_CHANNELS}, got {channels}"
        );
        Self { depth, channels }
    }

    /// Size of one element (all channels) in bytes.
    pub fn element_size(self) -> usize {
        self.depth.size() * self.channels as usize
    }
}

/// Rust scalar types that can view matrix data.
pub trait MatElement: bytemuck::Pod {
    const DEPTH: Depth;
}

macro_rules! impl_mat_element {
    ($($ty:ty => $depth:ident),* $(,)?) => {
        $(impl MatElement for $ty {
            const DEPTH: Depth = Depth::$depth;
        })*
    };
}

impl_mat_element!(u8 => U8, i8 => I8, u16 => U16, i16 => I16, i32 => I32, f32 => F32, f64 => F64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MatError {
    #[error("element type {requested} does not match matrix depth {actual}")]
    DepthMismatch { requested: Depth, actual: Depth },
}

#[derive(Debug)]
struct MatStorage {
    sizes: SmallVec<[usize; 4]>,
    depth_channel: DepthChannel,
    byte_len: usize,
    /// Word storage keeps every depth aligned.
    data: RwLock<Vec<u64>>,
}

/// Shared n-dimensional matrix.
#[derive(Debug, Clone)]
pub struct Mat {
    inner: Arc<MatStorage>,
}

impl Mat {
    /// Allocate a zeroed matrix.
    pub fn new(sizes: &[usize], depth_channel: DepthChannel) -> Self {
        assert!(!sizes.is_empty(), "matrix needs at least one dimension");
        let elements: usize = sizes.iter().product();
        let byte_len = elements * depth_channel.element_size();
        Self {
            inner: Arc::new(MatStorage {
                sizes: SmallVec::from_slice(sizes),
                depth_channel,
                byte_len,
                data: RwLock::new(vec![0u64; byte_len.div_ceil(8)]),
            }),
        }
    }

    /// Allocate a zeroed matrix of the same shape and type as `other`.
    pub fn new_like(other: &Mat) -> Self {
        Self::new(other.sizes(), other.depth_channel())
    }

    /// Number of dimensions.
    #[inline]
    pub fn dim(&self) -> usize {
        self.inner.sizes.len()
    }

    #[inline]
    pub fn sizes(&self) -> &[usize] {
        &self.inner.sizes
    }

    #[inline]
    pub fn depth_channel(&self) -> DepthChannel {
        self.inner.depth_channel
    }

    #[inline]
    pub fn depth(&self) -> Depth {
        self.inner.depth_channel.depth
    }

    #[inline]
    pub fn channels(&self) -> u8 {
        self.inner.depth_channel.channels
    }

    /// Size of one element (all channels) in bytes.
    #[inline]
    pub fn element_size(&self) -> usize {
        self.inner.depth_channel.element_size()
    }

    /// Number of elements, the product of all sizes.
    #[inline]
    pub fn element_number(&self) -> usize {
        self.inner.sizes.iter().product()
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.inner.byte_len
    }

    /// Number of handles sharing the buffer.
    #[inline]
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether both handles share one buffer.
    #[inline]
    pub fn same_buffer(&self, other: &Mat) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Give this handle its own buffer, copying the data if it is shared.
    pub fn detach(&mut self) {
        if self.reference_count() == 1 {
            return;
        }
        let data = self.inner.data.read().clone();
        self.inner = Arc::new(MatStorage {
            sizes: self.inner.sizes.clone(),
            depth_channel: self.inner.depth_channel,
            byte_len: self.inner.byte_len,
            data: RwLock::new(data),
        });
    }

    /// Run `f` on the values as `T`, `element_number * channels` of them.
    pub fn with_slice<T: MatElement, R>(&self, f: impl FnOnce(&[T]) -> R) -> Result<R, MatError> {
        self.check_depth::<T>()?;
        let values = self.value_count();
        let data = self.inner.data.read();
        let slice: &[T] = bytemuck::cast_slice(data.as_slice());
        Ok(f(&slice[..values]))
    }

    /// Run `f` on the mutable values as `T`. Visible through every handle
    /// sharing the buffer.
    pub fn with_slice_mut<T: MatElement, R>(
        &self,
        f: impl FnOnce(&mut [T]) -> R,
    ) -> Result<R, MatError> {
        self.check_depth::<T>()?;
        let values = self.value_count();
        let mut data = self.inner.data.write();
        let slice: &mut [T] = bytemuck::cast_slice_mut(data.as_mut_slice());
        Ok(f(&mut slice[..values]))
    }

    /// Copy of all values as `T`.
    pub fn to_vec<T: MatElement>(&self) -> Result<Vec<T>, MatError> {
        self.with_slice(|values: &[T]| values.to_vec())
    }

    fn value_count(&self) -> usize {
        self.element_number() * self.channels() as usize
    }

    fn check_depth<T: MatElement>(&self) -> Result<(), MatError> {
        if T::DEPTH == self.depth() {
            Ok(())
        } else {
            Err(MatError::DepthMismatch {
                requested: T::DEPTH,
                actual: self.depth(),
            })
        }
    }
}
