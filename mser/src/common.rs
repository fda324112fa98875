//! Shared helpers for the parallel stages.

use std::ops::Range;

/// Wrapper to send raw pointers across thread boundaries in Rayon closures.
///
/// SAFETY: Caller must ensure disjoint access from each thread.
///
/// Access the inner value via `.get()` so that closures capture
/// `&UnsafeSendPtr` (which is Sync) rather than the inner pointer field.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UnsafeSendPtr<T: Copy>(T);
unsafe impl<T: Copy> Send for UnsafeSendPtr<T> {}
unsafe impl<T: Copy> Sync for UnsafeSendPtr<T> {}

impl<T: Copy> UnsafeSendPtr<T> {
    pub(crate) fn new(ptr: T) -> Self {
        Self(ptr)
    }

    pub(crate) fn get(&self) -> T {
        self.0
    }
}

/// Split `slice` into disjoint mutable pieces, one per range.
///
/// Ranges must be sorted and non-overlapping. Gaps between ranges are skipped.
pub(crate) fn split_ranges_mut<'a, T>(
    mut slice: &'a mut [T],
    ranges: &[Range<usize>],
) -> Vec<&'a mut [T]> {
    let mut pieces = Vec::with_capacity(ranges.len());
    let mut consumed = 0;

    for range in ranges {
        assert!(
            range.start >= consumed && range.end >= range.start,
            "ranges must be sorted and disjoint, got {range:?} after offset {consumed}"
        );
        let tail = std::mem::take(&mut slice);
        let (_, rest) = tail.split_at_mut(range.start - consumed);
        let (piece, rest) = rest.split_at_mut(range.len());
        pieces.push(piece);
        slice = rest;
        consumed = range.end;
    }

    pieces
}
