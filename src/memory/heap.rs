//! Heap provider backed by the global Rust allocator.
//!
//! Useful where mapping fresh pages per table is wasteful (many short-lived runtimes in
//! tests) or unavailable. Blocks are aligned to the provider granularity and zero-filled by
//! [`std::alloc::alloc_zeroed`].

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
};

use super::{Backing, Provider};
use crate::{Error::Allocation, Result};

/// Default granularity of [`HeapMemory`]: one cache line.
const DEFAULT_GRANULARITY: usize = 64;

/// Provider that allocates blocks from the global allocator.
#[derive(Debug, Clone, Copy)]
pub struct HeapMemory {
    granularity: usize,
}

impl HeapMemory {
    /// Creates a heap provider with the given granularity.
    ///
    /// The granularity doubles as block alignment and is rounded up to a power of two.
    ///
    /// # Arguments
    ///
    /// * `granularity` - Requested granularity in bytes; zero is treated as one
    #[must_use]
    pub fn with_granularity(granularity: usize) -> Self {
        HeapMemory {
            granularity: granularity.max(1).next_power_of_two(),
        }
    }
}

impl Default for HeapMemory {
    fn default() -> Self {
        Self::with_granularity(DEFAULT_GRANULARITY)
    }
}

impl Provider for HeapMemory {
    fn name(&self) -> &'static str {
        "heap"
    }

    fn granularity(&self) -> usize {
        self.granularity
    }

    fn allocate(&self, len: usize) -> Result<Box<dyn Backing>> {
        let failure = Allocation {
            provider: self.name(),
            len,
        };

        if len == 0 {
            return Err(failure);
        }

        let Ok(layout) = Layout::from_size_align(len, self.granularity) else {
            return Err(failure);
        };

        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(Box::new(HeapBlock { ptr, layout })),
            None => Err(failure),
        }
    }
}

/// A block owned by the global allocator.
struct HeapBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the block is uniquely owned raw memory; access is synchronized by its user.
unsafe impl Send for HeapBlock {}
// SAFETY: see above.
unsafe impl Sync for HeapBlock {}

impl Backing for HeapBlock {
    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        // SAFETY: `ptr` was returned by `alloc_zeroed` with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_rounded_to_power_of_two() {
        assert_eq!(HeapMemory::with_granularity(0).granularity(), 1);
        assert_eq!(HeapMemory::with_granularity(48).granularity(), 64);
        assert_eq!(HeapMemory::with_granularity(4096).granularity(), 4096);
    }

    #[test]
    fn test_block_alignment() {
        let provider = HeapMemory::with_granularity(256);
        let mut block = provider.allocate(512).unwrap();
        assert_eq!(block.len(), 512);
        assert_eq!(block.as_mut_ptr() as usize % 256, 0);
    }

    #[test]
    fn test_zero_length_rejected() {
        let result = HeapMemory::default().allocate(0);
        assert!(matches!(
            result,
            Err(Allocation {
                provider: "heap",
                len: 0
            })
        ));
    }

    #[test]
    fn test_oversized_layout_rejected() {
        assert!(HeapMemory::default().allocate(usize::MAX).is_err());
    }
}
