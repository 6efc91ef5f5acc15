//! Virtual memory provider backed by anonymous mappings.
//!
//! This is the default provider for user-mode processes. Each block is a private anonymous
//! mapping created with [`memmap2::MmapMut::map_anon`]; the operating system hands out such
//! pages already zero-filled, and unmapping happens when the block is dropped.

use memmap2::MmapMut;

use super::{Backing, Provider};
use crate::{platform, Result};

/// Provider that maps fresh anonymous pages for every block.
#[derive(Debug, Clone, Copy)]
pub struct VirtualMemory {
    granularity: usize,
}

impl VirtualMemory {
    /// Creates a provider using the operating system's allocation granularity.
    #[must_use]
    pub fn new() -> Self {
        VirtualMemory {
            granularity: platform::allocation_granularity(),
        }
    }
}

impl Default for VirtualMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for VirtualMemory {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn granularity(&self) -> usize {
        self.granularity
    }

    fn allocate(&self, len: usize) -> Result<Box<dyn Backing>> {
        let map = MmapMut::map_anon(len)?;
        Ok(Box::new(Mapping { map }))
    }
}

/// A live anonymous mapping.
#[derive(Debug)]
struct Mapping {
    map: MmapMut,
}

impl Backing for Mapping {
    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.map.as_mut_ptr()
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_is_page_aligned() {
        let provider = VirtualMemory::new();
        let mut block = provider.allocate(100).unwrap();
        assert_eq!(block.len(), 100);
        assert_eq!(block.as_mut_ptr() as usize % 4096, 0);
    }
}
