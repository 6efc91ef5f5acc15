//! Pluggable storage for the entry pool and the diagnostic record buffer.
//!
//! The engine never allocates after [`Runtime::initialize`](crate::Runtime::initialize): both
//! tables are carved out of one fixed-size block each, obtained up front from a [`Provider`].
//! Which provider is used is a deployment decision. User-mode processes typically take
//! anonymous virtual memory straight from the operating system, while a kernel-mode
//! consumer supplies its own provider over non-paged pool, because pageable memory must not
//! be touched at the interrupt levels where exceptions are dispatched.
//!
//! # Key Components
//!
//! - [`Provider`] - Allocation interface with a fixed granularity
//! - [`Backing`] - An owned block of storage; dropping it returns the memory to its provider
//! - [`VirtualMemory`] - Anonymous private mapping from the operating system (default)
//! - [`HeapMemory`] - Block from the global Rust allocator
//!
//! # Custom Providers
//!
//! ```rust
//! use faultline::memory::{Backing, HeapMemory, Provider};
//!
//! #[derive(Debug)]
//! struct Tagged(HeapMemory);
//!
//! impl Provider for Tagged {
//!     fn name(&self) -> &'static str {
//!         "tagged"
//!     }
//!
//!     fn granularity(&self) -> usize {
//!         self.0.granularity()
//!     }
//!
//!     fn allocate(&self, len: usize) -> faultline::Result<Box<dyn Backing>> {
//!         self.0.allocate(len)
//!     }
//! }
//!
//! let block = Tagged(HeapMemory::default()).allocate(256)?;
//! assert!(block.len() >= 256);
//! # Ok::<(), faultline::Error>(())
//! ```

mod heap;
mod mapped;

use std::fmt;

pub use heap::HeapMemory;
pub use mapped::VirtualMemory;

use crate::Result;

/// An owned, contiguous, writable block of storage.
///
/// The block stays at a fixed address for its whole lifetime. Dropping it releases the
/// memory through whatever provider produced it, exactly once.
pub trait Backing: Send + Sync {
    /// Start of the block.
    fn as_mut_ptr(&mut self) -> *mut u8;

    /// Length of the block in bytes.
    fn len(&self) -> usize;

    /// Whether the block is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of fixed-size storage blocks.
pub trait Provider: Send + Sync + fmt::Debug {
    /// Short name used in errors and log messages.
    fn name(&self) -> &'static str;

    /// Allocation granularity in bytes; requests are rounded up to a multiple of it.
    fn granularity(&self) -> usize;

    /// Allocates a zero-filled block of at least `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Allocation`] or [`crate::Error::Io`] if no memory is available.
    fn allocate(&self, len: usize) -> Result<Box<dyn Backing>>;
}
