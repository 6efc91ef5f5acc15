//! Thread identity used to key pool entries and diagnostic records.

use std::{fmt, num::NonZeroU64};

/// Opaque, non-zero identifier of an operating system thread.
///
/// Entries and diagnostic records are keyed by this value. Zero is reserved: an
/// `Option<ThreadId>` occupies the same eight bytes as the raw identifier and a zero-filled
/// slot reads as `None`, meaning "unowned".
///
/// Identifiers are not generation-stamped. If the operating system reuses the identifier of
/// a thread that exited with open regions, those entries would be attributed to the new
/// thread; call [`Runtime::release_thread`](crate::Runtime::release_thread) when a thread exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ThreadId(NonZeroU64);

impl ThreadId {
    /// Creates an identifier from its raw value; zero yields `None`.
    #[must_use]
    pub const fn new(raw: u64) -> Option<ThreadId> {
        match NonZeroU64::new(raw) {
            Some(raw) => Some(ThreadId(raw)),
            None => None,
        }
    }

    /// Identifier of the calling thread.
    ///
    /// Safe to call from fault-handling context: it is a single system call (or TEB read) on
    /// every supported platform and never allocates.
    #[must_use]
    pub fn current() -> ThreadId {
        crate::platform::current_thread_id()
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
