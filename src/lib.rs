// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'pool/table.rs' carves typed slots out of provider memory
// - 'platform/*' talks to the operating system's exception dispatch

//! # faultline
//!
//! Structured exception handling for code the operating system knows nothing about.
//!
//! Manually mapped images, injected payloads and hand-written position-independent code run
//! without the unwind metadata the platform's exception dispatcher relies on, so the
//! compiler's native `try`/`except` does not work for them. `faultline` supplies an
//! out-of-band equivalent: callers open a *protected region* by saving a resumable register
//! snapshot, and if a hardware or software exception interrupts the region, the faulting
//! thread is resumed from that snapshot with a zero return value, which routes it into the
//! region's fallback branch.
//!
//! ## Features
//!
//! - **Thread-keyed entry pool** - fixed capacity, per-thread LIFO nesting, no allocation after
//!   initialization
//! - **Exception interceptor** - one decision procedure for every fault reaching the process
//! - **Trap protocol** - open and close regions with a breakpoint and a sentinel register value
//! - **Diagnostics** - optional per-thread record of the last intercepted fault
//! - **Pluggable storage** - anonymous virtual memory, heap, or a custom [`memory::Provider`]
//! - **Platform adapters** - Windows vectored exception handler, Linux signal handlers
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use faultline::prelude::*;
//!
//! let runtime = Runtime::new(Config::diagnostic().with_provider(Arc::new(HeapMemory::default())));
//! runtime.initialize()?;
//!
//! let thread = ThreadId::new(1).unwrap();
//! let snapshot = CpuContext::X64(X64Context { rip: 0x1400_1000, rax: 1, ..Default::default() });
//!
//! let guard = runtime.protect(thread, &snapshot, None).expect("pool has room");
//!
//! // The dispatcher reports a fault inside the region
//! let mut live = CpuContext::X64(X64Context { rip: 0x1400_2000, ..Default::default() });
//! let record = ExceptionRecord::access_violation(0x1400_2000, AccessKind::Write, 0);
//! assert!(runtime.handle_exception(thread, &mut live, &record).is_handled());
//!
//! // The thread resumes at the entry point, observing failure
//! assert_eq!(live.instruction_pointer(), 0x1400_1000);
//! assert_eq!(live.return_value(), 0);
//! assert_eq!(runtime.records().code(thread), Some(ExceptionCode::ACCESS_VIOLATION));
//!
//! // The fault consumed the guard's region, so closing it finds nothing
//! assert!(!guard.exit());
//! # Ok::<(), faultline::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`Runtime`] - owns the storage and implements the interceptor and the boundary protocol
//! - [`EntryPool`] - saved snapshots of open regions
//! - [`RecordBuffer`] - diagnostic records
//! - [`CpuContext`] - architecture-tagged register snapshot
//! - [`ExceptionRecord`] / [`Disposition`] - what the dispatcher reports and what it is told
//! - [`platform`] - binding a runtime to the operating system
//!
//! ## Concurrency
//!
//! The pool and the record buffer are shared by all threads and mutated from inside
//! exception dispatch. Both are guarded by a [`utils::synchronization::SpinLock`] that never
//! waits on an operating system primitive and refuses reentry from its holder, so a fault
//! raised while the lock is held degrades into a declined exception instead of a deadlock.

mod config;
mod context;
mod diagnostics;
mod error;
mod exception;
mod pool;
mod runtime;
mod thread;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use faultline::prelude::*;
///
/// let runtime = Runtime::new(Config::default());
/// assert!(!runtime.is_initialized());
/// ```
pub mod prelude;

/// Storage providers for the entry pool and the diagnostic record buffer
pub mod memory;

/// Operating system adapters: thread identity, dispatcher installation, context capture
pub mod platform;

/// Locking and arithmetic helpers
pub mod utils;

/// `faultline` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// Only setup and teardown operations are fallible in this sense; everything reachable from
/// exception dispatch reports failure through `bool`, `Option` or [`Disposition`].
pub type Result<T> = std::result::Result<T, Error>;

/// `faultline` Error type
///
/// # Examples
///
/// ```rust
/// use faultline::{Config, Error, Runtime};
///
/// let runtime = Runtime::new(Config::default().with_capacity(0));
/// match runtime.initialize() {
///     Err(Error::InvalidCapacity(capacity)) => assert_eq!(capacity, 0),
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
pub use error::Error;

/// Runtime configuration and its default capacity.
pub use config::{Config, DEFAULT_CAPACITY};

/// Register snapshots.
pub use context::{Architecture, Arm64Context, CpuContext, X64Context, X86Context};

/// The diagnostic record buffer.
pub use diagnostics::{DiagnosticRecord, RecordBuffer};

/// Exception descriptions and dispositions.
pub use exception::{
    AccessKind, Disposition, ExceptionCode, ExceptionFlags, ExceptionRecord,
    EXCEPTION_MAXIMUM_PARAMETERS,
};

/// The entry pool.
pub use pool::{Entry, EntryPool, Ticket};

/// The interceptor and the region boundary protocol.
pub use runtime::{
    EntryFrame, RegionGuard, Request, Runtime, ENTER_REGION_SENTINEL, EXIT_REGION_SENTINEL,
};

/// Thread identity.
pub use thread::ThreadId;
