//! Per-thread record of the last intercepted fault.
//!
//! When diagnostics are enabled, the interceptor stores the faulting context and the
//! exception description of every fault it redirects, before the live context is overwritten
//! with the region's saved snapshot. A fallback branch can then ask what went wrong.
//!
//! The buffer holds one [`DiagnosticRecord`] per thread. A second fault on the same thread
//! overwrites the first in place; records never expire on their own and are only dropped by
//! [`Runtime::release_thread`](crate::Runtime::release_thread) or by shutting the runtime down.
//!
//! # Examples
//!
//! ```rust,no_run
//! use faultline::{Config, ThreadId, Runtime};
//!
//! let runtime = Runtime::new(Config::diagnostic());
//! runtime.initialize()?;
//!
//! // ... later, inside a fallback branch
//! if let Some(code) = runtime.records().code(ThreadId::current()) {
//!     eprintln!("protected region failed with {code}");
//! }
//! # Ok::<(), faultline::Error>(())
//! ```

use crate::{
    memory::Provider, pool::Table, utils::synchronization::SpinLock, CpuContext,
    Error::AlreadyInitialized, ExceptionCode, ExceptionRecord, Result, ThreadId,
};

/// The last fault intercepted on one thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticRecord {
    thread: Option<ThreadId>,
    context: CpuContext,
    exception: ExceptionRecord,
}

impl DiagnosticRecord {
    /// Thread the fault occurred on; `None` for an unused slot.
    #[must_use]
    pub fn thread(&self) -> Option<ThreadId> {
        self.thread
    }

    /// Register state at the moment of the fault.
    #[must_use]
    pub fn context(&self) -> &CpuContext {
        &self.context
    }

    /// Description of the fault.
    #[must_use]
    pub fn exception(&self) -> &ExceptionRecord {
        &self.exception
    }
}

/// Fixed-capacity buffer of [`DiagnosticRecord`]s, one per thread.
///
/// Storage has the same capacity and lifecycle as the entry pool but is otherwise
/// independent, with its own lock.
pub struct RecordBuffer {
    table: SpinLock<Option<Table<DiagnosticRecord>>>,
}

impl RecordBuffer {
    pub(crate) const fn new() -> Self {
        RecordBuffer {
            table: SpinLock::new(None),
        }
    }

    pub(crate) fn initialize(&self, provider: &dyn Provider, capacity: usize) -> Result<()> {
        if self.table.lock().ok_or(AlreadyInitialized)?.is_some() {
            return Err(AlreadyInitialized);
        }

        // Allocate outside the lock; a racing initializer leaves `fresh` to be dropped
        // after the guard.
        let fresh = Table::allocate(provider, capacity)?;
        let mut guard = self.table.lock().ok_or(AlreadyInitialized)?;
        if guard.is_some() {
            drop(guard);
            drop(fresh);
            return Err(AlreadyInitialized);
        }

        *guard = Some(fresh);
        Ok(())
    }

    pub(crate) fn release(&self) -> bool {
        let Some(table) = self.table.lock().and_then(|mut guard| guard.take()) else {
            return false;
        };
        // The guard is gone; the storage goes back to the provider outside the lock.
        drop(table);
        true
    }

    /// Whether storage is present; `false` when diagnostics are disabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.table.lock().is_some_and(|table| table.is_some())
    }

    /// Records a fault for `thread`.
    ///
    /// Reuses the slot the thread already owns, otherwise claims the first unowned slot.
    ///
    /// # Arguments
    ///
    /// * `thread` - Thread that faulted
    /// * `context` - Register state at the fault
    /// * `exception` - Description of the fault
    ///
    /// # Returns
    ///
    /// `false` if the buffer is disabled, full or locked by the calling thread.
    pub fn push(
        &self,
        thread: ThreadId,
        context: &CpuContext,
        exception: &ExceptionRecord,
    ) -> bool {
        let Some(mut guard) = self.table.lock() else {
            return false;
        };
        let Some(table) = guard.as_mut() else {
            return false;
        };

        let slots = table.slots_mut();
        let index = slots
            .iter()
            .position(|record| record.thread == Some(thread))
            .or_else(|| slots.iter().position(|record| record.thread.is_none()));

        match index {
            Some(index) => {
                slots[index] = DiagnosticRecord {
                    thread: Some(thread),
                    context: *context,
                    exception: *exception,
                };
                true
            }
            None => false,
        }
    }

    /// The record of `thread`, if it has one.
    #[must_use]
    pub fn current(&self, thread: ThreadId) -> Option<DiagnosticRecord> {
        let guard = self.table.lock()?;
        guard
            .as_ref()?
            .slots()
            .iter()
            .find(|record| record.thread == Some(thread))
            .copied()
    }

    /// Register state of the last fault on `thread`.
    #[must_use]
    pub fn context_record(&self, thread: ThreadId) -> Option<CpuContext> {
        self.current(thread).map(|record| record.context)
    }

    /// Exception description of the last fault on `thread`.
    #[must_use]
    pub fn exception_record(&self, thread: ThreadId) -> Option<ExceptionRecord> {
        self.current(thread).map(|record| record.exception)
    }

    /// Exception code of the last fault on `thread`.
    #[must_use]
    pub fn code(&self, thread: ThreadId) -> Option<ExceptionCode> {
        self.current(thread).map(|record| record.exception.code)
    }

    /// Frees the slot of `thread`, returning whether it had one.
    pub(crate) fn clear(&self, thread: ThreadId) -> bool {
        let Some(mut guard) = self.table.lock() else {
            return false;
        };
        let Some(table) = guard.as_mut() else {
            return false;
        };

        match table
            .slots_mut()
            .iter_mut()
            .find(|record| record.thread == Some(thread))
        {
            Some(record) => {
                *record = DiagnosticRecord::default();
                true
            }
            None => false,
        }
    }
}
