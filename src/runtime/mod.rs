//! The exception interceptor and its runtime object.
//!
//! A [`Runtime`] owns the [`EntryPool`] and the optional [`RecordBuffer`] and implements the
//! decision procedure a platform dispatcher calls for every exception. The runtime has no
//! global state: any number of instances can coexist, each with its own storage, and a
//! dispatcher adapter is bound to one of them explicitly (see [`crate::platform::install`]).
//!
//! # Lifecycle
//!
//! ```text
//! new ──initialize──► initialized ──shutdown──► uninitialized ──initialize──► ...
//! ```
//!
//! An uninitialized runtime declines every exception and every region entry.
//!
//! # Interception
//!
//! [`Runtime::handle_exception`] classifies each exception with [`Request::decode`]:
//!
//! - [`Request::EnterRegion`] and [`Request::ExitRegion`] perform the boundary transition
//!   in place of the trapping code and resume right after the trap.
//! - [`Request::Fault`] looks up the faulting thread's innermost open region. Without one
//!   the exception is not ours and the search continues. With one, the live context is
//!   replaced by the region's entry snapshot and its return register is forced to zero, so
//!   the thread resumes at the region's entry call site observing failure and takes its
//!   fallback branch.
//!
//! The fault path never allocates, never logs and never blocks on an operating system
//! primitive.

mod region;
mod request;

use std::fmt;

use crate::{
    Config, CpuContext, Disposition, EntryPool, ExceptionRecord, RecordBuffer, Result, ThreadId,
};

pub use region::{EntryFrame, RegionGuard};
pub use request::{Request, ENTER_REGION_SENTINEL, EXIT_REGION_SENTINEL};

/// Manual structured exception handling engine.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use faultline::{
///     memory::HeapMemory, AccessKind, Config, CpuContext, Disposition, ExceptionRecord,
///     Runtime, ThreadId, X64Context,
/// };
///
/// let runtime = Runtime::new(
///     Config::default().with_capacity(8).with_provider(Arc::new(HeapMemory::default())),
/// );
/// runtime.initialize()?;
///
/// let thread = ThreadId::new(1).unwrap();
/// let snapshot = CpuContext::X64(X64Context { rip: 0x1000, rax: 1, ..Default::default() });
/// assert!(runtime.enter_region(thread, &snapshot, None));
///
/// // A fault somewhere inside the region
/// let mut live = CpuContext::X64(X64Context { rip: 0x2345, ..Default::default() });
/// let fault = ExceptionRecord::access_violation(0x2345, AccessKind::Read, 0);
/// assert_eq!(
///     runtime.handle_exception(thread, &mut live, &fault),
///     Disposition::ContinueExecution
/// );
/// assert_eq!(live.instruction_pointer(), 0x1000);
/// assert_eq!(live.return_value(), 0);
///
/// runtime.shutdown();
/// # Ok::<(), faultline::Error>(())
/// ```
pub struct Runtime {
    config: Config,
    entries: EntryPool,
    records: RecordBuffer,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .field("active", &self.entries.active())
            .finish()
    }
}

impl Runtime {
    /// Creates an uninitialized runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Runtime {
            config,
            entries: EntryPool::new(),
            records: RecordBuffer::new(),
        }
    }

    /// Allocates the entry pool, and the diagnostic record buffer if enabled.
    ///
    /// Storage comes from the configured provider, rounded up to its granularity and
    /// zero-filled. Either everything is allocated or nothing is.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InvalidCapacity`] for a zero or overflowing capacity
    /// - [`crate::Error::AlreadyInitialized`] if the runtime is already initialized
    /// - any provider error ([`crate::Error::Allocation`], [`crate::Error::Io`],
    ///   [`crate::Error::Misaligned`])
    pub fn initialize(&self) -> Result<()> {
        self.config.validate()?;

        let provider = self.config.provider.as_ref();
        self.entries.initialize(provider, self.config.capacity)?;

        if self.config.diagnostics {
            if let Err(error) = self.records.initialize(provider, self.config.capacity) {
                self.entries.release();
                return Err(error);
            }
        }

        log::debug!(
            "runtime initialized: {} slots from '{}' provider, diagnostics {}",
            self.config.capacity,
            provider.name(),
            if self.config.diagnostics { "on" } else { "off" }
        );
        Ok(())
    }

    /// Releases all storage and returns to the uninitialized state.
    ///
    /// Open regions are discarded. Calling this on an uninitialized runtime does nothing.
    ///
    /// # Returns
    ///
    /// `true` if storage was released, `false` if there was none.
    pub fn shutdown(&self) -> bool {
        let released = self.entries.release();
        self.records.release();

        if released {
            log::debug!("runtime shut down");
        }
        released
    }

    /// Whether [`Runtime::initialize`] succeeded and no shutdown followed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.entries.is_initialized()
    }

    /// The configuration the runtime was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The entry pool.
    #[must_use]
    pub fn entries(&self) -> &EntryPool {
        &self.entries
    }

    /// The diagnostic record buffer; empty unless diagnostics are enabled.
    #[must_use]
    pub fn records(&self) -> &RecordBuffer {
        &self.records
    }

    /// Decides what happens to an exception raised on `thread`.
    ///
    /// Must be called on the faulting thread, from the platform's exception dispatch path.
    /// `context` is the live register state the thread resumes with when the result is
    /// [`Disposition::ContinueExecution`], and may be rewritten.
    ///
    /// # Arguments
    ///
    /// * `thread` - The faulting thread
    /// * `context` - Live register state, rewritten in place when handled
    /// * `record` - Description of the exception
    ///
    /// # Returns
    ///
    /// * [`Disposition::ContinueExecution`] if the exception was a boundary trap or was
    ///   redirected into a region's fallback branch
    /// * [`Disposition::ContinueSearch`] if the runtime is uninitialized or the thread has no
    ///   open region
    pub fn handle_exception(
        &self,
        thread: ThreadId,
        context: &mut CpuContext,
        record: &ExceptionRecord,
    ) -> Disposition {
        if !self.entries.is_initialized() {
            return Disposition::ContinueSearch;
        }

        let request = if self.config.trap_protocol {
            Request::decode(context, record)
        } else {
            Request::Fault
        };

        match request {
            Request::EnterRegion => {
                context.skip_trap(record.address);
                let pushed = self.entries.push(thread, context).is_some();
                context.set_return_value(u64::from(pushed));
                Disposition::ContinueExecution
            }
            Request::ExitRegion => {
                let popped = self.entries.pop(thread);
                context.skip_trap(record.address);
                context.set_return_value(u64::from(popped));
                Disposition::ContinueExecution
            }
            Request::Fault => {
                let Some(saved) = self.entries.take(thread) else {
                    return Disposition::ContinueSearch;
                };

                if self.config.diagnostics {
                    self.records.push(thread, context, record);
                }

                *context = saved;
                context.set_return_value(0);
                Disposition::ContinueExecution
            }
        }
    }

    /// Forgets everything recorded for `thread`.
    ///
    /// Call when a thread exits, so that a later thread reusing its identifier does not
    /// inherit its open regions or its diagnostic record.
    ///
    /// # Returns
    ///
    /// Number of entries and records released.
    pub fn release_thread(&self, thread: ThreadId) -> usize {
        self.entries.purge(thread) + usize::from(self.records.clear(thread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test::{exception, fault, runtime, snapshot, thread, CountingProvider, FailingProvider},
        Error, ExceptionCode, X64Context,
    };
    use std::sync::Arc;

    fn trap(value: u64, address: u64) -> (CpuContext, ExceptionRecord) {
        let context = CpuContext::X64(X64Context {
            rax: value,
            rbx: 0x77,
            rsp: 0x8000,
            rip: address + 1,
            ..Default::default()
        });
        (context, ExceptionRecord::breakpoint(address))
    }

    #[test]
    fn test_unrelated_fault_is_declined() {
        let runtime = runtime(4, false);

        for code in [0xC000_0005, 0x8000_0003, 0xC000_0094, 0xE06D_7363] {
            let mut context = snapshot(9);
            assert_eq!(
                runtime.handle_exception(thread(2), &mut context, &exception(code, 0x10)),
                Disposition::ContinueSearch
            );
            assert_eq!(context, snapshot(9));
        }
    }

    #[test]
    fn test_fault_restores_entry_snapshot() {
        let runtime = runtime(4, false);
        let owner = thread(3);
        let saved = snapshot(1);

        assert!(runtime.enter_region(owner, &saved, None));

        let mut live = snapshot(5);
        assert_eq!(
            runtime.handle_exception(owner, &mut live, &fault(0xBAD)),
            Disposition::ContinueExecution
        );

        let mut expected = saved;
        expected.set_return_value(0);
        assert_eq!(live, expected);
        assert!(runtime.entries().current(owner).is_none());
    }

    #[test]
    fn test_fault_unwinds_innermost_only() {
        let runtime = runtime(4, false);
        let owner = thread(1);

        runtime.enter_region(owner, &snapshot(1), None);
        runtime.enter_region(owner, &snapshot(2), None);

        let mut live = snapshot(7);
        runtime.handle_exception(owner, &mut live, &fault(0));
        assert_eq!(live.instruction_pointer(), snapshot(2).instruction_pointer());

        let mut live = snapshot(7);
        runtime.handle_exception(owner, &mut live, &fault(0));
        assert_eq!(live.instruction_pointer(), snapshot(1).instruction_pointer());

        let mut live = snapshot(7);
        assert_eq!(
            runtime.handle_exception(owner, &mut live, &fault(0)),
            Disposition::ContinueSearch
        );
    }

    #[test]
    fn test_fault_after_interleaved_regions() {
        let runtime = runtime(4, false);
        let (a, b) = (thread(1), thread(2));

        runtime.enter_region(a, &snapshot(10), None);
        runtime.enter_region(b, &snapshot(20), None);
        runtime.enter_region(a, &snapshot(11), None);
        assert!(runtime.exit_region(b));
        runtime.enter_region(a, &snapshot(12), None);

        let mut live = snapshot(7);
        runtime.handle_exception(a, &mut live, &fault(0));
        assert_eq!(live.instruction_pointer(), snapshot(12).instruction_pointer());

        assert!(runtime.exit_region(a));
        assert_eq!(
            runtime.entries().current(a).unwrap().saved_context(),
            &snapshot(10)
        );
    }

    #[test]
    fn test_uninitialized_runtime_declines_everything() {
        let runtime = Runtime::new(Config::default());
        let (mut context, record) = trap(ENTER_REGION_SENTINEL, 0x1000);

        assert!(!runtime.is_initialized());
        assert_eq!(
            runtime.handle_exception(thread(1), &mut context, &record),
            Disposition::ContinueSearch
        );
        assert!(!runtime.enter_region(thread(1), &snapshot(1), None));
    }

    #[test]
    fn test_enter_trap_pushes_resumable_context() {
        let runtime = runtime(4, false);
        let owner = thread(1);
        let (mut context, record) = trap(ENTER_REGION_SENTINEL, 0x1000);

        assert_eq!(
            runtime.handle_exception(owner, &mut context, &record),
            Disposition::ContinueExecution
        );
        assert_eq!(context.instruction_pointer(), 0x1001);
        assert_eq!(context.return_value(), 1);

        let entry = runtime.entries().current(owner).unwrap();
        assert_eq!(entry.saved_context().instruction_pointer(), 0x1001);
        assert_eq!(entry.saved_context().stack_pointer(), 0x8000);

        // A later fault resumes right after the trap with a zero return value.
        let mut live = snapshot(3);
        runtime.handle_exception(owner, &mut live, &fault(0x2000));
        assert_eq!(live.instruction_pointer(), 0x1001);
        assert_eq!(live.return_value(), 0);
        assert_eq!(live.stack_pointer(), 0x8000);
    }

    #[test]
    fn test_enter_trap_reports_exhaustion() {
        let runtime = runtime(1, false);
        let owner = thread(1);

        let (mut first, record) = trap(ENTER_REGION_SENTINEL, 0x1000);
        runtime.handle_exception(owner, &mut first, &record);
        assert_eq!(first.return_value(), 1);

        let (mut second, record) = trap(ENTER_REGION_SENTINEL, 0x1100);
        assert_eq!(
            runtime.handle_exception(owner, &mut second, &record),
            Disposition::ContinueExecution
        );
        assert_eq!(second.return_value(), 0);
        assert_eq!(second.instruction_pointer(), 0x1101);
        assert_eq!(runtime.entries().depth(owner), 1);
    }

    #[test]
    fn test_exit_trap_pops() {
        let runtime = runtime(4, false);
        let owner = thread(1);
        runtime.enter_region(owner, &snapshot(1), None);

        let (mut context, record) = trap(EXIT_REGION_SENTINEL, 0x3000);
        assert_eq!(
            runtime.handle_exception(owner, &mut context, &record),
            Disposition::ContinueExecution
        );
        assert_eq!(context.instruction_pointer(), 0x3001);
        assert_eq!(context.return_value(), 1);
        assert_eq!(runtime.entries().depth(owner), 0);

        let (mut context, record) = trap(EXIT_REGION_SENTINEL, 0x3000);
        assert_eq!(
            runtime.handle_exception(owner, &mut context, &record),
            Disposition::ContinueExecution
        );
        assert_eq!(context.return_value(), 0);
    }

    #[test]
    fn test_trap_protocol_disabled() {
        let runtime = Runtime::new(
            Config::default()
                .with_capacity(2)
                .with_trap_protocol(false)
                .with_provider(Arc::new(CountingProvider::default())),
        );
        runtime.initialize().unwrap();

        let (mut context, record) = trap(ENTER_REGION_SENTINEL, 0x1000);
        assert_eq!(
            runtime.handle_exception(thread(1), &mut context, &record),
            Disposition::ContinueSearch
        );
        assert_eq!(runtime.entries().active(), 0);
    }

    #[test]
    fn test_diagnostics_record_faulting_context() {
        let runtime = runtime(4, true);
        let owner = thread(1);

        runtime.enter_region(owner, &snapshot(1), None);
        let mut live = snapshot(5);
        runtime.handle_exception(owner, &mut live, &fault(0xBAD));

        let record = runtime.records().current(owner).unwrap();
        assert_eq!(record.context(), &snapshot(5));
        assert_eq!(record.exception().code, ExceptionCode::ACCESS_VIOLATION);
        assert_eq!(record.exception().address, 0xBAD);
    }

    #[test]
    fn test_diagnostics_disabled_records_nothing() {
        let runtime = runtime(4, false);
        let owner = thread(1);

        runtime.enter_region(owner, &snapshot(1), None);
        runtime.handle_exception(owner, &mut snapshot(5), &fault(0xBAD));
        assert!(runtime.records().current(owner).is_none());
    }

    #[test]
    fn test_double_shutdown() {
        let provider = CountingProvider::default();
        let runtime = Runtime::new(
            Config::diagnostic()
                .with_capacity(4)
                .with_provider(Arc::new(provider.handle())),
        );

        runtime.initialize().unwrap();
        assert_eq!(provider.live(), 2);
        assert!(runtime.shutdown());
        assert!(!runtime.shutdown());
        assert_eq!(provider.allocated(), 2);
        assert_eq!(provider.released(), 2);
        assert!(!runtime.is_initialized());
    }

    #[test]
    fn test_initialize_twice() {
        let runtime = runtime(2, false);
        assert!(matches!(runtime.initialize(), Err(Error::AlreadyInitialized)));
        assert!(runtime.shutdown());
        assert!(runtime.initialize().is_ok());
    }

    #[test]
    fn test_failed_initialize_leaves_nothing() {
        let provider = CountingProvider::with_quota(1);
        let runtime = Runtime::new(
            Config::diagnostic()
                .with_capacity(4)
                .with_provider(Arc::new(provider.handle())),
        );

        assert!(matches!(runtime.initialize(), Err(Error::Allocation { .. })));
        assert!(!runtime.is_initialized());
        assert_eq!(provider.live(), 0);

        let runtime = Runtime::new(Config::default().with_provider(Arc::new(FailingProvider)));
        assert!(runtime.initialize().is_err());
        assert!(!runtime.shutdown());
    }

    #[test]
    fn test_release_thread() {
        let runtime = runtime(4, true);
        let (gone, other) = (thread(1), thread(2));

        runtime.enter_region(gone, &snapshot(1), None);
        runtime.enter_region(gone, &snapshot(2), None);
        runtime.enter_region(other, &snapshot(3), None);
        runtime.handle_exception(gone, &mut snapshot(4), &fault(0));

        assert_eq!(runtime.release_thread(gone), 2);
        assert_eq!(runtime.entries().depth(gone), 0);
        assert!(runtime.records().current(gone).is_none());
        assert_eq!(runtime.entries().depth(other), 1);
        assert_eq!(runtime.release_thread(gone), 0);
    }
}
