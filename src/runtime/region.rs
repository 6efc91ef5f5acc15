//! Region boundary protocol: entering and leaving protected regions.
//!
//! A protected region is opened by pushing a snapshot that represents the state right after
//! the entry call returned, and closed by popping it again once the body completed. The
//! pairing must hold on every exit path of the body; [`RegionGuard`] performs the exit step
//! on drop, including during a panic.
//!
//! Entering can fail when the pool is exhausted. The body then runs unprotected: a fault
//! inside it reaches whatever handling the process had before. Callers that cannot tolerate
//! that should run their fallback instead, which is what [`Runtime::guarded`] does.

use std::ops::Range;

use crate::{CpuContext, Runtime, ThreadId, Ticket};

/// Describes the helper routine that captured an entry snapshot.
///
/// A capture routine called from a helper records the helper's own instruction pointer.
/// Restoring such a snapshot would resume inside the helper; the frame tells the runtime
/// where the helper returns to, so the stored snapshot resumes at the call site instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryFrame {
    /// Code range of the helper
    pub helper: Range<u64>,
    /// Address the helper returns to
    pub return_address: u64,
    /// Stack pointer of the caller after the helper returned
    pub stack_pointer: u64,
}

impl EntryFrame {
    /// Rewrites `snapshot` to the caller's state if it was captured inside the helper.
    ///
    /// # Returns
    ///
    /// `true` if the snapshot was rewritten.
    pub fn normalize(&self, snapshot: &mut CpuContext) -> bool {
        if !self.helper.contains(&snapshot.instruction_pointer()) {
            return false;
        }

        snapshot.set_instruction_pointer(self.return_address);
        snapshot.set_stack_pointer(self.stack_pointer);
        true
    }
}

/// An open protected region.
///
/// Dropping the guard closes the region. If a fault already consumed the region's entry,
/// dropping does nothing; in particular it never closes an enclosing region.
#[must_use = "dropping the guard immediately closes the region"]
#[derive(Debug)]
pub struct RegionGuard<'a> {
    runtime: &'a Runtime,
    ticket: Ticket,
    closed: bool,
}

impl RegionGuard<'_> {
    /// The pool entry this guard closes.
    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    /// Closes the region now.
    ///
    /// # Returns
    ///
    /// `true` if the region was still open, `false` if a fault had consumed it.
    pub fn exit(mut self) -> bool {
        self.close()
    }

    fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.runtime.entries().pop_ticket(&self.ticket)
    }
}

impl Drop for RegionGuard<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl Runtime {
    /// Entry step of a protected region.
    ///
    /// # Arguments
    ///
    /// * `thread` - Thread opening the region
    /// * `snapshot` - State to restore if a fault interrupts the region
    /// * `frame` - Helper description used to normalize `snapshot`, if it was captured
    ///   inside an entry helper
    ///
    /// # Returns
    ///
    /// `true` if the region is protected. `false` if the pool is exhausted or the runtime is
    /// uninitialized; the caller decides whether to run the body unprotected.
    pub fn enter_region(
        &self,
        thread: ThreadId,
        snapshot: &CpuContext,
        frame: Option<&EntryFrame>,
    ) -> bool {
        self.open(thread, snapshot, frame).is_some()
    }

    /// Exit step of a protected region: closes the innermost open region of `thread`.
    ///
    /// # Returns
    ///
    /// `false` if the thread had no open region.
    pub fn exit_region(&self, thread: ThreadId) -> bool {
        self.entries().pop(thread)
    }

    /// Scoped entry step.
    ///
    /// Like [`Runtime::enter_region`], but returns a guard that performs the exit step for
    /// exactly this region when dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use faultline::{memory::HeapMemory, Config, CpuContext, Runtime, ThreadId};
    ///
    /// let runtime = Runtime::new(Config::default().with_provider(Arc::new(HeapMemory::default())));
    /// runtime.initialize()?;
    /// let thread = ThreadId::new(7).unwrap();
    ///
    /// if let Some(_guard) = runtime.protect(thread, &CpuContext::default(), None) {
    ///     assert_eq!(runtime.entries().depth(thread), 1);
    /// }
    /// assert_eq!(runtime.entries().depth(thread), 0);
    /// # Ok::<(), faultline::Error>(())
    /// ```
    pub fn protect(
        &self,
        thread: ThreadId,
        snapshot: &CpuContext,
        frame: Option<&EntryFrame>,
    ) -> Option<RegionGuard<'_>> {
        let ticket = self.open(thread, snapshot, frame)?;
        Some(RegionGuard {
            runtime: self,
            ticket,
            closed: false,
        })
    }

    /// Runs `body` inside a protected region, or `recover` if the region cannot be opened.
    ///
    /// # Arguments
    ///
    /// * `thread` - Thread opening the region
    /// * `snapshot` - State to restore if a fault interrupts the region
    /// * `frame` - Optional entry helper description
    /// * `body` - Protected code; the region is closed on every exit path
    /// * `recover` - Fallback run when the region could not be opened
    pub fn guarded<R>(
        &self,
        thread: ThreadId,
        snapshot: &CpuContext,
        frame: Option<&EntryFrame>,
        body: impl FnOnce() -> R,
        recover: impl FnOnce() -> R,
    ) -> R {
        match self.protect(thread, snapshot, frame) {
            Some(_guard) => body(),
            None => recover(),
        }
    }

    fn open(
        &self,
        thread: ThreadId,
        snapshot: &CpuContext,
        frame: Option<&EntryFrame>,
    ) -> Option<Ticket> {
        let mut snapshot = *snapshot;
        if let Some(frame) = frame {
            frame.normalize(&mut snapshot);
        }

        let ticket = self.entries().push(thread, &snapshot);
        if ticket.is_none() && self.is_initialized() {
            log::warn!(
                "entry pool exhausted ({} slots), region on thread {thread} runs unprotected",
                self.entries().capacity()
            );
        }
        ticket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test::{fault, runtime, snapshot, thread},
        Disposition,
    };
    use std::panic::{self, AssertUnwindSafe};

    fn frame() -> EntryFrame {
        EntryFrame {
            helper: 0x5000..0x5100,
            return_address: 0x1234,
            stack_pointer: 0x9000,
        }
    }

    #[test]
    fn test_normalize_inside_helper() {
        let mut context = snapshot(0);
        context.set_instruction_pointer(0x5010);

        assert!(frame().normalize(&mut context));
        assert_eq!(context.instruction_pointer(), 0x1234);
        assert_eq!(context.stack_pointer(), 0x9000);
    }

    #[test]
    fn test_normalize_outside_helper() {
        let mut context = snapshot(0);
        context.set_instruction_pointer(0x5100);

        assert!(!frame().normalize(&mut context));
        assert_eq!(context, {
            let mut expected = snapshot(0);
            expected.set_instruction_pointer(0x5100);
            expected
        });
    }

    #[test]
    fn test_enter_region_stores_normalized_snapshot() {
        let runtime = runtime(2, false);
        let owner = thread(1);
        let mut captured = snapshot(1);
        captured.set_instruction_pointer(0x5020);

        assert!(runtime.enter_region(owner, &captured, Some(&frame())));
        let saved = *runtime.entries().current(owner).unwrap().saved_context();
        assert_eq!(saved.instruction_pointer(), 0x1234);
        assert_eq!(saved.stack_pointer(), 0x9000);
        assert_eq!(saved.frame_pointer(), captured.frame_pointer());
    }

    #[test]
    fn test_enter_exit_pairing() {
        let runtime = runtime(4, false);
        let owner = thread(1);

        assert!(runtime.enter_region(owner, &snapshot(1), None));
        assert!(runtime.enter_region(owner, &snapshot(2), None));
        assert!(runtime.exit_region(owner));
        assert!(runtime.exit_region(owner));
        assert!(!runtime.exit_region(owner));
    }

    #[test]
    fn test_guard_closes_on_drop() {
        let runtime = runtime(4, false);
        let owner = thread(1);

        {
            let _outer = runtime.protect(owner, &snapshot(1), None).unwrap();
            {
                let _inner = runtime.protect(owner, &snapshot(2), None).unwrap();
                assert_eq!(runtime.entries().depth(owner), 2);
            }
            assert_eq!(runtime.entries().depth(owner), 1);
        }
        assert_eq!(runtime.entries().depth(owner), 0);
    }

    #[test]
    fn test_guard_closes_on_panic() {
        let runtime = runtime(4, false);
        let owner = thread(1);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = runtime.protect(owner, &snapshot(1), None).unwrap();
            panic!("body failed");
        }));

        assert!(result.is_err());
        assert_eq!(runtime.entries().depth(owner), 0);
    }

    #[test]
    fn test_guard_after_fault_leaves_outer_region() {
        let runtime = runtime(4, false);
        let owner = thread(1);

        let outer = runtime.protect(owner, &snapshot(1), None).unwrap();
        let inner = runtime.protect(owner, &snapshot(2), None).unwrap();

        let mut live = snapshot(9);
        assert_eq!(
            runtime.handle_exception(owner, &mut live, &fault(0)),
            Disposition::ContinueExecution
        );

        assert!(!inner.exit());
        assert_eq!(runtime.entries().depth(owner), 1);
        assert!(outer.exit());
    }

    #[test]
    fn test_guarded_runs_body_or_recover() {
        let runtime = runtime(1, false);
        let owner = thread(1);

        let depth = runtime.guarded(
            owner,
            &snapshot(1),
            None,
            || runtime.entries().depth(owner),
            || usize::MAX,
        );
        assert_eq!(depth, 1);
        assert_eq!(runtime.entries().depth(owner), 0);

        let _held = runtime.protect(owner, &snapshot(1), None).unwrap();
        let outcome = runtime.guarded(owner, &snapshot(2), None, || "body", || "recover");
        assert_eq!(outcome, "recover");
    }
}
