//! Factories and instrumented providers shared by the unit tests.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use crate::{
    memory::{Backing, HeapMemory, Provider},
    Config, CpuContext, ExceptionCode, ExceptionRecord, Result, Runtime, ThreadId, X64Context,
};

/// Provider that never has memory.
#[derive(Debug)]
pub struct FailingProvider;

impl Provider for FailingProvider {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn granularity(&self) -> usize {
        1
    }

    fn allocate(&self, len: usize) -> Result<Box<dyn Backing>> {
        Err(crate::Error::Allocation {
            provider: self.name(),
            len,
        })
    }
}

/// Heap provider that counts allocations and releases, and can fail after a quota.
#[derive(Debug, Default)]
pub struct CountingProvider {
    inner: HeapMemory,
    counters: Arc<Counters>,
    /// Number of successful allocations before every further one fails; 0 = unlimited
    quota: usize,
}

#[derive(Debug, Default)]
struct Counters {
    allocated: AtomicUsize,
    released: AtomicUsize,
}

impl CountingProvider {
    pub fn with_quota(quota: usize) -> Self {
        CountingProvider {
            quota,
            ..Default::default()
        }
    }

    pub fn allocated(&self) -> usize {
        self.counters.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.allocated() - self.released()
    }

    /// A second handle sharing the same counters, for handing to a `Config`.
    pub fn handle(&self) -> CountingProvider {
        CountingProvider {
            inner: self.inner,
            counters: Arc::clone(&self.counters),
            quota: self.quota,
        }
    }
}

impl Provider for CountingProvider {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn granularity(&self) -> usize {
        self.inner.granularity()
    }

    fn allocate(&self, len: usize) -> Result<Box<dyn Backing>> {
        if self.quota != 0 && self.allocated() >= self.quota {
            return Err(crate::Error::Allocation {
                provider: self.name(),
                len,
            });
        }

        let block = self.inner.allocate(len)?;
        self.counters.allocated.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountedBlock {
            block,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct CountedBlock {
    block: Box<dyn Backing>,
    counters: Arc<Counters>,
}

impl Backing for CountedBlock {
    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.block.as_mut_ptr()
    }

    fn len(&self) -> usize {
        self.block.len()
    }
}

impl Drop for CountedBlock {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Heap provider that notes whether a lock was held while it allocated or released storage.
///
/// `held` reports the state of the lock under observation; it is sampled inside
/// `allocate` and when the block is dropped.
#[derive(Debug)]
pub struct LockObservingProvider {
    inner: HeapMemory,
    held: fn() -> bool,
    observed: Arc<Observed>,
}

#[derive(Debug, Default)]
struct Observed {
    on_allocate: AtomicBool,
    on_release: AtomicBool,
}

impl LockObservingProvider {
    pub fn new(held: fn() -> bool) -> Self {
        LockObservingProvider {
            inner: HeapMemory::default(),
            held,
            observed: Arc::default(),
        }
    }

    pub fn held_on_allocate(&self) -> bool {
        self.observed.on_allocate.load(Ordering::SeqCst)
    }

    pub fn held_on_release(&self) -> bool {
        self.observed.on_release.load(Ordering::SeqCst)
    }
}

impl Provider for LockObservingProvider {
    fn name(&self) -> &'static str {
        "observing"
    }

    fn granularity(&self) -> usize {
        self.inner.granularity()
    }

    fn allocate(&self, len: usize) -> Result<Box<dyn Backing>> {
        self.observed
            .on_allocate
            .fetch_or((self.held)(), Ordering::SeqCst);
        Ok(Box::new(ObservedBlock {
            block: self.inner.allocate(len)?,
            held: self.held,
            observed: Arc::clone(&self.observed),
        }))
    }
}

struct ObservedBlock {
    block: Box<dyn Backing>,
    held: fn() -> bool,
    observed: Arc<Observed>,
}

impl Backing for ObservedBlock {
    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.block.as_mut_ptr()
    }

    fn len(&self) -> usize {
        self.block.len()
    }
}

impl Drop for ObservedBlock {
    fn drop(&mut self) {
        self.observed
            .on_release
            .fetch_or((self.held)(), Ordering::SeqCst);
    }
}

/// Synthetic thread identifier.
pub fn thread(raw: u64) -> ThreadId {
    ThreadId::new(raw).expect("thread ids in tests are non-zero")
}

/// x86-64 snapshot with distinguishable register values derived from `seed`.
pub fn snapshot(seed: u64) -> CpuContext {
    CpuContext::X64(X64Context {
        rax: 1,
        rbx: seed,
        rbp: 0x7ff0_0000 + seed * 0x100,
        rsp: 0x7ff0_0000 + seed * 0x100 - 0x40,
        rip: 0x1400_0000 + seed * 0x10,
        r12: seed ^ 0xA5A5,
        rflags: 0x246,
        ..Default::default()
    })
}

/// Access violation raised at `address`.
pub fn fault(address: u64) -> ExceptionRecord {
    ExceptionRecord::access_violation(address, crate::AccessKind::Read, 0)
}

/// Record with an arbitrary exception code.
pub fn exception(code: u32, address: u64) -> ExceptionRecord {
    ExceptionRecord::new(ExceptionCode(code), address)
}

/// Initialized runtime on the heap provider.
pub fn runtime(capacity: usize, diagnostics: bool) -> Runtime {
    let runtime = Runtime::new(
        Config::default()
            .with_capacity(capacity)
            .with_diagnostics(diagnostics)
            .with_provider(Arc::new(HeapMemory::default())),
    );
    runtime.initialize().expect("heap provider never fails in tests");
    runtime
}
