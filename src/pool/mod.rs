//! The entry pool: saved region-entry snapshots keyed by thread.
//!
//! Every open protected region owns one [`Entry`] holding the CPU snapshot taken when the
//! region was entered. All entries of all threads share one flat table of fixed capacity.
//! Every push stamps its entry with a pool-wide, strictly increasing sequence number, and
//! per-thread nesting is recovered from that stamp: the innermost entry of a thread is its
//! active entry with the highest sequence. Slot position carries no ordering, because other
//! threads free and refill slots in between. The result is a LIFO stack per thread, without
//! per-thread storage.
//!
//! # Operations
//!
//! | Operation | Selects | Effect |
//! |-----------|---------|--------|
//! | [`EntryPool::push`] | first inactive slot | slot becomes the thread's innermost entry |
//! | [`EntryPool::current`] | highest sequence of the thread | copy of the innermost entry |
//! | [`EntryPool::pop`] | highest sequence of the thread | innermost entry deactivated |
//!
//! # Concurrency
//!
//! Every operation, including lookup, runs under one [`SpinLock`] held for just the
//! scan-and-mutate. Nothing inside the critical section allocates, logs or can fault, so
//! the pool is usable from fault-handling context. A thread that faults while it holds
//! the lock is refused by the lock instead of deadlocking, and the operation reports failure.
//!
//! Pool exhaustion is the only capacity failure: a push into a full table returns `None`
//! and changes nothing. There is no growth and no queueing.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    memory::Provider, utils::synchronization::SpinLock, CpuContext, Error::AlreadyInitialized,
    Result, ThreadId,
};

mod table;

pub(crate) use table::Table;

/// One pool slot.
///
/// Only meaningful while [`Entry::is_active`] returns `true`; the owning thread is only valid
/// on active entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Entry {
    active: bool,
    thread: Option<ThreadId>,
    sequence: u64,
    saved: CpuContext,
}

impl Entry {
    /// Whether this slot holds an open region.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Thread owning the region.
    #[must_use]
    pub fn thread(&self) -> Option<ThreadId> {
        self.thread
    }

    /// Pool-wide push stamp; later pushes carry larger values.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The snapshot taken at region entry.
    #[must_use]
    pub fn saved_context(&self) -> &CpuContext {
        &self.saved
    }

    fn is_owned_by(&self, thread: ThreadId) -> bool {
        self.active && self.thread == Some(thread)
    }
}

/// Receipt for one pushed entry.
///
/// Identifies the exact slot and push, so [`EntryPool::pop_ticket`] releases that entry and
/// nothing else, even if the slot has since been consumed and reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ticket {
    thread: ThreadId,
    slot: usize,
    sequence: u64,
}

impl Ticket {
    /// Thread the entry was pushed for.
    #[must_use]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Table index of the entry.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Push stamp of the entry.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Fixed-capacity, thread-keyed pool of saved snapshots.
///
/// Owned by a [`Runtime`](crate::Runtime); uninitialized pools behave as empty and full at the
/// same time: lookups find nothing and pushes fail.
pub struct EntryPool {
    table: SpinLock<Option<Table<Entry>>>,
    sequence: AtomicU64,
}

impl EntryPool {
    pub(crate) const fn new() -> Self {
        EntryPool {
            table: SpinLock::new(None),
            sequence: AtomicU64::new(0),
        }
    }

    /// Allocates the table.
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

    /// Drops the table, returning its storage to the provider. `false` if there was none.
    pub(crate) fn release(&self) -> bool {
        let Some(table) = self.table.lock().and_then(|mut guard| guard.take()) else {
            return false;
        };
        // The guard is gone; the storage goes back to the provider outside the lock.
        drop(table);
        true
    }

    /// Whether storage is present.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.table.lock().is_some_and(|table| table.is_some())
    }

    /// Number of slots, 0 when uninitialized.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.table
            .lock()
            .and_then(|table| table.as_ref().map(Table::capacity))
            .unwrap_or(0)
    }

    /// Pushes `snapshot` as the innermost entry of `thread`.
    ///
    /// # Arguments
    ///
    /// * `thread` - Owner of the new entry
    /// * `snapshot` - Context to restore if a fault interrupts the region
    ///
    /// # Returns
    ///
    /// A [`Ticket`] for the new entry, or `None` if the pool is full, uninitialized or locked
    /// by the calling thread. Nothing is mutated on failure.
    pub fn push(&self, thread: ThreadId, snapshot: &CpuContext) -> Option<Ticket> {
        let mut guard = self.table.lock()?;
        let table = guard.as_mut()?;

        let (slot, entry) = table
            .slots_mut()
            .iter_mut()
            .enumerate()
            .find(|(_, entry)| !entry.active)?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        entry.saved = *snapshot;
        entry.thread = Some(thread);
        entry.sequence = sequence;
        entry.active = true;

        Some(Ticket {
            thread,
            slot,
            sequence,
        })
    }

    /// Copy of the innermost active entry of `thread`.
    #[must_use]
    pub fn current(&self, thread: ThreadId) -> Option<Entry> {
        let guard = self.table.lock()?;
        let table = guard.as_ref()?;

        table
            .slots()
            .iter()
            .filter(|entry| entry.is_owned_by(thread))
            .max_by_key(|entry| entry.sequence)
            .copied()
    }

    /// Deactivates the innermost active entry of `thread`.
    ///
    /// # Returns
    ///
    /// `true` if an entry was found and deactivated.
    pub fn pop(&self, thread: ThreadId) -> bool {
        self.take(thread).is_some()
    }

    /// Deactivates exactly the entry described by `ticket`, if it is still open.
    ///
    /// # Returns
    ///
    /// `false` if the entry was already popped or consumed by a fault.
    pub fn pop_ticket(&self, ticket: &Ticket) -> bool {
        let Some(mut guard) = self.table.lock() else {
            return false;
        };
        let Some(entry) = guard
            .as_mut()
            .and_then(|table| table.slots_mut().get_mut(ticket.slot))
        else {
            return false;
        };

        if entry.is_owned_by(ticket.thread) && entry.sequence == ticket.sequence {
            entry.active = false;
            true
        } else {
            false
        }
    }

    /// Deactivates the innermost entry of `thread` and returns its snapshot.
    ///
    /// Lookup and pop happen inside a single critical section.
    pub(crate) fn take(&self, thread: ThreadId) -> Option<CpuContext> {
        let mut guard = self.table.lock()?;
        let table = guard.as_mut()?;

        let entry = table
            .slots_mut()
            .iter_mut()
            .filter(|entry| entry.is_owned_by(thread))
            .max_by_key(|entry| entry.sequence)?;

        entry.active = false;
        Some(entry.saved)
    }

    /// Number of open regions of `thread`.
    #[must_use]
    pub fn depth(&self, thread: ThreadId) -> usize {
        self.table
            .lock()
            .and_then(|table| {
                table.as_ref().map(|table| {
                    table
                        .slots()
                        .iter()
                        .filter(|entry| entry.is_owned_by(thread))
                        .count()
                })
            })
            .unwrap_or(0)
    }

    /// Number of open regions across all threads.
    #[must_use]
    pub fn active(&self) -> usize {
        self.table
            .lock()
            .and_then(|table| {
                table
                    .as_ref()
                    .map(|table| table.slots().iter().filter(|entry| entry.active).count())
            })
            .unwrap_or(0)
    }

    /// Deactivates every entry of `thread`, returning how many were open.
    pub(crate) fn purge(&self, thread: ThreadId) -> usize {
        let Some(mut guard) = self.table.lock() else {
            return 0;
        };
        let Some(table) = guard.as_mut() else {
            return 0;
        };

        let mut purged = 0;
        for entry in table.slots_mut() {
            if entry.is_owned_by(thread) {
                entry.active = false;
                purged += 1;
            }
        }
        purged
    }
}
