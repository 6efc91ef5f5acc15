//! Fixed-capacity slot table carved out of a provider block.

use std::{mem, ptr::NonNull, slice};

use crate::{
    memory::{Backing, Provider},
    utils::align_up,
    Error::{InvalidCapacity, Misaligned},
    Result,
};

/// A fixed number of `T` slots living in storage obtained from a [`Provider`].
///
/// The table never grows. It is created once during initialization and released by being
/// dropped, which drops the owned [`Backing`] and thereby returns the memory to the
/// provider exactly once.
pub(crate) struct Table<T> {
    slots: NonNull<T>,
    capacity: usize,
    /// Keeps the storage alive; `slots` points into it
    backing: Box<dyn Backing>,
}

// SAFETY: the table uniquely owns its storage; `T` values are only reachable through it.
unsafe impl<T: Send> Send for Table<T> {}
// SAFETY: shared access only hands out `&[T]`.
unsafe impl<T: Sync> Sync for Table<T> {}

impl<T: Copy + Default> Table<T> {
    /// Allocates `capacity` slots, zero-fills the storage and resets every slot to `T::default()`.
    ///
    /// # Arguments
    ///
    /// * `provider` - Source of the storage
    /// * `capacity` - Number of slots
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InvalidCapacity`] if `capacity` is zero or the size overflows
    /// - [`crate::Error::Misaligned`] if the provider returned unusable storage
    /// - any error of [`Provider::allocate`]
    pub(crate) fn allocate(provider: &dyn Provider, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(InvalidCapacity(capacity));
        }

        let bytes = capacity
            .checked_mul(mem::size_of::<T>())
            .ok_or(InvalidCapacity(capacity))?;
        let len = align_up(bytes, provider.granularity()).ok_or(InvalidCapacity(capacity))?;

        let mut backing = provider.allocate(len)?;
        let base = backing.as_mut_ptr();
        if base.is_null() || backing.len() < bytes || base as usize % mem::align_of::<T>() != 0 {
            return Err(Misaligned {
                provider: provider.name(),
                address: base as usize,
                len: backing.len(),
            });
        }

        // SAFETY: `base` is non-null, aligned for `T` and valid for `backing.len()` bytes,
        // which covers `capacity` slots.
        let slots = unsafe {
            base.write_bytes(0, backing.len());
            let slots = base.cast::<T>();
            for index in 0..capacity {
                slots.add(index).write(T::default());
            }
            NonNull::new_unchecked(slots)
        };

        Ok(Table {
            slots,
            capacity,
            backing,
        })
    }
}

impl<T> Table<T> {
    /// Number of slots.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// All slots, in table order.
    pub(crate) fn slots(&self) -> &[T] {
        // SAFETY: `slots` points to `capacity` initialized values owned by `backing`.
        unsafe { slice::from_raw_parts(self.slots.as_ptr(), self.capacity) }
    }

    /// All slots, in table order, mutably.
    pub(crate) fn slots_mut(&mut self) -> &mut [T] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { slice::from_raw_parts_mut(self.slots.as_ptr(), self.capacity) }
    }
}
