//! Shared low-level helpers.
//!
//! - [`synchronization`] - the spin lock guarding pool and record tables
//! - [`align_up`] - size rounding to a provider's allocation granularity

mod math;
pub mod synchronization;

pub use math::align_up;
