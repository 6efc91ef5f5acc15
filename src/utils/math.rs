//! Mathematical utility functions.

/// Rounds `value` up to the next multiple of `granularity`.
///
/// Memory providers hand out storage in multiples of their allocation granularity (a page,
/// or 64 KiB for Windows virtual memory reservations); table sizes are rounded with this
/// helper before they are requested. A granularity of zero or one leaves the value unchanged.
///
/// Returns `None` if the rounded value does not fit in `usize`.
///
/// # Examples
///
/// ```rust,ignore
/// use faultline::utils::align_up;
///
/// assert_eq!(align_up(1, 4096), Some(4096));
/// assert_eq!(align_up(4096, 4096), Some(4096));
/// assert_eq!(align_up(4097, 4096), Some(8192));
/// assert_eq!(align_up(10, 0), Some(10));
/// ```
#[must_use]
pub fn align_up(value: usize, granularity: usize) -> Option<usize> {
    if granularity <= 1 {
        return Some(value);
    }

    let remainder = value % granularity;
    if remainder == 0 {
        Some(value)
    } else {
        value.checked_add(granularity - remainder)
    }
}
