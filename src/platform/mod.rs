//! Operating system adapters.
//!
//! The engine itself is platform neutral: it is handed a thread identifier, a register
//! snapshot and an exception description, and answers with a [`Disposition`](crate::Disposition).
//! This module connects it to the operating system.
//!
//! | Platform | Thread identity | Dispatcher | Context capture |
//! |----------|-----------------|------------|-----------------|
//! | Windows x86-64 | `GetCurrentThreadId` | vectored exception handler | `RtlCaptureContext` |
//! | Linux x86-64 | `gettid` | `sigaction` for SIGSEGV, SIGBUS, SIGILL, SIGFPE, SIGTRAP | - |
//! | other unix | `pthread_self` | - | - |
//!
//! Only one runtime can be bound to the process dispatcher at a time. The binding lives as
//! long as the returned [`Registration`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use faultline::{platform, Config, Runtime};
//!
//! let runtime: &'static Runtime = Box::leak(Box::new(Runtime::new(Config::default())));
//! runtime.initialize()?;
//!
//! let registration = platform::install(runtime)?;
//! // ... protected regions on any thread are now honoured
//! registration.uninstall()?;
//! # Ok::<(), faultline::Error>(())
//! ```

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod linux;
#[cfg(all(windows, target_arch = "x86_64"))]
mod windows;

use std::{
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

#[cfg(all(windows, target_arch = "x86_64"))]
pub use self::windows::capture_context;

use crate::{
    Error::{AlreadyInstalled, NotInstalled},
    Result, Runtime, ThreadId,
};

/// Allocation granularity assumed when the operating system cannot be asked.
const FALLBACK_GRANULARITY: usize = 4096;

/// Identifier reported if the operating system hands out a zero thread id.
const UNKNOWN_THREAD: ThreadId = match ThreadId::new(u64::MAX) {
    Some(thread) => thread,
    None => unreachable!(),
};

/// Runtime bound to the process dispatcher, null when none is.
static REGISTERED: AtomicPtr<Runtime> = AtomicPtr::new(ptr::null_mut());

/// Identifier of the calling thread.
#[must_use]
pub fn current_thread_id() -> ThreadId {
    ThreadId::new(raw_thread_id()).unwrap_or(UNKNOWN_THREAD)
}

#[cfg(target_os = "linux")]
fn raw_thread_id() -> u64 {
    // SAFETY: gettid takes no arguments and cannot fail.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    u64::try_from(tid).unwrap_or(0)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn raw_thread_id() -> u64 {
    // SAFETY: pthread_self has no preconditions.
    unsafe { libc::pthread_self() as usize as u64 }
}

#[cfg(windows)]
fn raw_thread_id() -> u64 {
    // SAFETY: GetCurrentThreadId has no preconditions.
    u64::from(unsafe { ::windows_sys::Win32::System::Threading::GetCurrentThreadId() })
}

#[cfg(not(any(unix, windows)))]
fn raw_thread_id() -> u64 {
    use std::sync::atomic::AtomicU64;

    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static ID: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}

/// Granularity at which the operating system hands out fresh memory.
///
/// The page size on unix, the allocation granularity (usually 64 KiB) on Windows.
#[must_use]
pub fn allocation_granularity() -> usize {
    let granularity = os_granularity();
    if granularity.is_power_of_two() {
        granularity
    } else {
        FALLBACK_GRANULARITY
    }
}

#[cfg(unix)]
fn os_granularity() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(FALLBACK_GRANULARITY)
}

#[cfg(windows)]
fn os_granularity() -> usize {
    use ::windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    // SAFETY: SYSTEM_INFO is plain data and GetSystemInfo fills all of it.
    let info = unsafe {
        let mut info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut info);
        info
    };
    usize::try_from(info.dwAllocationGranularity).unwrap_or(FALLBACK_GRANULARITY)
}

#[cfg(not(any(unix, windows)))]
fn os_granularity() -> usize {
    FALLBACK_GRANULARITY
}

/// The runtime currently bound to the dispatcher.
pub(crate) fn registered() -> Option<&'static Runtime> {
    let runtime = REGISTERED.load(Ordering::Acquire);
    // SAFETY: only `install` stores non-null values, taken from a `&'static Runtime`.
    unsafe { runtime.as_ref() }
}

/// Binds `runtime` to the process exception dispatcher.
///
/// From now on every exception raised in the process is offered to
/// [`Runtime::handle_exception`] first. Exceptions the runtime declines continue to whatever
/// handling was in place before.
///
/// # Arguments
///
/// * `runtime` - The runtime to bind; must outlive the process dispatcher, hence `'static`
///
/// # Errors
///
/// - [`crate::Error::AlreadyInstalled`] if a runtime is already bound
/// - [`crate::Error::Install`] if the operating system refused the handler
/// - [`crate::Error::Unsupported`] on platforms without a dispatcher adapter
pub fn install(runtime: &'static Runtime) -> Result<Registration> {
    let pointer = ptr::from_ref(runtime).cast_mut();
    if REGISTERED
        .compare_exchange(ptr::null_mut(), pointer, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(AlreadyInstalled);
    }

    if let Err(error) = backend::register() {
        REGISTERED.store(ptr::null_mut(), Ordering::Release);
        return Err(error);
    }

    log::info!("exception dispatcher installed ({})", backend::NAME);
    Ok(Registration { installed: true })
}

/// The binding between a runtime and the process dispatcher.
///
/// Dropping the registration unbinds the runtime and restores the previous handlers.
#[must_use = "dropping the registration uninstalls the dispatcher"]
#[derive(Debug)]
pub struct Registration {
    installed: bool,
}

impl Registration {
    /// Unbinds the runtime and restores the previous handlers.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Install`] if the operating system refused to restore a
    /// previous handler.
    pub fn uninstall(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.installed {
            return Err(NotInstalled);
        }
        self.installed = false;

        let result = backend::unregister();
        REGISTERED.store(ptr::null_mut(), Ordering::Release);
        log::info!("exception dispatcher uninstalled ({})", backend::NAME);
        result
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.installed {
            return;
        }
        if let Err(error) = self.release() {
            log::warn!("failed to restore previous exception handlers: {error}");
        }
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
use self::linux as backend;

#[cfg(all(windows, target_arch = "x86_64"))]
use self::windows as backend;

#[cfg(not(any(
    all(target_os = "linux", target_arch = "x86_64"),
    all(windows, target_arch = "x86_64")
)))]
mod backend {
    use crate::{Error::Unsupported, Result};

    pub(super) const NAME: &str = "unsupported";

    pub(super) fn register() -> Result<()> {
        Err(Unsupported)
    }

    pub(super) fn unregister() -> Result<()> {
        Err(Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_is_power_of_two() {
        let granularity = allocation_granularity();
        assert!(granularity.is_power_of_two());
        assert!(granularity >= 4096);
    }

    #[test]
    fn test_thread_id_is_real() {
        assert_ne!(current_thread_id(), UNKNOWN_THREAD);
    }

    #[test]
    fn test_nothing_registered_by_default() {
        assert!(registered().is_none());
    }
}
