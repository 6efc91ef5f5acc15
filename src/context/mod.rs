//! CPU context snapshots.
//!
//! This module provides [`CpuContext`], the architecture-tagged register snapshot the
//! engine saves at region entry and writes back into a faulting thread. It replaces an
//! opaque register blob with a value type that exposes exactly the accessors the region
//! protocol needs:
//!
//! - instruction pointer (to resume after the entry call site, or after a boundary trap)
//! - stack pointer and frame pointer (to rebase a snapshot taken inside the entry helper)
//! - return-value register (forced to zero to route control into the fallback branch)
//! - request register (carries the region boundary sentinels, see [`crate::Request`])
//!
//! All register sets are plain `Copy` data; copying a snapshot into or out of a pool slot
//! never allocates.
//!
//! # Supported Architectures
//!
//! | Variant | Return register | Request register | Trap instruction |
//! |---------|-----------------|------------------|------------------|
//! | [`CpuContext::X86`] | `eax` | `edx:eax` | `int3` (1 byte) |
//! | [`CpuContext::X64`] | `rax` | `rax` | `int3` (1 byte) |
//! | [`CpuContext::Arm64`] | `x0` | `x0` | `brk` (4 bytes) |
//!
//! # Example
//!
//! ```rust
//! use faultline::{CpuContext, X64Context};
//!
//! let mut context = CpuContext::X64(X64Context {
//!     rip: 0x1400_1000,
//!     rsp: 0x7ff0,
//!     rax: 1,
//!     ..Default::default()
//! });
//!
//! context.set_return_value(0);
//! assert_eq!(context.return_value(), 0);
//! assert_eq!(context.instruction_pointer(), 0x1400_1000);
//! ```

mod arm64;
mod x64;
mod x86;

pub use arm64::Arm64Context;
pub use x64::X64Context;
pub use x86::X86Context;

use strum::{Display, EnumCount, EnumIter};

/// Processor architectures a [`CpuContext`] can describe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
pub enum Architecture {
    /// 32-bit x86
    #[strum(serialize = "x86")]
    X86,
    /// x86-64
    #[strum(serialize = "x86_64")]
    X64,
    /// AArch64
    #[strum(serialize = "aarch64")]
    Arm64,
}

impl Architecture {
    /// The architecture this crate was compiled for, if it is one of the supported ones.
    #[must_use]
    pub const fn native() -> Option<Architecture> {
        if cfg!(target_arch = "x86_64") {
            Some(Architecture::X64)
        } else if cfg!(target_arch = "x86") {
            Some(Architecture::X86)
        } else if cfg!(target_arch = "aarch64") {
            Some(Architecture::Arm64)
        } else {
            None
        }
    }

    /// Length in bytes of the trap instruction that signals region boundaries.
    ///
    /// The interceptor advances the instruction pointer by this amount after handling a
    /// boundary trap, so the thread resumes on the instruction following the trap.
    #[must_use]
    pub const fn trap_length(self) -> u64 {
        match self {
            Architecture::X86 => X86Context::TRAP_LENGTH,
            Architecture::X64 => X64Context::TRAP_LENGTH,
            Architecture::Arm64 => Arm64Context::TRAP_LENGTH,
        }
    }
}

/// A resumable CPU register snapshot of one thread.
///
/// Snapshots are produced by a context capture routine at region entry (or by the platform
/// dispatcher when a fault occurs), stored by value in the entry pool, and written back
/// over the live context of a faulting thread by
/// [`Runtime::handle_exception`](crate::Runtime::handle_exception).
///
/// The default value is an all-zero x86-64 context, which is also the state of an unused
/// pool slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuContext {
    /// 32-bit x86 register set
    X86(X86Context),
    /// x86-64 register set
    X64(X64Context),
    /// AArch64 register set
    Arm64(Arm64Context),
}

impl Default for CpuContext {
    fn default() -> Self {
        CpuContext::X64(X64Context::default())
    }
}

impl CpuContext {
    /// Creates an all-zero context for the given architecture.
    #[must_use]
    pub fn zeroed(architecture: Architecture) -> Self {
        match architecture {
            Architecture::X86 => CpuContext::X86(X86Context::default()),
            Architecture::X64 => CpuContext::X64(X64Context::default()),
            Architecture::Arm64 => CpuContext::Arm64(Arm64Context::default()),
        }
    }

    /// The architecture this snapshot belongs to.
    #[must_use]
    pub fn architecture(&self) -> Architecture {
        match self {
            CpuContext::X86(_) => Architecture::X86,
            CpuContext::X64(_) => Architecture::X64,
            CpuContext::Arm64(_) => Architecture::Arm64,
        }
    }

    /// Address of the next instruction the thread executes when resumed.
    #[must_use]
    pub fn instruction_pointer(&self) -> u64 {
        match self {
            CpuContext::X86(context) => u64::from(context.eip),
            CpuContext::X64(context) => context.rip,
            CpuContext::Arm64(context) => context.pc,
        }
    }

    /// Sets the address the thread resumes at.
    ///
    /// On x86 the value is truncated to 32 bits.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_instruction_pointer(&mut self, value: u64) {
        match self {
            CpuContext::X86(context) => context.eip = value as u32,
            CpuContext::X64(context) => context.rip = value,
            CpuContext::Arm64(context) => context.pc = value,
        }
    }

    /// Current stack pointer.
    #[must_use]
    pub fn stack_pointer(&self) -> u64 {
        match self {
            CpuContext::X86(context) => u64::from(context.esp),
            CpuContext::X64(context) => context.rsp,
            CpuContext::Arm64(context) => context.sp,
        }
    }

    /// Sets the stack pointer.
    ///
    /// On x86 the value is truncated to 32 bits.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_stack_pointer(&mut self, value: u64) {
        match self {
            CpuContext::X86(context) => context.esp = value as u32,
            CpuContext::X64(context) => context.rsp = value,
            CpuContext::Arm64(context) => context.sp = value,
        }
    }

    /// Current frame pointer (`ebp`, `rbp` or `x29`).
    #[must_use]
    pub fn frame_pointer(&self) -> u64 {
        match self {
            CpuContext::X86(context) => u64::from(context.ebp),
            CpuContext::X64(context) => context.rbp,
            CpuContext::Arm64(context) => context.fp,
        }
    }

    /// Value of the function return register (`eax`, `rax` or `x0`).
    #[must_use]
    pub fn return_value(&self) -> u64 {
        match self {
            CpuContext::X86(context) => u64::from(context.eax),
            CpuContext::X64(context) => context.rax,
            CpuContext::Arm64(context) => context.x[0],
        }
    }

    /// Sets the function return register.
    ///
    /// On x86 only `eax` is written and the value is truncated to 32 bits.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_return_value(&mut self, value: u64) {
        match self {
            CpuContext::X86(context) => context.eax = value as u32,
            CpuContext::X64(context) => context.rax = value,
            CpuContext::Arm64(context) => context.x[0] = value,
        }
    }

    /// The 64-bit value a boundary trap uses to request a region transition.
    ///
    /// This is the return register on 64-bit architectures and the `edx:eax` pair on x86, so
    /// both sentinels fit unchanged on every architecture.
    #[must_use]
    pub fn request_value(&self) -> u64 {
        match self {
            CpuContext::X86(context) => context.edx_eax(),
            CpuContext::X64(context) => context.rax,
            CpuContext::Arm64(context) => context.x[0],
        }
    }

    /// Advances the instruction pointer past the boundary trap located at `trap_address`.
    pub fn skip_trap(&mut self, trap_address: u64) {
        let next = trap_address.wrapping_add(self.architecture().trap_length());
        self.set_instruction_pointer(next);
    }
}

impl From<X86Context> for CpuContext {
    fn from(context: X86Context) -> Self {
        CpuContext::X86(context)
    }
}

impl From<X64Context> for CpuContext {
    fn from(context: X64Context) -> Self {
        CpuContext::X64(context)
    }
}

impl From<Arm64Context> for CpuContext {
    fn from(context: Arm64Context) -> Self {
        CpuContext::Arm64(context)
    }
}
