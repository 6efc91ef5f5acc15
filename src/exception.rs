//! Exception records and dispatch dispositions.
//!
//! A platform dispatcher describes every fault it forwards to
//! [`Runtime::handle_exception`](crate::Runtime::handle_exception) with an [`ExceptionRecord`],
//! and learns what to do next from the returned [`Disposition`].
//!
//! Exception codes use the NTSTATUS vocabulary on every platform; the unix dispatcher maps
//! signals onto the closest code (SIGSEGV to [`ExceptionCode::ACCESS_VIOLATION`], SIGTRAP to
//! [`ExceptionCode::BREAKPOINT`], and so on). The engine itself only ever distinguishes
//! breakpoints from everything else.

use std::fmt;

use bitflags::bitflags;
use strum::{Display, EnumIter};

/// Maximum number of parameters an [`ExceptionRecord`] carries.
pub const EXCEPTION_MAXIMUM_PARAMETERS: usize = 15;

/// Numeric exception code in NTSTATUS form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExceptionCode(pub u32);

impl ExceptionCode {
    /// Read, write or execute access to an invalid address
    pub const ACCESS_VIOLATION: ExceptionCode = ExceptionCode(0xC000_0005);
    /// Page could not be brought into memory
    pub const IN_PAGE_ERROR: ExceptionCode = ExceptionCode(0xC000_0006);
    /// Misaligned data access
    pub const DATATYPE_MISALIGNMENT: ExceptionCode = ExceptionCode(0x8000_0002);
    /// Breakpoint instruction (`int3`, `brk`)
    pub const BREAKPOINT: ExceptionCode = ExceptionCode(0x8000_0003);
    /// Trace trap after a single instruction
    pub const SINGLE_STEP: ExceptionCode = ExceptionCode(0x8000_0004);
    /// Array bounds check failed
    pub const ARRAY_BOUNDS_EXCEEDED: ExceptionCode = ExceptionCode(0xC000_008C);
    /// Floating point division by zero
    pub const FLOAT_DIVIDE_BY_ZERO: ExceptionCode = ExceptionCode(0xC000_008E);
    /// Integer division by zero
    pub const INTEGER_DIVIDE_BY_ZERO: ExceptionCode = ExceptionCode(0xC000_0094);
    /// Integer overflow
    pub const INTEGER_OVERFLOW: ExceptionCode = ExceptionCode(0xC000_0095);
    /// Privileged instruction executed in user mode
    pub const PRIVILEGED_INSTRUCTION: ExceptionCode = ExceptionCode(0xC000_0096);
    /// Undefined instruction
    pub const ILLEGAL_INSTRUCTION: ExceptionCode = ExceptionCode(0xC000_001D);
    /// Stack guard page was hit
    pub const STACK_OVERFLOW: ExceptionCode = ExceptionCode(0xC000_00FD);

    /// Raw NTSTATUS value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Whether this code denotes a deliberate breakpoint trap.
    #[must_use]
    pub const fn is_breakpoint(self) -> bool {
        self.0 == Self::BREAKPOINT.0
    }

    /// Symbolic name of well-known codes.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::ACCESS_VIOLATION => "ACCESS_VIOLATION",
            Self::IN_PAGE_ERROR => "IN_PAGE_ERROR",
            Self::DATATYPE_MISALIGNMENT => "DATATYPE_MISALIGNMENT",
            Self::BREAKPOINT => "BREAKPOINT",
            Self::SINGLE_STEP => "SINGLE_STEP",
            Self::ARRAY_BOUNDS_EXCEEDED => "ARRAY_BOUNDS_EXCEEDED",
            Self::FLOAT_DIVIDE_BY_ZERO => "FLOAT_DIVIDE_BY_ZERO",
            Self::INTEGER_DIVIDE_BY_ZERO => "INTEGER_DIVIDE_BY_ZERO",
            Self::INTEGER_OVERFLOW => "INTEGER_OVERFLOW",
            Self::PRIVILEGED_INSTRUCTION => "PRIVILEGED_INSTRUCTION",
            Self::ILLEGAL_INSTRUCTION => "ILLEGAL_INSTRUCTION",
            Self::STACK_OVERFLOW => "STACK_OVERFLOW",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({:#010x})", self.0),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    /// Exception record flags
    pub struct ExceptionFlags: u32 {
        /// Execution cannot be resumed after this exception
        const NONCONTINUABLE = 0x0001;
        /// The record describes an unwind in progress
        const UNWINDING = 0x0002;
        /// The record describes an exit unwind
        const EXIT_UNWIND = 0x0004;
        /// The stack was found outside its limits during dispatch
        const STACK_INVALID = 0x0008;
        /// The exception was raised while another one was being dispatched
        const NESTED_CALL = 0x0010;
        /// Unwind targets a specific frame
        const TARGET_UNWIND = 0x0020;
        /// Collided with an active unwind
        const COLLIDED_UNWIND = 0x0040;
    }
}

/// Kind of memory access that caused an access violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(u64)]
pub enum AccessKind {
    /// Data read
    Read = 0,
    /// Data write
    Write = 1,
    /// Instruction fetch from non-executable memory
    Execute = 8,
}

/// Platform-neutral description of one exception.
///
/// `address` is the address of the instruction that faulted or trapped. For a boundary trap
/// this is the address of the trap instruction itself, independent of whether the platform
/// reports the instruction pointer before or after it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExceptionRecord {
    /// Exception code
    pub code: ExceptionCode,
    /// Exception flags
    pub flags: ExceptionFlags,
    /// Address of the faulting instruction
    pub address: u64,
    /// Number of valid entries in `parameters`
    pub parameter_count: u32,
    /// Code-specific parameters; for access violations `[access kind, target address]`
    pub parameters: [u64; EXCEPTION_MAXIMUM_PARAMETERS],
}

impl ExceptionRecord {
    /// Creates a record without parameters.
    ///
    /// # Arguments
    ///
    /// * `code` - The exception code
    /// * `address` - Address of the faulting instruction
    #[must_use]
    pub fn new(code: ExceptionCode, address: u64) -> Self {
        ExceptionRecord {
            code,
            address,
            ..Default::default()
        }
    }

    /// Creates an access violation record.
    ///
    /// # Arguments
    ///
    /// * `address` - Address of the faulting instruction
    /// * `kind` - The kind of access that faulted
    /// * `target` - The inaccessible data address
    #[must_use]
    pub fn access_violation(address: u64, kind: AccessKind, target: u64) -> Self {
        ExceptionRecord::new(ExceptionCode::ACCESS_VIOLATION, address)
            .with_parameters(&[kind as u64, target])
    }

    /// Creates a breakpoint record for the trap instruction at `address`.
    #[must_use]
    pub fn breakpoint(address: u64) -> Self {
        ExceptionRecord::new(ExceptionCode::BREAKPOINT, address)
    }

    /// Replaces the parameters, keeping at most [`EXCEPTION_MAXIMUM_PARAMETERS`] values.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_parameters(mut self, parameters: &[u64]) -> Self {
        let count = parameters.len().min(EXCEPTION_MAXIMUM_PARAMETERS);
        self.parameters = [0; EXCEPTION_MAXIMUM_PARAMETERS];
        self.parameters[..count].copy_from_slice(&parameters[..count]);
        self.parameter_count = count as u32;
        self
    }

    /// Replaces the flags.
    #[must_use]
    pub fn with_flags(mut self, flags: ExceptionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// The valid parameters.
    #[must_use]
    pub fn parameters(&self) -> &[u64] {
        let count = (self.parameter_count as usize).min(EXCEPTION_MAXIMUM_PARAMETERS);
        &self.parameters[..count]
    }

    /// The inaccessible data address of an access violation.
    #[must_use]
    pub fn fault_address(&self) -> Option<u64> {
        if self.code == ExceptionCode::ACCESS_VIOLATION || self.code == ExceptionCode::IN_PAGE_ERROR
        {
            self.parameters().get(1).copied()
        } else {
            None
        }
    }
}

/// What the platform dispatcher should do after the interceptor ran.
///
/// The discriminants match the return values of a Windows vectored exception handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(i32)]
pub enum Disposition {
    /// The exception was handled; resume the thread with the (possibly rewritten) context.
    ContinueExecution = -1,
    /// The exception is not ours; continue the normal search and termination path.
    ContinueSearch = 0,
}

impl Disposition {
    /// `true` for [`Disposition::ContinueExecution`].
    #[must_use]
    pub const fn is_handled(self) -> bool {
        matches!(self, Disposition::ContinueExecution)
    }
}

impl From<bool> for Disposition {
    fn from(handled: bool) -> Self {
        if handled {
            Disposition::ContinueExecution
        } else {
            Disposition::ContinueSearch
        }
    }
}
