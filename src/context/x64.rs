//! Register set of an x86-64 thread.

/// Resumable state of an x86-64 thread.
///
/// Field names follow the architectural register names. The layout is plain data so the
/// whole set can be copied in and out of pool slots without touching the heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct X64Context {
    /// Accumulator; holds function return values and the region request sentinel
    pub rax: u64,
    /// Callee-saved general purpose register
    pub rbx: u64,
    /// General purpose register
    pub rcx: u64,
    /// General purpose register
    pub rdx: u64,
    /// General purpose register
    pub rsi: u64,
    /// General purpose register
    pub rdi: u64,
    /// Frame pointer
    pub rbp: u64,
    /// Stack pointer
    pub rsp: u64,
    /// General purpose register
    pub r8: u64,
    /// General purpose register
    pub r9: u64,
    /// General purpose register
    pub r10: u64,
    /// General purpose register
    pub r11: u64,
    /// Callee-saved general purpose register
    pub r12: u64,
    /// Callee-saved general purpose register
    pub r13: u64,
    /// Callee-saved general purpose register
    pub r14: u64,
    /// Callee-saved general purpose register
    pub r15: u64,
    /// Instruction pointer
    pub rip: u64,
    /// Flags register
    pub rflags: u64,
}

impl X64Context {
    /// Length in bytes of the `int3` instruction used as region boundary trap.
    pub const TRAP_LENGTH: u64 = 1;
}
