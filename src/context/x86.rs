//! Register set of a 32-bit x86 thread.

/// Resumable state of a 32-bit x86 thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct X86Context {
    /// Accumulator; low half of return values and of the request sentinel
    pub eax: u32,
    /// Callee-saved general purpose register
    pub ebx: u32,
    /// General purpose register
    pub ecx: u32,
    /// Data register; high half of 64-bit return values and of the request sentinel
    pub edx: u32,
    /// Callee-saved general purpose register
    pub esi: u32,
    /// Callee-saved general purpose register
    pub edi: u32,
    /// Frame pointer
    pub ebp: u32,
    /// Stack pointer
    pub esp: u32,
    /// Instruction pointer
    pub eip: u32,
    /// Flags register
    pub eflags: u32,
}

impl X86Context {
    /// Length in bytes of the `int3` instruction used as region boundary trap.
    pub const TRAP_LENGTH: u64 = 1;

    /// The 64-bit value held in the `edx:eax` register pair.
    #[must_use]
    pub fn edx_eax(&self) -> u64 {
        (u64::from(self.edx) << 32) | u64::from(self.eax)
    }
}
