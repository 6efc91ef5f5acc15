//! Register set of an AArch64 thread.

/// Resumable state of an AArch64 thread.
///
/// `x` holds the general purpose registers `x0` through `x28`; the frame pointer (`x29`)
/// and link register (`x30`) are kept as named fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Arm64Context {
    /// General purpose registers `x0`..`x28`; `x0` holds return values and the request sentinel
    pub x: [u64; 29],
    /// Frame pointer (`x29`)
    pub fp: u64,
    /// Link register (`x30`)
    pub lr: u64,
    /// Stack pointer
    pub sp: u64,
    /// Program counter
    pub pc: u64,
    /// Saved processor state
    pub cpsr: u32,
}

impl Arm64Context {
    /// Length in bytes of the `brk` instruction used as region boundary trap.
    pub const TRAP_LENGTH: u64 = 4;
}
