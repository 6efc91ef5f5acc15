//! Decoding of boundary traps.
//!
//! Code that cannot call into the runtime directly (position-independent payloads, code
//! emitted at run time) can still open and close protected regions by executing a breakpoint
//! instruction with a reserved value in the request register. The dispatcher delivers the
//! trap like any other exception; [`Request::decode`] turns it back into the transition it
//! asks for.
//!
//! | Architecture | Trap | Request register |
//! |--------------|------|------------------|
//! | x86 | `int3` | `edx:eax` |
//! | x86-64 | `int3` | `rax` |
//! | AArch64 | `brk #0` | `x0` |

use strum::{Display, EnumIter};

use crate::{CpuContext, ExceptionRecord};

/// Request register value asking the runtime to open a protected region.
pub const ENTER_REGION_SENTINEL: u64 = 0xDEAD_BEEF_0000_05E1;

/// Request register value asking the runtime to close the innermost protected region.
pub const EXIT_REGION_SENTINEL: u64 = 0xDEAD_BEEF_0000_05E2;

/// The state transition an exception asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Request {
    /// Push the trapping context as a new innermost region
    EnterRegion,
    /// Pop the innermost region
    ExitRegion,
    /// An ordinary fault; redirect to the innermost region's fallback, if any
    Fault,
}

impl Request {
    /// Classifies an exception.
    ///
    /// Only breakpoints can carry a request; any other exception is a [`Request::Fault`]
    /// whatever its registers hold.
    ///
    /// # Arguments
    ///
    /// * `context` - Register state at the exception
    /// * `record` - The exception
    #[must_use]
    pub fn decode(context: &CpuContext, record: &ExceptionRecord) -> Request {
        if !record.code.is_breakpoint() {
            return Request::Fault;
        }

        match context.request_value() {
            ENTER_REGION_SENTINEL => Request::EnterRegion,
            EXIT_REGION_SENTINEL => Request::ExitRegion,
            _ => Request::Fault,
        }
    }

    /// The request register value that encodes this request, if it has one.
    #[must_use]
    pub const fn sentinel(self) -> Option<u64> {
        match self {
            Request::EnterRegion => Some(ENTER_REGION_SENTINEL),
            Request::ExitRegion => Some(EXIT_REGION_SENTINEL),
            Request::Fault => None,
        }
    }
}
