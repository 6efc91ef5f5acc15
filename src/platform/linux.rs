//! Linux x86-64 dispatcher: POSIX signal handlers.
//!
//! Synchronous fault signals are translated into an [`ExceptionRecord`] and the signal
//! context into an [`X64Context`]. When the runtime handles the exception, the rewritten
//! registers are stored back into the signal context and the handler returns, which resumes
//! the thread with them. Declined signals go to whatever disposition was installed before.
//!
//! A declined signal whose previous disposition is the default action ends the process, so
//! the routing never silently disappears from a running process. A declined SIGTRAP that
//! was ignored before is ignored again, and the handler stays installed.

use std::{cell::UnsafeCell, io, mem, mem::MaybeUninit, ptr};

use libc::{c_int, c_void, mcontext_t, siginfo_t, ucontext_t};

use crate::{
    AccessKind, CpuContext, Error::Install, ExceptionCode, ExceptionRecord, Result, ThreadId,
    X64Context,
};

pub(super) const NAME: &str = "sigaction";

/// Signals routed to the runtime.
const SIGNALS: [c_int; 5] = [
    libc::SIGSEGV,
    libc::SIGBUS,
    libc::SIGILL,
    libc::SIGFPE,
    libc::SIGTRAP,
];

// si_code values, <asm-generic/siginfo.h>
const BUS_ADRALN: c_int = 1;
const FPE_INTDIV: c_int = 1;
const FPE_INTOVF: c_int = 2;
const FPE_FLTDIV: c_int = 3;
const TRAP_TRACE: c_int = 2;

// x86 page fault error code bits
const PF_WRITE: i64 = 1 << 1;
const PF_INSTRUCTION: i64 = 1 << 4;

/// Length of `int3`; SIGTRAP reports the instruction pointer after it.
const INT3_LENGTH: u64 = 1;

/// Dispositions that were in place before [`register`].
struct Previous(UnsafeCell<MaybeUninit<[libc::sigaction; SIGNALS.len()]>>);

// SAFETY: written only by `register`, which runs once per registration before any signal is
// routed here, and read afterwards.
unsafe impl Sync for Previous {}

static PREVIOUS: Previous = Previous(UnsafeCell::new(MaybeUninit::uninit()));

fn slot(signal: c_int) -> Option<usize> {
    SIGNALS.iter().position(|&candidate| candidate == signal)
}

/// Installs the handler for every routed signal.
pub(super) fn register() -> Result<()> {
    let previous = PREVIOUS.0.get().cast::<libc::sigaction>();

    for (index, &signal) in SIGNALS.iter().enumerate() {
        // SAFETY: `action` is fully initialized and `previous` has room for every signal.
        let status = unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_flags = libc::SA_SIGINFO | libc::SA_NODEFER | libc::SA_ONSTACK;
            action.sa_sigaction = handle_signal as usize;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signal, &action, previous.add(index))
        };

        if status != 0 {
            let error = io::Error::last_os_error();
            restore(index);
            return Err(Install(format!("sigaction({signal}) failed: {error}")));
        }
    }

    Ok(())
}

/// Restores every previous disposition.
pub(super) fn unregister() -> Result<()> {
    if restore(SIGNALS.len()) {
        Ok(())
    } else {
        Err(Install(format!(
            "sigaction restore failed: {}",
            io::Error::last_os_error()
        )))
    }
}

/// Restores the previous disposition of the first `count` signals.
fn restore(count: usize) -> bool {
    let previous = PREVIOUS.0.get().cast::<libc::sigaction>();
    let mut restored = true;

    for (index, &signal) in SIGNALS.iter().enumerate().take(count) {
        // SAFETY: the first `count` entries were filled by a successful `register` step.
        restored &= unsafe { libc::sigaction(signal, previous.add(index), ptr::null_mut()) } == 0;
    }
    restored
}

unsafe extern "C" fn handle_signal(signal: c_int, info: *mut siginfo_t, context: *mut c_void) {
    // SAFETY: with SA_SIGINFO the kernel passes a valid siginfo and ucontext.
    let handled = unsafe {
        let ucontext = &mut *context.cast::<ucontext_t>();
        dispatch(signal, &*info, &mut ucontext.uc_mcontext)
    };

    if !handled {
        // SAFETY: forwarding the arguments the kernel gave us.
        unsafe { forward(signal, info, context) };
    }
}

/// Offers the signal to the registered runtime, rewriting `mcontext` if it was handled.
fn dispatch(signal: c_int, info: &siginfo_t, mcontext: &mut mcontext_t) -> bool {
    let Some(runtime) = super::registered() else {
        return false;
    };

    let mut live = CpuContext::X64(read_context(mcontext));
    let record = exception_record(signal, info, mcontext);

    if !runtime
        .handle_exception(ThreadId::current(), &mut live, &record)
        .is_handled()
    {
        return false;
    }

    match live {
        CpuContext::X64(registers) => {
            write_context(&registers, mcontext);
            true
        }
        _ => false,
    }
}

/// Hands a declined signal to the disposition that was installed before ours.
unsafe fn forward(signal: c_int, info: *mut siginfo_t, context: *mut c_void) {
    let Some(index) = slot(signal) else {
        return;
    };
    // SAFETY: `register` filled this entry before the handler could run.
    let previous = unsafe { &*PREVIOUS.0.get().cast::<libc::sigaction>().add(index) };

    if previous.sa_flags & libc::SA_SIGINFO != 0 {
        // SAFETY: SA_SIGINFO handlers have this signature.
        unsafe {
            mem::transmute::<usize, extern "C" fn(c_int, *mut siginfo_t, *mut c_void)>(
                previous.sa_sigaction,
            )(signal, info, context);
        }
    } else if previous.sa_sigaction == libc::SIG_IGN {
        // An ignored trap resumes after the int3 with our handler still in place. The kernel
        // never lets a synchronous fault be ignored, so those get the default action.
        if signal != libc::SIGTRAP {
            reset_to_default(signal);
        }
    } else if previous.sa_sigaction == libc::SIG_DFL {
        // Faulting instructions re-execute and now take the default path. A trap does not,
        // so it is raised again. Either way the default action ends the process.
        reset_to_default(signal);
        if signal == libc::SIGTRAP {
            // SAFETY: raising a signal on the current thread has no preconditions.
            unsafe { libc::raise(signal) };
        }
    } else {
        // SAFETY: plain handlers have this signature.
        unsafe {
            mem::transmute::<usize, extern "C" fn(c_int)>(previous.sa_sigaction)(signal);
        }
    }
}

/// Puts `signal` back to its default disposition.
fn reset_to_default(signal: c_int) {
    // SAFETY: a zeroed sigaction with SIG_DFL is a valid disposition.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = libc::SIG_DFL;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signal, &action, ptr::null_mut());
    }
}

/// Builds the exception record for a signal.
fn exception_record(signal: c_int, info: &siginfo_t, mcontext: &mcontext_t) -> ExceptionRecord {
    let rip = greg(mcontext, libc::REG_RIP);
    let code = exception_code(signal, info.si_code);

    match signal {
        libc::SIGTRAP => ExceptionRecord::new(code, rip.wrapping_sub(INT3_LENGTH)),
        libc::SIGSEGV | libc::SIGBUS => {
            // SAFETY: si_addr is valid for SIGSEGV and SIGBUS.
            let target = unsafe { info.si_addr() } as u64;
            let kind = access_kind(mcontext.gregs[libc::REG_ERR as usize]);
            ExceptionRecord::new(code, rip).with_parameters(&[kind as u64, target])
        }
        _ => ExceptionRecord::new(code, rip),
    }
}

/// Closest exception code for a signal and its `si_code`.
fn exception_code(signal: c_int, si_code: c_int) -> ExceptionCode {
    match (signal, si_code) {
        (libc::SIGSEGV, _) => ExceptionCode::ACCESS_VIOLATION,
        (libc::SIGBUS, BUS_ADRALN) => ExceptionCode::DATATYPE_MISALIGNMENT,
        (libc::SIGBUS, _) => ExceptionCode::IN_PAGE_ERROR,
        (libc::SIGILL, _) => ExceptionCode::ILLEGAL_INSTRUCTION,
        (libc::SIGFPE, FPE_INTDIV) => ExceptionCode::INTEGER_DIVIDE_BY_ZERO,
        (libc::SIGFPE, FPE_INTOVF) => ExceptionCode::INTEGER_OVERFLOW,
        (libc::SIGFPE, FPE_FLTDIV) => ExceptionCode::FLOAT_DIVIDE_BY_ZERO,
        (libc::SIGFPE, _) => ExceptionCode::INTEGER_DIVIDE_BY_ZERO,
        (libc::SIGTRAP, TRAP_TRACE) => ExceptionCode::SINGLE_STEP,
        _ => ExceptionCode::BREAKPOINT,
    }
}

fn access_kind(error_code: i64) -> AccessKind {
    if error_code & PF_INSTRUCTION != 0 {
        AccessKind::Execute
    } else if error_code & PF_WRITE != 0 {
        AccessKind::Write
    } else {
        AccessKind::Read
    }
}

#[allow(clippy::cast_sign_loss)]
fn greg(mcontext: &mcontext_t, register: c_int) -> u64 {
    mcontext.gregs[register as usize] as u64
}

#[allow(clippy::cast_possible_wrap)]
fn set_greg(mcontext: &mut mcontext_t, register: c_int, value: u64) {
    mcontext.gregs[register as usize] = value as i64;
}

/// Reads the general purpose registers of a signal context.
fn read_context(mcontext: &mcontext_t) -> X64Context {
    X64Context {
        rax: greg(mcontext, libc::REG_RAX),
        rbx: greg(mcontext, libc::REG_RBX),
        rcx: greg(mcontext, libc::REG_RCX),
        rdx: greg(mcontext, libc::REG_RDX),
        rsi: greg(mcontext, libc::REG_RSI),
        rdi: greg(mcontext, libc::REG_RDI),
        rbp: greg(mcontext, libc::REG_RBP),
        rsp: greg(mcontext, libc::REG_RSP),
        r8: greg(mcontext, libc::REG_R8),
        r9: greg(mcontext, libc::REG_R9),
        r10: greg(mcontext, libc::REG_R10),
        r11: greg(mcontext, libc::REG_R11),
        r12: greg(mcontext, libc::REG_R12),
        r13: greg(mcontext, libc::REG_R13),
        r14: greg(mcontext, libc::REG_R14),
        r15: greg(mcontext, libc::REG_R15),
        rip: greg(mcontext, libc::REG_RIP),
        rflags: greg(mcontext, libc::REG_EFL),
    }
}

/// Writes the general purpose registers back into a signal context.
///
/// Segment and floating point state are left as the kernel saved them.
fn write_context(registers: &X64Context, mcontext: &mut mcontext_t) {
    set_greg(mcontext, libc::REG_RAX, registers.rax);
    set_greg(mcontext, libc::REG_RBX, registers.rbx);
    set_greg(mcontext, libc::REG_RCX, registers.rcx);
    set_greg(mcontext, libc::REG_RDX, registers.rdx);
    set_greg(mcontext, libc::REG_RSI, registers.rsi);
    set_greg(mcontext, libc::REG_RDI, registers.rdi);
    set_greg(mcontext, libc::REG_RBP, registers.rbp);
    set_greg(mcontext, libc::REG_RSP, registers.rsp);
    set_greg(mcontext, libc::REG_R8, registers.r8);
    set_greg(mcontext, libc::REG_R9, registers.r9);
    set_greg(mcontext, libc::REG_R10, registers.r10);
    set_greg(mcontext, libc::REG_R11, registers.r11);
    set_greg(mcontext, libc::REG_R12, registers.r12);
    set_greg(mcontext, libc::REG_R13, registers.r13);
    set_greg(mcontext, libc::REG_R14, registers.r14);
    set_greg(mcontext, libc::REG_R15, registers.r15);
    set_greg(mcontext, libc::REG_RIP, registers.rip);
    set_greg(mcontext, libc::REG_EFL, registers.rflags);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed_mcontext() -> mcontext_t {
        // SAFETY: mcontext_t is plain data; the fpregs pointer stays null and unused.
        unsafe { mem::zeroed() }
    }

    #[test]
    fn test_context_conversion() {
        let mut mcontext = zeroed_mcontext();
        mcontext.gregs[libc::REG_RIP as usize] = 0x4010;
        mcontext.gregs[libc::REG_RSP as usize] = 0x7fff_0000;
        mcontext.gregs[libc::REG_R15 as usize] = -1;
        mcontext.gregs[libc::REG_CSGSFS as usize] = 0x33;

        let mut registers = read_context(&mcontext);
        assert_eq!(registers.rip, 0x4010);
        assert_eq!(registers.rsp, 0x7fff_0000);
        assert_eq!(registers.r15, u64::MAX);

        registers.rax = 0;
        registers.rip = 0x5000;
        write_context(&registers, &mut mcontext);
        assert_eq!(mcontext.gregs[libc::REG_RIP as usize], 0x5000);
        assert_eq!(mcontext.gregs[libc::REG_R15 as usize], -1);
        assert_eq!(mcontext.gregs[libc::REG_CSGSFS as usize], 0x33);
    }

    #[test]
    fn test_exception_codes() {
        assert_eq!(
            exception_code(libc::SIGSEGV, 1),
            ExceptionCode::ACCESS_VIOLATION
        );
        assert_eq!(
            exception_code(libc::SIGBUS, BUS_ADRALN),
            ExceptionCode::DATATYPE_MISALIGNMENT
        );
        assert_eq!(
            exception_code(libc::SIGFPE, FPE_INTDIV),
            ExceptionCode::INTEGER_DIVIDE_BY_ZERO
        );
        assert_eq!(exception_code(libc::SIGTRAP, 0x80), ExceptionCode::BREAKPOINT);
        assert_eq!(
            exception_code(libc::SIGTRAP, TRAP_TRACE),
            ExceptionCode::SINGLE_STEP
        );
    }

    #[test]
    fn test_access_kind_from_error_code() {
        assert_eq!(access_kind(0b00100), AccessKind::Read);
        assert_eq!(access_kind(0b00110), AccessKind::Write);
        assert_eq!(access_kind(0b10100), AccessKind::Execute);
    }

    fn installed_handler(signal: c_int) -> usize {
        // SAFETY: querying a disposition writes only into `current`.
        unsafe {
            let mut current: libc::sigaction = mem::zeroed();
            assert_eq!(libc::sigaction(signal, ptr::null(), &mut current), 0);
            current.sa_sigaction
        }
    }

    #[test]
    fn test_ignored_trap_keeps_handler_installed() {
        // SAFETY: only this test touches SIGTRAP in the unit test binary.
        unsafe {
            let mut ignore: libc::sigaction = mem::zeroed();
            ignore.sa_sigaction = libc::SIG_IGN;
            assert_eq!(libc::sigaction(libc::SIGTRAP, &ignore, ptr::null_mut()), 0);
        }

        register().unwrap();
        let handler = handle_signal as usize;
        assert_eq!(installed_handler(libc::SIGTRAP), handler);

        // No runtime is registered, so the trap is declined and forwarded to SIG_IGN.
        for _ in 0..2 {
            // SAFETY: the installed handler resumes right after the int3.
            unsafe { std::arch::asm!("int3") };
            assert_eq!(installed_handler(libc::SIGTRAP), handler);
        }

        unregister().unwrap();
        assert_eq!(installed_handler(libc::SIGTRAP), libc::SIG_IGN);
        reset_to_default(libc::SIGTRAP);
        assert_eq!(installed_handler(libc::SIGTRAP), libc::SIG_DFL);
    }

    #[test]
    fn test_routed_signals() {
        assert_eq!(slot(libc::SIGSEGV), Some(0));
        assert_eq!(slot(libc::SIGTRAP), Some(4));
        assert_eq!(slot(libc::SIGINT), None);
    }
}
