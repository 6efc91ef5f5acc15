//! Windows x86-64 dispatcher: a first-chance vectored exception handler.
//!
//! Vectored handlers run before any frame-based handler, which matters here: code without
//! registered unwind information has no frame-based handler the system could find.

use std::{
    ffi::c_void,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use windows_sys::Win32::System::Diagnostics::Debug::{
    AddVectoredExceptionHandler, RemoveVectoredExceptionHandler, RtlCaptureContext, CONTEXT,
    EXCEPTION_POINTERS, EXCEPTION_RECORD,
};

use crate::{
    CpuContext, Disposition, Error::Install, ExceptionCode, ExceptionFlags, ExceptionRecord,
    Result, ThreadId, X64Context,
};

pub(super) const NAME: &str = "vectored exception handler";

/// Handle returned by `AddVectoredExceptionHandler`.
static HANDLE: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

pub(super) fn register() -> Result<()> {
    // SAFETY: `handle_exception` has the signature the dispatcher expects.
    let handle = unsafe { AddVectoredExceptionHandler(1, Some(handle_exception)) };
    if handle.is_null() {
        return Err(Install("AddVectoredExceptionHandler failed".to_string()));
    }

    HANDLE.store(handle, Ordering::Release);
    Ok(())
}

pub(super) fn unregister() -> Result<()> {
    let handle = HANDLE.swap(ptr::null_mut(), Ordering::AcqRel);
    if handle.is_null() {
        return Ok(());
    }

    // SAFETY: `handle` came from AddVectoredExceptionHandler and is removed once.
    if unsafe { RemoveVectoredExceptionHandler(handle) } == 0 {
        return Err(Install("RemoveVectoredExceptionHandler failed".to_string()));
    }
    Ok(())
}

unsafe extern "system" fn handle_exception(pointers: *mut EXCEPTION_POINTERS) -> i32 {
    let Some(runtime) = super::registered() else {
        return Disposition::ContinueSearch as i32;
    };

    // SAFETY: the dispatcher passes valid exception and context records.
    let (raw_record, raw_context) = unsafe {
        let pointers = &*pointers;
        (&*pointers.ExceptionRecord, &mut *pointers.ContextRecord)
    };

    let mut live = CpuContext::X64(read_context(raw_context));
    let record = exception_record(raw_record);

    let disposition = runtime.handle_exception(ThreadId::current(), &mut live, &record);
    match (disposition, live) {
        (Disposition::ContinueExecution, CpuContext::X64(registers)) => {
            write_context(&registers, raw_context);
            Disposition::ContinueExecution as i32
        }
        _ => Disposition::ContinueSearch as i32,
    }
}

/// Captures the register state of the calling thread.
///
/// The captured instruction pointer lies inside this function. Pair it with an
/// [`EntryFrame`](crate::EntryFrame) describing the caller's return point before pushing it
/// as a region entry.
#[must_use]
pub fn capture_context() -> CpuContext {
    // SAFETY: CONTEXT is plain data and RtlCaptureContext fills the integer state.
    let context = unsafe {
        let mut context: CONTEXT = std::mem::zeroed();
        RtlCaptureContext(&mut context);
        context
    };
    CpuContext::X64(read_context(&context))
}

#[allow(clippy::cast_sign_loss)]
fn exception_record(raw: &EXCEPTION_RECORD) -> ExceptionRecord {
    let count = (raw.NumberParameters as usize).min(raw.ExceptionInformation.len());
    let mut record = ExceptionRecord::new(
        ExceptionCode(raw.ExceptionCode as u32),
        raw.ExceptionAddress as u64,
    )
    .with_flags(ExceptionFlags::from_bits_retain(raw.ExceptionFlags));

    for (index, &value) in raw.ExceptionInformation[..count].iter().enumerate() {
        record.parameters[index] = value as u64;
    }
    #[allow(clippy::cast_possible_truncation)]
    let count = count as u32;
    record.parameter_count = count;
    record
}

fn read_context(context: &CONTEXT) -> X64Context {
    X64Context {
        rax: context.Rax,
        rbx: context.Rbx,
        rcx: context.Rcx,
        rdx: context.Rdx,
        rsi: context.Rsi,
        rdi: context.Rdi,
        rbp: context.Rbp,
        rsp: context.Rsp,
        r8: context.R8,
        r9: context.R9,
        r10: context.R10,
        r11: context.R11,
        r12: context.R12,
        r13: context.R13,
        r14: context.R14,
        r15: context.R15,
        rip: context.Rip,
        rflags: u64::from(context.EFlags),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn write_context(registers: &X64Context, context: &mut CONTEXT) {
    context.Rax = registers.rax;
    context.Rbx = registers.rbx;
    context.Rcx = registers.rcx;
    context.Rdx = registers.rdx;
    context.Rsi = registers.rsi;
    context.Rdi = registers.rdi;
    context.Rbp = registers.rbp;
    context.Rsp = registers.rsp;
    context.R8 = registers.r8;
    context.R9 = registers.r9;
    context.R10 = registers.r10;
    context.R11 = registers.r11;
    context.R12 = registers.r12;
    context.R13 = registers.r13;
    context.R14 = registers.r14;
    context.R15 = registers.r15;
    context.Rip = registers.rip;
    context.EFlags = registers.rflags as u32;
}
