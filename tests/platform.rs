//! Dispatcher integration tests against the real operating system: boundary traps and a
//! real access violation inside a protected region.
//!
//! Everything that binds the process dispatcher lives in a single test, since only one
//! runtime can be installed at a time.

use faultline::ThreadId;

#[cfg(any(
    all(target_os = "linux", target_arch = "x86_64"),
    all(windows, target_arch = "x86_64")
))]
mod dispatcher {
    use std::arch::asm;

    use faultline::{
        platform, Config, Error, ExceptionCode, Result, Runtime, ThreadId,
        ENTER_REGION_SENTINEL, EXIT_REGION_SENTINEL,
    };

    fn trap(request: u64) -> u64 {
        let result: u64;
        // SAFETY: the int3 is intercepted by the installed runtime, which only rewrites rax
        // and resumes right after the trap.
        unsafe {
            asm!("int3", inout("rax") request => result);
        }
        result
    }

    /// Enters a region through the trap, faults on a null read inside it, and reports which
    /// branch ran: 1 for the protected body, 2 for the fallback.
    fn fault_in_region() -> u64 {
        let branch: u64;
        // SAFETY: the load from address 0 faults; the installed runtime resumes right after
        // the enter trap with rax = 0 and every other register as it was at the trap.
        unsafe {
            asm!(
                "int3",
                "test rax, rax",
                "jz 2f",
                "mov rcx, qword ptr [0]",
                "mov rax, {exit}",
                "int3",
                "mov {branch}, 1",
                "jmp 3f",
                "2:",
                "mov {branch}, 2",
                "3:",
                exit = in(reg) EXIT_REGION_SENTINEL,
                branch = out(reg) branch,
                inout("rax") ENTER_REGION_SENTINEL => _,
                out("rcx") _,
            );
        }
        branch
    }

    fn trap_round_trip(runtime: &Runtime) {
        let thread = ThreadId::current();
        assert_eq!(trap(ENTER_REGION_SENTINEL), 1);
        assert_eq!(runtime.entries().depth(thread), 1);
        assert_eq!(trap(ENTER_REGION_SENTINEL), 1);
        assert_eq!(trap(ENTER_REGION_SENTINEL), 0);
        assert_eq!(runtime.entries().depth(thread), 2);

        assert_eq!(trap(EXIT_REGION_SENTINEL), 1);
        assert_eq!(trap(EXIT_REGION_SENTINEL), 1);
        assert_eq!(trap(EXIT_REGION_SENTINEL), 0);
        assert_eq!(runtime.entries().depth(thread), 0);
    }

    fn hardware_fault_recovers(runtime: &Runtime) {
        let thread = ThreadId::current();
        assert_eq!(fault_in_region(), 2);
        assert_eq!(runtime.entries().depth(thread), 0);

        assert_eq!(
            runtime.records().code(thread),
            Some(ExceptionCode::ACCESS_VIOLATION)
        );
        let record = runtime.records().exception_record(thread).unwrap();
        assert_eq!(record.fault_address(), Some(0));

        // The thread keeps working normally afterwards.
        trap_round_trip(runtime);
    }

    #[test]
    fn test_dispatcher_round_trips() -> Result<()> {
        let runtime: &'static Runtime = Box::leak(Box::new(Runtime::new(
            Config::diagnostic().with_capacity(2),
        )));
        runtime.initialize()?;

        let registration = platform::install(runtime)?;
        assert!(matches!(
            platform::install(runtime),
            Err(Error::AlreadyInstalled)
        ));

        trap_round_trip(runtime);
        hardware_fault_recovers(runtime);

        registration.uninstall()?;

        let again = platform::install(runtime)?;
        drop(again);
        assert!(runtime.shutdown());
        Ok(())
    }
}

#[cfg(not(any(
    all(target_os = "linux", target_arch = "x86_64"),
    all(windows, target_arch = "x86_64")
)))]
#[test]
fn test_install_unsupported() {
    use faultline::{platform, Config, Error, Runtime};

    let runtime: &'static Runtime = Box::leak(Box::new(Runtime::new(Config::default())));
    assert!(matches!(
        platform::install(runtime),
        Err(Error::Unsupported)
    ));
}

#[test]
fn test_thread_ids_differ_between_threads() {
    let main = ThreadId::current();
    let spawned = std::thread::spawn(ThreadId::current).join().unwrap();
    assert_ne!(main, spawned);
}
