//! Scheduling behavior of the process manager.
//!
//! The kernel's state is process-wide, so every test takes the same lock
//! before touching it; the region itself is leaked per test, which is cheap
//! and keeps regions from outliving their allocator state.

#![cfg(target_arch = "x86_64")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use kernel::{memory, proc};

const REGION_SIZE: usize = 1024 * 1024;

static KERNEL: Mutex<()> = Mutex::new(());

fn kernel_guard() -> MutexGuard<'static, ()> {
    KERNEL.lock().unwrap_or_else(PoisonError::into_inner)
}

fn with_kernel(test_fn: fn()) {
    let _guard = kernel_guard();
    let region = Box::leak(vec![0u8; REGION_SIZE].into_boxed_slice());
    unsafe {
        memory::init(region.as_mut_ptr(), region.len()).expect("region fits");
    }
    proc::init();
    test_fn();
}

static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());
static PROCESS_ONE_DONE: AtomicBool = AtomicBool::new(false);
static PROCESS_TWO_DONE: AtomicBool = AtomicBool::new(false);

fn record(line: String) {
    EVENTS.lock().unwrap().push(line);
}

extern "C" fn process_one() -> i32 {
    proc::create(process_two).expect("create process 2");
    for i in (0..10).step_by(2) {
        record(format!("Process-1: {i}"));
        proc::yield_now();
        record(format!("Process-1: {}", i + 1));
        proc::yield_now();
    }
    PROCESS_ONE_DONE.store(true, Ordering::SeqCst);
    proc::delete(proc::current_pid().unwrap());
    0
}

extern "C" fn process_two() -> i32 {
    for k in (1..=10).rev() {
        record(format!("Process-2: {k}"));
        proc::yield_now();
    }
    PROCESS_TWO_DONE.store(true, Ordering::SeqCst);
    proc::delete(proc::current_pid().unwrap());
    0
}

/// The classic two-counter interleaving. Process 1 spawns process 2, which
/// runs first because a fresh process jumps the ready queue; after that the
/// bootstrap process, process 1, and process 2 rotate in a fixed cycle, so
/// the output order is fully deterministic.
#[test]
fn two_process_round_robin_interleaving() {
    with_kernel(|| {
        EVENTS.lock().unwrap().clear();
        PROCESS_ONE_DONE.store(false, Ordering::SeqCst);
        PROCESS_TWO_DONE.store(false, Ordering::SeqCst);

        proc::create(process_one).expect("create process 1");
        for _ in 0..200 {
            if PROCESS_ONE_DONE.load(Ordering::SeqCst) && PROCESS_TWO_DONE.load(Ordering::SeqCst) {
                break;
            }
            proc::yield_now();
        }
        assert!(PROCESS_ONE_DONE.load(Ordering::SeqCst));
        assert!(PROCESS_TWO_DONE.load(Ordering::SeqCst));
        // Both are gone; yielding with an empty ready queue is a no-op.
        proc::yield_now();
        assert_eq!(proc::current_pid(), Some(0));

        let mut expected = vec!["Process-2: 10".to_string()];
        for i in 0..9 {
            expected.push(format!("Process-1: {i}"));
            expected.push(format!("Process-2: {}", 9 - i));
        }
        expected.push("Process-1: 9".to_string());
        assert_eq!(*EVENTS.lock().unwrap(), expected);
    });
}

static SELF_DELETER_RAN: AtomicBool = AtomicBool::new(false);

extern "C" fn self_deleter() -> i32 {
    SELF_DELETER_RAN.store(true, Ordering::SeqCst);
    proc::delete(proc::current_pid().unwrap());
    unreachable!("a self-deleted process never resumes");
}

#[test]
fn self_deletion_switches_away_safely() {
    with_kernel(|| {
        SELF_DELETER_RAN.store(false, Ordering::SeqCst);
        let pid = proc::create(self_deleter).expect("create");
        assert!(SELF_DELETER_RAN.load(Ordering::SeqCst));
        assert_eq!(proc::current_pid(), Some(0));

        // The kernel stays healthy afterwards: deleting the dead PID again
        // is ignored, and new processes can still be created.
        proc::delete(pid);
        let second = proc::create(self_deleter).expect("create after self-delete");
        assert!(second > pid);
        assert!(SELF_DELETER_RAN.load(Ordering::SeqCst));
    });
}

static ORDER: Mutex<Vec<proc::Pid>> = Mutex::new(Vec::new());

extern "C" fn cyclist() -> i32 {
    let pid = proc::current_pid().unwrap();
    loop {
        ORDER.lock().unwrap().push(pid);
        proc::yield_now();
    }
}

/// With a fixed population, successive yields visit the processes in a
/// fixed cyclic order.
#[test]
fn round_robin_cycle_is_fixed() {
    with_kernel(|| {
        ORDER.lock().unwrap().clear();
        let a = proc::create(cyclist).expect("create");
        let b = proc::create(cyclist).expect("create");
        let c = proc::create(cyclist).expect("create");

        for _ in 0..12 {
            proc::yield_now();
        }

        let order = ORDER.lock().unwrap().clone();
        let start = order.iter().position(|&pid| pid == c).unwrap();
        assert!(order.len() >= start + 9);
        for i in start..start + 6 {
            assert_eq!(order[i], order[i + 3], "rotation must stay cyclic");
        }

        // The cyclists never exit on their own; retire them from the ready
        // queue.
        proc::delete(a);
        proc::delete(b);
        proc::delete(c);
        proc::yield_now();
        assert_eq!(proc::current_pid(), Some(0));
    });
}

#[test]
fn delete_unknown_pid_is_ignored() {
    with_kernel(|| {
        proc::delete(12345);
        assert_eq!(proc::current_pid(), Some(0));
        proc::yield_now();
        assert_eq!(proc::current_pid(), Some(0));
    });
}

#[test]
fn create_fails_when_no_stack_fits() {
    let _guard = kernel_guard();
    // Room for the PCBs but nowhere near a 128 KiB stack.
    let region = Box::leak(vec![0u64; 512].into_boxed_slice());
    unsafe {
        memory::init(region.as_mut_ptr().cast(), size_of_val(region)).expect("region fits");
    }
    proc::init();

    let err = proc::create(cyclist).unwrap_err();
    assert!(matches!(err, proc::CreateError::StackExhausted { .. }));
    // The PCB allocated before the stack failure was released again.
    let free_before = memory::largest_free();
    let err = proc::create(cyclist).unwrap_err();
    assert!(matches!(err, proc::CreateError::StackExhausted { .. }));
    assert_eq!(memory::largest_free(), free_before);
    assert_eq!(proc::current_pid(), Some(0));
}

#[test]
fn create_fails_when_no_pcb_fits() {
    let _guard = kernel_guard();
    // Exactly one PCB fits: the bootstrap process takes it.
    let region = Box::leak(vec![0u64; 8].into_boxed_slice());
    unsafe {
        memory::init(region.as_mut_ptr().cast(), size_of_val(region)).expect("region fits");
    }
    proc::init();

    let err = proc::create(cyclist).unwrap_err();
    assert!(matches!(err, proc::CreateError::PcbExhausted { .. }));
    assert_eq!(proc::current_pid(), Some(0));
}
