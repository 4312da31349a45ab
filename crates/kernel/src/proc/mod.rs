//! Cooperative process management.
//!
//! A process is a start routine plus a stack from the managed region.
//! Execution moves between processes only when one of them asks for it:
//! [`yield_now`] and [`create`] run the scheduler, and [`delete`] runs it
//! after retiring its target. There is no preemption.

use core::ptr;

use snafu::{OptionExt as _, Snafu};
use spin::mutex::SpinMutex;

use crate::memory;

mod context;

/// Stack handed to every created process.
pub const STACK_SIZE: usize = 128 * 1024;

/// Magic tagging a live PCB in the managed region.
const MAGIC_PROC: u32 = 0x5052_4F43; // 'PROC'

pub type Pid = i32;

/// Start routine of a process.
///
/// A process normally finishes by deleting itself; a routine that returns
/// instead is retired by the kernel, with its return value logged.
pub type ProcessEntry = extern "C" fn() -> i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcState {
    Ready,
    Running,
    /// Reserved; nothing transitions into it yet.
    #[expect(dead_code)]
    Sleeping,
    /// Reserved; nothing transitions into it yet.
    #[expect(dead_code)]
    Waiting,
}

/// Process control block, allocated from the managed region.
#[repr(C)]
struct Pcb {
    /// Ready-queue link; null while running or in flight.
    next: *mut Pcb,
    magic: u32,
    pid: Pid,
    state: ProcState,
    /// Stack owned by this process. Null for the bootstrap process, whose
    /// stack belongs to the host and must never be freed.
    stack_base: *mut u8,
    /// Top of the switch frame; valid whenever the process is not running.
    saved_sp: *mut u8,
}

struct ProcTable {
    ready_head: *mut Pcb,
    ready_tail: *mut Pcb,
    running: *mut Pcb,
    next_pid: Pid,
}

unsafe impl Send for ProcTable {}

static PROC_TABLE: SpinMutex<ProcTable> = SpinMutex::new(ProcTable::new());

impl ProcTable {
    const fn new() -> Self {
        Self {
            ready_head: ptr::null_mut(),
            ready_tail: ptr::null_mut(),
            running: ptr::null_mut(),
            next_pid: 0,
        }
    }

    /// Monotonic PID assignment; wraps after `i32::MAX` processes, at which
    /// point delete-by-pid becomes ambiguous. Known limitation.
    fn assign_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid = self.next_pid.wrapping_add(1);
        pid
    }

    fn push_front(&mut self, pcb: *mut Pcb) {
        unsafe {
            (*pcb).next = self.ready_head;
        }
        self.ready_head = pcb;
        if self.ready_tail.is_null() {
            self.ready_tail = pcb;
        }
    }

    fn push_back(&mut self, pcb: *mut Pcb) {
        unsafe {
            (*pcb).next = ptr::null_mut();
            if self.ready_head.is_null() {
                self.ready_head = pcb;
            } else {
                (*self.ready_tail).next = pcb;
            }
        }
        self.ready_tail = pcb;
    }

    fn pop_front(&mut self) -> *mut Pcb {
        let pcb = self.ready_head;
        if !pcb.is_null() {
            self.ready_head = unsafe { (*pcb).next };
            if self.ready_head.is_null() {
                self.ready_tail = ptr::null_mut();
            }
        }
        pcb
    }

    /// Splices the process with `pid` out of the ready queue, or returns
    /// null if it is not queued.
    fn remove(&mut self, pid: Pid) -> *mut Pcb {
        unsafe {
            let mut prev: *mut Pcb = ptr::null_mut();
            let mut cursor = self.ready_head;
            while !cursor.is_null() && (*cursor).pid != pid {
                prev = cursor;
                cursor = (*cursor).next;
            }
            if cursor.is_null() {
                return cursor;
            }

            if prev.is_null() {
                self.ready_head = (*cursor).next;
            } else {
                (*prev).next = (*cursor).next;
            }
            if ptr::eq(self.ready_tail, cursor) {
                self.ready_tail = prev;
            }
            if self.ready_head.is_null() {
                self.ready_tail = ptr::null_mut();
            }
            (*cursor).next = ptr::null_mut();
            cursor
        }
    }

    /// Asserts queue and state consistency: every queued PCB is intact and
    /// `Ready`, the tail pointer matches the queue, and the running process
    /// (if any) was never put to sleep.
    fn debug_validate(&self) {
        #[cfg(debug_assertions)]
        unsafe {
            if !self.running.is_null() {
                assert_eq!((*self.running).magic, MAGIC_PROC);
                // The bootstrap process stays `Ready` until its first trip
                // through the scheduler.
                assert!(matches!(
                    (*self.running).state,
                    ProcState::Ready | ProcState::Running
                ));
            }
            let mut last: *mut Pcb = ptr::null_mut();
            let mut cursor = self.ready_head;
            while !cursor.is_null() {
                assert_eq!((*cursor).magic, MAGIC_PROC);
                assert_eq!((*cursor).state, ProcState::Ready);
                last = cursor;
                cursor = (*cursor).next;
            }
            assert!(
                ptr::eq(self.ready_tail, last),
                "tail pointer does not match the ready queue"
            );
        }
    }
}

/// Resets the process manager and installs the caller as the bootstrap
/// process.
///
/// The bootstrap process gets PID 0 and keeps running on the host-provided
/// stack, which the kernel never frees. [`memory::init`](crate::memory::init)
/// must have been called first.
///
/// # Panics
///
/// Panics if the bootstrap PCB cannot be allocated.
pub fn init() {
    #[expect(clippy::cast_ptr_alignment)]
    let pcb = memory::allocate(size_of::<Pcb>())
        .expect("no memory region; call memory::init first")
        .cast::<Pcb>();

    let mut table = PROC_TABLE.lock();
    table.ready_head = ptr::null_mut();
    table.ready_tail = ptr::null_mut();
    table.running = ptr::null_mut();
    table.next_pid = 0;

    let pid = table.assign_pid();
    unsafe {
        pcb.write(Pcb {
            next: ptr::null_mut(),
            magic: MAGIC_PROC,
            pid,
            state: ProcState::Ready,
            stack_base: ptr::null_mut(),
            saved_sp: context::current_stack_pointer(),
        });
    }
    table.running = pcb;
    table.debug_validate();
    drop(table);
    info!("process {pid} bootstrapped on the host stack");
}

#[derive(Debug, Snafu)]
pub enum CreateError {
    /// The managed region could not fit a new process control block.
    #[snafu(display("failed to allocate a process control block"))]
    PcbExhausted {
        #[snafu(implicit)]
        location: snafu::Location,
    },
    /// The managed region could not fit a new process stack.
    #[snafu(display("failed to allocate a {STACK_SIZE}-byte process stack"))]
    StackExhausted {
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// Creates a process that will enter `entry` on a fresh [`STACK_SIZE`]-byte
/// stack.
///
/// The new process goes to the *head* of the ready queue and the scheduler
/// runs immediately, so it executes before anything that was already
/// waiting; the caller is requeued at the tail and resumes later, at which
/// point the new PID is returned.
pub fn create(entry: ProcessEntry) -> Result<Pid, CreateError> {
    #[expect(clippy::cast_ptr_alignment)]
    let pcb = memory::allocate(size_of::<Pcb>())
        .context(PcbExhaustedSnafu)?
        .cast::<Pcb>();
    let Some(stack_base) = memory::allocate(STACK_SIZE) else {
        unsafe {
            memory::free(pcb.cast());
        }
        return StackExhaustedSnafu.fail();
    };
    let saved_sp = unsafe { context::prepare(stack_base, STACK_SIZE, entry) };

    let mut table = PROC_TABLE.lock();
    let pid = table.assign_pid();
    unsafe {
        pcb.write(Pcb {
            next: ptr::null_mut(),
            magic: MAGIC_PROC,
            pid,
            state: ProcState::Ready,
            stack_base,
            saved_sp,
        });
    }
    table.push_front(pcb);
    drop(table);
    debug!("created process {pid}");

    sched();
    Ok(pid)
}

/// Deletes the process identified by `pid`, then schedules.
///
/// A process waiting in the ready queue is spliced out and its stack and
/// PCB are returned to the allocator. The running process deletes itself by
/// passing its own PID: the running slot is cleared and the scheduler
/// switches away for good, but the PCB and stack are deliberately not freed
/// -- this call is still executing on that stack. An unknown PID is
/// ignored.
pub fn delete(pid: Pid) {
    let mut table = PROC_TABLE.lock();
    let pcb = table.remove(pid);
    if !pcb.is_null() {
        drop(table);
        unsafe {
            debug_assert_eq!((*pcb).magic, MAGIC_PROC);
            memory::free((*pcb).stack_base);
            memory::free(pcb.cast());
        }
        debug!("deleted process {pid}");
    } else if !table.running.is_null() && unsafe { (*table.running).pid } == pid {
        table.running = ptr::null_mut();
        drop(table);
        debug!("process {pid} deleted itself");
    } else {
        drop(table);
        warn!("delete of unknown process {pid} ignored");
    }
    sched();
}

/// Voluntarily hands the CPU to the next ready process, if any.
pub fn yield_now() {
    sched();
}

/// PID of the running process, or `None` in the window where a process has
/// deleted itself and nothing has been scheduled yet.
#[must_use]
pub fn current_pid() -> Option<Pid> {
    let table = PROC_TABLE.lock();
    if table.running.is_null() {
        None
    } else {
        Some(unsafe { (*table.running).pid })
    }
}

/// Round-robin scheduler; the only place context switches happen.
///
/// Dequeues the ready-queue head, requeues the outgoing process (if any) at
/// the tail, and swaps stacks. Returns without switching when nothing else
/// is ready. The table lock is released before the swap; the swap itself
/// never touches the table.
fn sched() {
    let mut table = PROC_TABLE.lock();
    table.debug_validate();
    let next = table.pop_front();
    if next.is_null() {
        // Nothing else to run; the current process continues.
        return;
    }

    unsafe {
        let old = table.running;
        if !old.is_null() {
            (*old).state = ProcState::Ready;
            table.push_back(old);
        }
        (*next).state = ProcState::Running;
        (*next).next = ptr::null_mut();
        table.running = next;

        let to_pid = (*next).pid;
        let old_sp = if old.is_null() {
            ptr::null_mut()
        } else {
            &raw mut (*old).saved_sp
        };
        let new_sp = (*next).saved_sp;
        drop(table);
        trace!("switching to process {to_pid}");

        // The outgoing stack pointer must be captured before the incoming
        // one is installed; `switch` hard-codes that order.
        context::switch(old_sp, new_sp);
    }
}

/// First portable frame of every created process; entered from the context
/// switch trampoline.
fn run_process(entry: ProcessEntry) -> ! {
    let pid = current_pid().expect("a process is running");
    let status = entry();

    // A start routine normally deletes itself before returning. Retire one
    // that fell off the end instead of returning into a dead frame.
    debug!("process {pid} returned with status {status}; retiring it");
    delete(pid);

    // delete() only comes back here when nothing else was runnable; with
    // the last process gone there is no stack left to continue on.
    std::process::abort();
}
