//! Round-robin scheduling demo.
//!
//! The bootstrap process spawns process 1, which spawns process 2; the two
//! then count in lockstep, yielding after every line, and delete themselves
//! when their counters run out. Because a freshly created process jumps the
//! ready queue, process 2 prints before process 1 and the interleaving is
//! fully deterministic.

use std::sync::atomic::{AtomicBool, Ordering};

use argh::FromArgs;
use kernel::{LogLevel, memory, proc};

#[derive(FromArgs)]
/// Cooperative round-robin scheduling demo.
struct Args {
    /// size of the managed region in bytes
    #[argh(option, default = "1024 * 1024")]
    region_size: usize,
    /// log process and scheduler activity
    #[argh(switch)]
    verbose: bool,
}

static PROCESS_ONE_DONE: AtomicBool = AtomicBool::new(false);
static PROCESS_TWO_DONE: AtomicBool = AtomicBool::new(false);

extern "C" fn process_one() -> i32 {
    proc::create(process_two).expect("failed to create process 2");

    for i in (0..10).step_by(2) {
        println!("Process-1: {i}");
        proc::yield_now();
        println!("Process-1: {}", i + 1);
        proc::yield_now();
    }
    PROCESS_ONE_DONE.store(true, Ordering::SeqCst);
    proc::delete(proc::current_pid().unwrap());
    0
}

extern "C" fn process_two() -> i32 {
    for k in (1..=10).rev() {
        println!("Process-2: {k}");
        proc::yield_now();
    }
    PROCESS_TWO_DONE.store(true, Ordering::SeqCst);
    proc::delete(proc::current_pid().unwrap());
    0
}

fn main() {
    let args: Args = argh::from_env();
    if args.verbose {
        kernel::set_min_level(LogLevel::Trace);
    }

    let region = Box::leak(vec![0u8; args.region_size].into_boxed_slice());
    unsafe {
        memory::init(region.as_mut_ptr(), region.len()).expect("region too small");
    }
    proc::init();

    proc::create(process_one).expect("failed to create process 1");
    while !(PROCESS_ONE_DONE.load(Ordering::SeqCst) && PROCESS_TWO_DONE.load(Ordering::SeqCst)) {
        proc::yield_now();
    }

    println!(
        "all processes retired; {} free block(s) remain",
        memory::free_block_count()
    );
}
