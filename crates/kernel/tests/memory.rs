//! The process-wide memory singleton.
//!
//! Allocator semantics are covered in depth by the `allocator` crate's own
//! tests; these exercise the global wrapper. Both tests share the singleton,
//! so they serialize on a lock.

use std::sync::{Mutex, MutexGuard, PoisonError};

use kernel::memory;

static KERNEL: Mutex<()> = Mutex::new(());

fn kernel_guard() -> MutexGuard<'static, ()> {
    KERNEL.lock().unwrap_or_else(PoisonError::into_inner)
}

#[test]
fn rejects_a_region_that_cannot_hold_a_block() {
    let _guard = kernel_guard();
    let mut region = [0u64; 2];
    let err = unsafe { memory::init(region.as_mut_ptr().cast(), size_of_val(&region)) }
        .unwrap_err();
    assert!(matches!(err, memory::MemoryInitError::RegionTooSmall { .. }));
}

#[test]
fn allocates_and_frees_through_the_singleton() {
    let _guard = kernel_guard();
    let region = Box::leak(vec![0u64; 1024].into_boxed_slice());
    unsafe {
        memory::init(region.as_mut_ptr().cast(), size_of_val(region)).expect("region fits");
    }

    let initial = memory::largest_free();
    let a = memory::allocate(100).expect("fits");
    let b = memory::allocate(200).expect("fits");
    assert!(memory::allocate(1 << 20).is_none());
    memory::check_invariants();

    unsafe {
        memory::free(a);
        memory::free(b);
    }
    assert_eq!(memory::free_block_count(), 1);
    assert_eq!(memory::largest_free(), initial);
}
