//! The process-wide memory singleton.
//!
//! Wraps one [`WorstFitAllocator`] in a spin mutex and exposes it as free
//! functions. Everything dynamic in this kernel -- process control blocks,
//! process stacks, caller requests -- comes out of the single region handed
//! to [`init`].

use allocator::worst_fit::{self, WorstFitAllocator};
use snafu::{Snafu, ensure};
use spin::mutex::SpinMutex;

static MEMORY: SpinMutex<WorstFitAllocator> = SpinMutex::new(WorstFitAllocator::new());

#[derive(Debug, Snafu)]
pub enum MemoryInitError {
    #[snafu(display("a {size}-byte region cannot hold a single free block"))]
    RegionTooSmall {
        size: usize,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// Hands `region` over to the kernel and resets all allocator state.
///
/// May be called again to discard everything and start over. Rejects a
/// region too small to hold even one free block after alignment.
///
/// # Safety
///
/// `region..region + size` must be valid for reads and writes, and must be
/// used by nothing but this kernel for as long as any allocation from it is
/// live.
pub unsafe fn init(region: *mut u8, size: usize) -> Result<(), MemoryInitError> {
    let usable =
        size.saturating_sub(region.align_offset(worst_fit::ALIGN)) / worst_fit::ALIGN
            * worst_fit::ALIGN;
    ensure!(usable >= worst_fit::MIN_REGION_SIZE, RegionTooSmallSnafu { size });

    unsafe {
        MEMORY.lock().init(region, size);
    }
    info!("managing a {usable}-byte region");
    Ok(())
}

/// Allocates at least `size` bytes from the managed region.
///
/// Returns `None` when no free block can satisfy the request.
pub fn allocate(size: usize) -> Option<*mut u8> {
    MEMORY.lock().allocate(size)
}

/// Releases an allocation made by [`allocate`].
///
/// Null pointers and pointers the allocator never returned are ignored.
///
/// # Safety
///
/// If `ptr` is a live allocation, the caller must not use it afterwards.
pub unsafe fn free(ptr: *mut u8) {
    unsafe {
        MEMORY.lock().free(ptr);
    }
}

/// Payload size of the largest free block; 0 when memory is exhausted.
#[must_use]
pub fn largest_free() -> usize {
    MEMORY.lock().largest_free()
}

/// Number of free blocks in the managed region.
#[must_use]
pub fn free_block_count() -> usize {
    MEMORY.lock().free_block_count()
}

/// Panics if the allocator's internal structures are inconsistent.
pub fn check_invariants() {
    MEMORY.lock().check_invariants();
}
