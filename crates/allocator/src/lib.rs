//! Region-based memory allocation for the toy kernel.
//!
//! This crate provides the allocator that backs every dynamic allocation in
//! the kernel: process control blocks, process stacks, and whatever callers
//! request through the kernel's memory API. It is `no_std` compatible and
//! keeps all of its bookkeeping inside the managed region itself, so it can
//! run in environments without any backing heap.
//!
//! # Available Allocators
//!
//! ## [`WorstFitAllocator`](worst_fit::WorstFitAllocator)
//!
//! A worst-fit allocator over a single caller-provided byte region. Best
//! suited for:
//!
//! - Workloads with unpredictable allocation sizes
//! - Long-running systems where fragmentation must be deferred
//! - Environments where the allocator must not consume memory of its own
//!
//! **Performance**: O(1) allocation (only the largest free block is ever
//! inspected), O(n) deallocation and free-list maintenance where n is the
//! number of free blocks.
//!
//! # Usage Example
//!
//! ```rust
//! use allocator::worst_fit::WorstFitAllocator;
//!
//! let mut allocator = WorstFitAllocator::new();
//!
//! // Hand the allocator a region to manage (in the kernel, this is the
//! // memory handed over at startup).
//! let mut region = vec![0u8; 4096];
//! unsafe {
//!     allocator.init(region.as_mut_ptr(), region.len());
//! }
//!
//! // Allocate and release memory.
//! if let Some(ptr) = allocator.allocate(64) {
//!     unsafe {
//!         allocator.free(ptr);
//!     }
//! }
//! ```
//!
//! # Design Considerations
//!
//! All bookkeeping lives in headers interleaved with the payloads they
//! describe. Handing a region to [`init`](worst_fit::WorstFitAllocator::init)
//! transfers ownership of every byte in it to the allocator; the caller must
//! keep the region alive for as long as the allocator is used.
//!
//! The allocator is `Send` but not `Sync`. It can be moved between threads
//! but requires external synchronization for concurrent access.

#![no_std]

pub mod worst_fit;
