//! Worst-fit region allocator implementation.
//!
//! This module provides a general-purpose allocator that manages a single
//! contiguous byte region handed to it at initialization. Every byte of
//! bookkeeping lives inside that region; the allocator itself is three
//! pointers.
//!
//! # Algorithm
//!
//! The allocator maintains two views of the region at once:
//!
//! - **Block chain**: every byte of the region belongs to exactly one block,
//!   free or used. Each block starts with a [`BlockHeader`] carrying a state
//!   magic, the payload size, and a back-link to the preceding block. The
//!   address-ordered successor is not stored; it is computed from the header
//!   address and the payload size, which makes merging neighbors cheap.
//! - **Free list**: the free blocks, doubly linked in decreasing payload
//!   size. The head is always the largest free block.
//!
//! Allocation is **worst-fit**: only the head of the free list is ever
//! considered. If the largest free block cannot satisfy a request, no block
//! can, so allocation is O(1). Carving requests out of the largest block
//! tends to leave large residual blocks behind, deferring fragmentation.
//! The price is paid on free, where the O(n) sorted insert keeps the list
//! ordered. A skiplist would make the insert cheaper, but at the cost of a
//! fatter header and therefore less usable memory.
//!
//! Deallocation eagerly coalesces with both address-ordered neighbors, so no
//! two adjacent blocks are ever both free and the free list stays no longer
//! than the number of used blocks plus one.
//!
//! # Memory Layout
//!
//! ```text
//! Used block:
//! ┌────────────────────────────────────┬──────────────────────────┐
//! │ BlockHeader                        │ Payload                  │
//! │ ┌───────────┬───────┬────────────┐ │ (returned to the caller) │
//! │ │ magic     │ size  │ prev       │ │                          │
//! │ └───────────┴───────┴────────────┘ │                          │
//! └────────────────────────────────────┴──────────────────────────┘
//!
//! Free block:
//! ┌────────────────────────────────────┬───────────────┬──────────┐
//! │ BlockHeader (magic = FREE)         │ FreeLinks     │ unused   │
//! │                                    │ larger/smaller│          │
//! └────────────────────────────────────┴───────────────┴──────────┘
//! ```
//!
//! The free-list links overlay the first payload bytes of a free block, so a
//! used block carries no free-list overhead at all. The overlay is the
//! reason every allocation is raised to at least [`MIN_ALLOC_SIZE`]: the
//! payload of any block must be able to hold the links once it is freed.
//!
//! # Thread Safety
//!
//! The allocator is `Send` but not `Sync`. It can be moved between threads
//! but requires external synchronization for concurrent access.

use core::ptr;

/// Marks a block whose payload is handed out to a caller.
const MAGIC_USED: u32 = 0x4D45_4D55; // 'MEMU'
/// Marks a block owned by the free list.
const MAGIC_FREE: u32 = 0x4D45_4D46; // 'MEMF'

/// Alignment of every payload the allocator hands out, and the granularity
/// all payload sizes are rounded to.
pub const ALIGN: usize = size_of::<usize>();

/// Size of the header preceding every block in the managed region.
pub const BLOCK_HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Smallest payload the allocator will carve out. Every free block must be
/// able to hold a [`FreeLinks`] pair in its payload.
pub const MIN_ALLOC_SIZE: usize = size_of::<FreeLinks>();

/// Smallest region [`WorstFitAllocator::init`] accepts: one header plus the
/// minimum free payload.
pub const MIN_REGION_SIZE: usize = BLOCK_HEADER_SIZE + MIN_ALLOC_SIZE;

/// Threshold below which a split is not worth it: the remainder of a block
/// must be able to stand alone as a header plus a minimum free payload.
const MIN_FREE_BLOCK: usize = BLOCK_HEADER_SIZE + MIN_ALLOC_SIZE;

const _: () = assert!(BLOCK_HEADER_SIZE % ALIGN == 0);
const _: () = assert!(align_of::<BlockHeader>() <= ALIGN);
const _: () = assert!(align_of::<FreeLinks>() <= ALIGN);

/// Header preceding every block in the managed region.
///
/// The successor in address order is implicit: it starts at
/// `header + BLOCK_HEADER_SIZE + size`, unless that address is the region
/// end, in which case this is the last block.
#[repr(C)]
struct BlockHeader {
    /// [`MAGIC_USED`] or [`MAGIC_FREE`]; doubles as the block state.
    magic: u32,
    /// Payload size in bytes, always a multiple of [`ALIGN`].
    size: usize,
    /// Immediately preceding block in address order, null for the first.
    prev: *mut BlockHeader,
}

/// Free-list links, stored in the first payload bytes of a free block.
///
/// `larger` points toward the free-list head (blocks of size >= this one),
/// `smaller` away from it. Which interpretation of the payload bytes is
/// active is keyed by the block's magic.
#[repr(C)]
struct FreeLinks {
    larger: *mut BlockHeader,
    smaller: *mut BlockHeader,
}

impl BlockHeader {
    /// Returns the payload address of `block`.
    ///
    /// # Safety
    ///
    /// `block` must point to a valid header inside a managed region.
    unsafe fn payload(block: *mut Self) -> *mut u8 {
        unsafe { block.cast::<u8>().add(BLOCK_HEADER_SIZE) }
    }

    /// Recovers the header from a payload address.
    ///
    /// # Safety
    ///
    /// `payload` must be at least [`BLOCK_HEADER_SIZE`] past the start of an
    /// addressable allocation.
    unsafe fn from_payload(payload: *mut u8) -> *mut Self {
        unsafe { payload.sub(BLOCK_HEADER_SIZE).cast() }
    }

    /// Returns one past the last payload byte of `block`.
    ///
    /// # Safety
    ///
    /// `block` must point to a valid header inside a managed region.
    unsafe fn end(block: *mut Self) -> *mut u8 {
        unsafe { Self::payload(block).add((*block).size) }
    }

    /// Returns the free-list links overlaid on the payload of `block`.
    ///
    /// # Safety
    ///
    /// `block` must point to a valid header inside a managed region, and the
    /// links are only meaningful while the block's magic is [`MAGIC_FREE`].
    unsafe fn links(block: *mut Self) -> *mut FreeLinks {
        unsafe { Self::payload(block).cast() }
    }
}

/// A worst-fit allocator over a single caller-provided region.
///
/// All bookkeeping lives inside the managed region; the allocator itself
/// holds only the chain head, the region end, and the free-list head. See
/// the [module documentation](self) for the algorithm.
///
/// # Thread Safety
///
/// `Send` but not `Sync`; wrap it in a mutex for shared use.
pub struct WorstFitAllocator {
    /// First block of the managed region in address order.
    region_head: *mut BlockHeader,
    /// One past the last byte of the managed region.
    region_end: *mut u8,
    /// Largest free block; head of the size-descending free list.
    free_head: *mut BlockHeader,
}

unsafe impl Send for WorstFitAllocator {}

impl Default for WorstFitAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl WorstFitAllocator {
    /// Creates an allocator that manages nothing yet.
    ///
    /// Every allocation fails and every free is ignored until
    /// [`init`](Self::init) hands over a region.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            region_head: ptr::null_mut(),
            region_end: ptr::null_mut(),
            free_head: ptr::null_mut(),
        }
    }

    /// Takes ownership of `region` and establishes a single free block
    /// covering all of it minus one header.
    ///
    /// The region start is aligned up and the size aligned down to
    /// [`ALIGN`]. May be called repeatedly; every call discards all previous
    /// state, including any outstanding allocations.
    ///
    /// # Panics
    ///
    /// Panics if the normalized region cannot hold a single free block of
    /// the minimum size ([`MIN_REGION_SIZE`] plus alignment slack).
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `region..region + size` is valid for reads and writes
    /// - the region is used by nothing but this allocator for as long as
    ///   any allocation from it is live
    pub unsafe fn init(&mut self, region: *mut u8, size: usize) {
        let align_offset = region.align_offset(ALIGN);
        let start = region.map_addr(|addr| addr + align_offset);
        let usable = size.saturating_sub(align_offset) / ALIGN * ALIGN;
        assert!(
            usable >= MIN_REGION_SIZE,
            "region cannot hold a single free block"
        );

        #[expect(clippy::cast_ptr_alignment)]
        let head = start.cast::<BlockHeader>();
        unsafe {
            (*head).magic = MAGIC_FREE;
            (*head).size = usable - BLOCK_HEADER_SIZE;
            (*head).prev = ptr::null_mut();
        }
        self.region_head = head;
        self.region_end = start.map_addr(|addr| addr + usable);
        self.free_head = ptr::null_mut();
        unsafe {
            self.insert_free(head);
        }
        self.debug_validate();
    }

    /// Allocates a payload of at least `size` bytes.
    ///
    /// `size` is raised to [`MIN_ALLOC_SIZE`] and rounded up to [`ALIGN`];
    /// the returned pointer is [`ALIGN`]-aligned. Worst fit: the request is
    /// carved from the largest free block, and the remainder is split off as
    /// a new free block when it is big enough to stand alone. Returns `None`
    /// when the largest free block cannot satisfy the request, which means
    /// no block can.
    pub fn allocate(&mut self, size: usize) -> Option<*mut u8> {
        let size = size.max(MIN_ALLOC_SIZE).checked_next_multiple_of(ALIGN)?;

        let block = self.free_head;
        if block.is_null() {
            return None;
        }
        unsafe {
            if (*block).size < size {
                return None;
            }
            let balance = (*block).size - size;

            if balance > MIN_FREE_BLOCK {
                // Split: the tail of this block becomes a new free block.
                let old_next = self.next_block(block);
                #[expect(clippy::cast_ptr_alignment)]
                let tail = BlockHeader::payload(block).add(size).cast::<BlockHeader>();
                (*tail).magic = MAGIC_FREE;
                (*tail).size = balance - BLOCK_HEADER_SIZE;
                (*tail).prev = block;
                if !old_next.is_null() {
                    (*old_next).prev = tail;
                }
                (*block).size = size;
                self.insert_free(tail);
            }
            // A balance of at most MIN_FREE_BLOCK could not stand alone as a
            // free block; the caller gets it as internal fragmentation.

            self.remove_free(block);
            (*block).magic = MAGIC_USED;
            self.debug_validate();
            Some(BlockHeader::payload(block))
        }
    }

    /// Releases a payload previously returned by [`allocate`](Self::allocate).
    ///
    /// The freed block is eagerly merged with its address-ordered neighbors.
    /// A null pointer is a no-op. A pointer outside the managed region, or
    /// one whose preceding header does not carry the used-block magic (a
    /// double free, or a pointer the allocator never returned), is rejected
    /// without touching any state.
    ///
    /// # Safety
    ///
    /// If `ptr` is a live allocation from this allocator, the caller must
    /// not use it after this call.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() || !self.contains_payload(ptr) {
            return;
        }
        unsafe {
            let mut block = BlockHeader::from_payload(ptr);
            if (*block).magic != MAGIC_USED {
                return;
            }
            (*block).magic = MAGIC_FREE;

            // Merge with the preceding block, if possible.
            let prev = (*block).prev;
            if !prev.is_null() && (*prev).magic == MAGIC_FREE {
                let next = self.next_block(block);
                (*block).magic = 0;
                (*prev).size += BLOCK_HEADER_SIZE + (*block).size;
                if !next.is_null() {
                    (*next).prev = prev;
                }
                block = prev;
                // The block grew; re-sort it within the free list.
                self.remove_free(block);
                self.insert_free(block);
            } else {
                self.insert_free(block);
            }

            // Merge with the succeeding block, if possible.
            let next = self.next_block(block);
            if !next.is_null() && (*next).magic == MAGIC_FREE {
                self.remove_free(next);
                let next_next = self.next_block(next);
                (*next).magic = 0;
                (*block).size += BLOCK_HEADER_SIZE + (*next).size;
                if !next_next.is_null() {
                    (*next_next).prev = block;
                }
                self.remove_free(block);
                self.insert_free(block);
            }
        }
        self.debug_validate();
    }

    /// Returns the payload size of the largest free block, or 0 when the
    /// free list is empty.
    #[must_use]
    pub fn largest_free(&self) -> usize {
        if self.free_head.is_null() {
            0
        } else {
            unsafe { (*self.free_head).size }
        }
    }

    /// Returns the number of free blocks.
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.free_head;
        while !cursor.is_null() {
            count += 1;
            cursor = unsafe { (*BlockHeader::links(cursor)).smaller };
        }
        count
    }

    /// Asserts every structural invariant of the allocator.
    ///
    /// Walks the block chain and the free list and panics on the first
    /// inconsistency. Runs automatically after every mutating operation in
    /// debug builds; tests call it directly.
    pub fn check_invariants(&self) {
        if self.region_head.is_null() {
            assert!(self.free_head.is_null());
            return;
        }
        unsafe {
            // Block chain: strictly increasing addresses, consistent
            // back-links, aligned sizes, no adjacent free blocks.
            let mut free_in_chain = 0usize;
            let mut prev: *mut BlockHeader = ptr::null_mut();
            let mut block = self.region_head;
            while !block.is_null() {
                let magic = (*block).magic;
                assert!(
                    magic == MAGIC_USED || magic == MAGIC_FREE,
                    "block has an invalid magic"
                );
                assert!(
                    ptr::eq((*block).prev, prev),
                    "block back-link is inconsistent"
                );
                assert!(
                    (*block).size.is_multiple_of(ALIGN),
                    "payload size is not aligned"
                );
                assert!(
                    BlockHeader::end(block) <= self.region_end,
                    "block overruns the region"
                );
                if magic == MAGIC_FREE {
                    free_in_chain += 1;
                    assert!(
                        (*block).size >= MIN_ALLOC_SIZE,
                        "free block cannot hold its links"
                    );
                    assert!(
                        prev.is_null() || (*prev).magic == MAGIC_USED,
                        "adjacent free blocks left uncoalesced"
                    );
                }
                prev = block;
                block = self.next_block(block);
            }

            // Free list: only free blocks, sizes non-increasing, links
            // mutually consistent, and one entry per free block in the
            // chain. The head being the largest follows from the order.
            let mut count = 0usize;
            let mut larger: *mut BlockHeader = ptr::null_mut();
            let mut cursor = self.free_head;
            while !cursor.is_null() {
                count += 1;
                assert_eq!((*cursor).magic, MAGIC_FREE, "used block in free list");
                let links = BlockHeader::links(cursor);
                assert!(
                    ptr::eq((*links).larger, larger),
                    "free-list links are inconsistent"
                );
                if !larger.is_null() {
                    assert!(
                        (*larger).size >= (*cursor).size,
                        "free list is not sorted by size"
                    );
                }
                larger = cursor;
                cursor = (*links).smaller;
            }
            assert_eq!(count, free_in_chain, "free list does not match the chain");
        }
    }

    /// Returns the address-ordered successor of `block`, or null if `block`
    /// is the last block of the region.
    ///
    /// # Safety
    ///
    /// `block` must point to a valid header inside the managed region.
    unsafe fn next_block(&self, block: *mut BlockHeader) -> *mut BlockHeader {
        let end = unsafe { BlockHeader::end(block) };
        if ptr::eq(end, self.region_end) {
            ptr::null_mut()
        } else {
            #[expect(clippy::cast_ptr_alignment)]
            let next = end.cast::<BlockHeader>();
            next
        }
    }

    /// Splices `block` into the free list at its size-sorted position.
    ///
    /// A linear scan from the head walks the `smaller` chain until a block
    /// of equal or lesser size is found and `block` is inserted in front of
    /// it.
    ///
    /// # Safety
    ///
    /// `block` must point to a valid free-block header that is not currently
    /// in the free list.
    unsafe fn insert_free(&mut self, block: *mut BlockHeader) {
        unsafe {
            let mut larger: *mut BlockHeader = ptr::null_mut();
            let mut smaller = self.free_head;
            while !smaller.is_null() && (*block).size < (*smaller).size {
                larger = smaller;
                smaller = (*BlockHeader::links(smaller)).smaller;
            }

            (*BlockHeader::links(block)).larger = larger;
            if larger.is_null() {
                self.free_head = block;
            } else {
                (*BlockHeader::links(larger)).smaller = block;
            }
            (*BlockHeader::links(block)).smaller = smaller;
            if !smaller.is_null() {
                (*BlockHeader::links(smaller)).larger = block;
            }
        }
    }

    /// Unlinks `block` from the free list.
    ///
    /// # Safety
    ///
    /// `block` must point to a valid header that is currently in the free
    /// list.
    unsafe fn remove_free(&mut self, block: *mut BlockHeader) {
        unsafe {
            let links = BlockHeader::links(block);
            let larger = (*links).larger;
            let smaller = (*links).smaller;
            if !smaller.is_null() {
                (*BlockHeader::links(smaller)).larger = larger;
            }
            if larger.is_null() {
                self.free_head = smaller;
            } else {
                (*BlockHeader::links(larger)).smaller = smaller;
            }
            (*links).larger = ptr::null_mut();
            (*links).smaller = ptr::null_mut();
        }
    }

    /// Returns whether `ptr` could be a payload address inside the managed
    /// region. Every payload the allocator hands out is aligned, so this
    /// filters foreign and corrupted pointers before their "header" is ever
    /// read.
    fn contains_payload(&self, ptr: *mut u8) -> bool {
        if self.region_head.is_null() || !ptr.addr().is_multiple_of(ALIGN) {
            return false;
        }
        let lowest = self.region_head.addr() + BLOCK_HEADER_SIZE;
        ptr.addr() >= lowest && ptr.addr() < self.region_end.addr()
    }

    #[inline]
    fn debug_validate(&self) {
        #[cfg(debug_assertions)]
        self.check_invariants();
    }
}
