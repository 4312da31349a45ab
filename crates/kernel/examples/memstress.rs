//! Allocator stress driver.
//!
//! Runs two passes over the managed region: a fixed tight-fit pass that
//! carves the region up exactly and puts it back together, then a long
//! randomized alloc/free churn. Invariants are checked as it goes; the
//! driver panics on the first inconsistency.

use allocator::worst_fit::BLOCK_HEADER_SIZE;
use argh::FromArgs;
use kernel::memory;

#[derive(FromArgs)]
/// Allocator stress driver: a tight-fit pass, then random churn.
struct Args {
    /// seed for the deterministic generator
    #[argh(option, default = "0x5EED")]
    seed: u64,
    /// number of random alloc/free operations
    #[argh(option, default = "100_000")]
    iterations: usize,
    /// number of live-allocation slots
    #[argh(option, default = "1000")]
    slots: usize,
    /// size of the managed region in bytes
    #[argh(option, default = "1024 * 1024")]
    region_size: usize,
}

/// Splitmix-style generator; deterministic so runs reproduce.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

/// Carves a region up exactly -- three allocations and a fourth that must
/// fail -- then frees everything back into one block.
fn tight_fit_pass(region: *mut u8) {
    unsafe {
        memory::init(region, 610 + 3 * BLOCK_HEADER_SIZE).expect("region too small");
    }

    let a = memory::allocate(100).expect("first allocation fits");
    let b = memory::allocate(200).expect("second allocation fits");
    let c = memory::allocate(300).expect("third allocation fits");
    assert!(
        memory::allocate(30).is_none(),
        "the region must be exactly full"
    );

    unsafe {
        memory::free(a);
        memory::free(c);
        memory::free(b);
        memory::free(std::ptr::null_mut());
    }
    memory::check_invariants();
    assert_eq!(memory::free_block_count(), 1);
    println!("tight-fit pass ok");
}

fn churn_pass(region: *mut u8, region_size: usize, args: &Args) {
    unsafe {
        memory::init(region, region_size).expect("region too small");
    }

    let mut rng = Rng(args.seed);
    let mut slot_table: Vec<Option<*mut u8>> = vec![None; args.slots];
    let mut allocated = 0u64;
    let mut failed = 0u64;

    for iteration in 0..args.iterations {
        let idx = rng.next() as usize % slot_table.len();
        match slot_table[idx].take() {
            None => {
                let size = rng.next() as usize % 10_000;
                match memory::allocate(size) {
                    Some(ptr) => {
                        allocated += 1;
                        slot_table[idx] = Some(ptr);
                    }
                    None => failed += 1,
                }
            }
            Some(ptr) => unsafe {
                memory::free(ptr);
            },
        }
        if iteration % 10_000 == 0 {
            memory::check_invariants();
        }
    }

    for slot in slot_table.iter_mut() {
        if let Some(ptr) = slot.take() {
            unsafe {
                memory::free(ptr);
            }
        }
    }
    memory::check_invariants();
    assert_eq!(memory::free_block_count(), 1);

    println!(
        "churn pass ok: {} iterations, {allocated} allocations, {failed} refusals, \
         largest free block {} bytes",
        args.iterations,
        memory::largest_free()
    );
}

fn main() {
    let args: Args = argh::from_env();

    // A u64 buffer keeps the region word-aligned, so the byte math of the
    // tight-fit pass is exact.
    let region = Box::leak(vec![0u64; args.region_size.div_ceil(8)].into_boxed_slice());
    let region_ptr = region.as_mut_ptr().cast::<u8>();

    tight_fit_pass(region_ptr);
    churn_pass(region_ptr, size_of_val(region), &args);
}
