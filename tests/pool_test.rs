/*!
 * Pool Allocator Tests
 * Free-list behavior, chunk growth, and concurrent stress
 */

use memkit::PoolAllocator;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

#[test]
fn test_no_double_issue() {
    let pool = PoolAllocator::new(16, 8);
    let mut live = HashSet::new();

    for _ in 0..32 {
        let ptr = pool.allocate().unwrap();
        assert!(
            live.insert(ptr.as_ptr() as usize),
            "address issued twice while still live"
        );
    }

    for addr in live {
        pool.deallocate(std::ptr::NonNull::new(addr as *mut u8).unwrap());
    }
    assert_eq!(pool.stats().free_slots, pool.stats().total_slots());
}

#[test]
fn test_live_addresses_bounded_by_chunks() {
    let pool = PoolAllocator::new(32, 16);
    let mut held = Vec::new();

    for _ in 0..100 {
        held.push(pool.allocate().unwrap());
    }
    let stats = pool.stats();
    assert!(held.len() <= stats.chunks * stats.elements_per_chunk);
    assert_eq!(stats.live_slots(), 100);

    for ptr in held.drain(..) {
        pool.deallocate(ptr);
    }
    assert_eq!(pool.stats().live_slots(), 0);
}

#[test]
fn test_interleaved_allocate_deallocate() {
    let pool = PoolAllocator::new(24, 4);
    let mut rng = StdRng::seed_from_u64(7);
    let mut held = Vec::new();
    let mut live = HashSet::new();

    for _ in 0..1000 {
        if held.is_empty() || rng.gen_bool(0.6) {
            let ptr = pool.allocate().unwrap();
            assert!(live.insert(ptr.as_ptr() as usize));
            held.push(ptr);
        } else {
            let ptr = held.swap_remove(rng.gen_range(0..held.len()));
            assert!(live.remove(&(ptr.as_ptr() as usize)));
            pool.deallocate(ptr);
        }
        let stats = pool.stats();
        assert!(live.len() <= stats.chunks * stats.elements_per_chunk);
    }
}

#[test]
fn test_slot_contents_are_usable() {
    let pool = PoolAllocator::new(32, 8);
    let a = pool.allocate().unwrap();
    let b = pool.allocate().unwrap();

    // Slots are at least pointer-aligned and do not overlap.
    unsafe {
        a.cast::<u64>().as_ptr().write(0xDEAD_BEEF);
        b.cast::<u64>().as_ptr().write(0xCAFE_F00D);
        assert_eq!(a.cast::<u64>().as_ptr().read(), 0xDEAD_BEEF);
        assert_eq!(b.cast::<u64>().as_ptr().read(), 0xCAFE_F00D);
    }

    pool.deallocate(a);
    pool.deallocate(b);
}

/// Eight threads hammer one pool; a shared live-set proves no two threads
/// ever observe the same slot at the same instant.
#[test]
fn test_concurrent_stress() {
    let _ = env_logger::builder().is_test(true).try_init();

    const THREADS: usize = 8;
    const CYCLES: usize = 10_000;

    let pool = Arc::new(PoolAllocator::new(32, 64));
    let live = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..THREADS)
        .map(|tid| {
            let pool = Arc::clone(&pool);
            let live = Arc::clone(&live);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(tid as u64);
                let mut held = Vec::new();

                for _ in 0..CYCLES {
                    if held.len() < 8 && (held.is_empty() || rng.gen_bool(0.5)) {
                        let ptr = pool.allocate().unwrap();
                        let addr = ptr.as_ptr() as usize;
                        assert!(
                            live.lock().insert(addr),
                            "two threads hold the same slot"
                        );
                        unsafe { ptr.cast::<u64>().as_ptr().write(addr as u64) };
                        held.push(ptr);
                    } else {
                        let ptr = held.swap_remove(rng.gen_range(0..held.len()));
                        let addr = ptr.as_ptr() as usize;
                        unsafe { assert_eq!(ptr.cast::<u64>().as_ptr().read(), addr as u64) };
                        assert!(live.lock().remove(&addr));
                        pool.deallocate(ptr);
                    }
                }

                for ptr in held {
                    assert!(live.lock().remove(&(ptr.as_ptr() as usize)));
                    pool.deallocate(ptr);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pool.stats();
    assert!(live.lock().is_empty());
    assert_eq!(stats.live_slots(), 0);
    assert_eq!(stats.foreign_frees, 0);
}
