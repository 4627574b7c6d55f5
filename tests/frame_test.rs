/*!
 * Frame Allocator Tests
 * One-cycle-of-grace retention and fixed-capacity behavior
 */

use memkit::{FrameAllocator, MemoryError};
use pretty_assertions::assert_eq;

#[test]
fn test_previous_cycle_data_survives_one_boundary() {
    let mut frame = FrameAllocator::new(256).unwrap();

    let ptr = frame.alloc(64).unwrap();
    let pattern: Vec<u8> = (0..64u8).collect();
    unsafe { std::ptr::copy_nonoverlapping(pattern.as_ptr(), ptr.as_ptr(), 64) };

    // One boundary: the other buffer becomes active, ours is untouched.
    frame.begin_cycle();
    let other = frame.alloc(64).unwrap();
    unsafe { other.as_ptr().write_bytes(0xFF, 64) };

    let survived = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 64) };
    assert_eq!(survived, &pattern[..]);
}

#[test]
fn test_third_cycle_reuses_first_buffer() {
    let mut frame = FrameAllocator::new(128).unwrap();

    let first = frame.alloc(32).unwrap();
    frame.begin_cycle();
    frame.begin_cycle();

    // Same buffer slot again: overlap with cycle-N data is by design.
    let reused = frame.alloc(32).unwrap();
    assert_eq!(first.as_ptr(), reused.as_ptr());
}

#[test]
fn test_exhaustion_is_recoverable_and_final() {
    let mut frame = FrameAllocator::new(64).unwrap();
    frame.alloc(48).unwrap();

    let err = frame.allocate(32, 8).unwrap_err();
    assert_eq!(
        err,
        MemoryError::FrameExhausted {
            requested: 32,
            align: 8,
            remaining: 16,
        }
    );

    // No growth path: capacity is fixed, smaller requests still work.
    assert_eq!(frame.capacity(), 64);
    frame.allocate(16, 8).unwrap();
}

#[test]
fn test_cursor_resets_per_buffer() {
    let mut frame = FrameAllocator::new(128).unwrap();

    frame.alloc(48).unwrap();
    assert_eq!(frame.size(), 48);

    frame.begin_cycle();
    assert_eq!(frame.size(), 0);
    frame.alloc(96).unwrap();
    assert_eq!(frame.size(), 96);

    // Back to the first buffer: its cursor resets, the 96 bytes in the
    // other buffer stay allocated until the next flip.
    frame.begin_cycle();
    assert_eq!(frame.size(), 0);
}

#[test]
fn test_alignment_requests() {
    let mut frame = FrameAllocator::new(1024).unwrap();

    frame.allocate(3, 1).unwrap();
    for &align in &[2usize, 8, 16, 64] {
        let ptr = frame.allocate(5, align).unwrap();
        assert_eq!(ptr.as_ptr() as usize % align, 0);
    }
}

#[test]
fn test_invalid_requests() {
    let mut frame = FrameAllocator::new(64).unwrap();
    assert!(matches!(
        frame.allocate(0, 16),
        Err(MemoryError::InvalidLayout { .. })
    ));
    assert!(matches!(
        frame.allocate(8, 6),
        Err(MemoryError::InvalidLayout { .. })
    ));
    assert!(FrameAllocator::new(0).is_err());
}
