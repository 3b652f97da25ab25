//! Lifetime tracking: host memory must outlive everything derived from it.

use opix::Image;
use std::sync::Arc;

fn host_buffer(len: usize) -> Arc<[u8]> {
    Arc::from(vec![1u8; len].into_boxed_slice())
}

#[test]
fn test_wrapped_memory_is_tracked() {
    let data = host_buffer(4 * 4);
    let image = Image::new_from_memory(data.clone(), 4, 4, 1).unwrap();
    let tracked = image.tracked_buffers();
    assert_eq!(tracked.len(), 1);
    assert!(std::ptr::eq(tracked[0].as_bytes().as_ptr(), data.as_ptr()));
}

#[test]
fn test_tracking_survives_a_chain_of_calls() {
    let data = host_buffer(6 * 2);
    let source = Image::new_from_memory(data.clone(), 6, 2, 1).unwrap();

    // two chained operations: the final object still reports the
    // original buffer among its tracked set
    let doubled = source.linear(&[2.0], &[0.0]).unwrap();
    let inverted = doubled.invert().unwrap();

    let tracked = inverted.tracked_buffers();
    assert!(tracked
        .iter()
        .any(|buffer| std::ptr::eq(buffer.as_bytes().as_ptr(), data.as_ptr())));
}

#[test]
fn test_tracking_unions_both_sides() {
    let left_data = host_buffer(3 * 3);
    let right_data = host_buffer(3 * 3);
    let left = Image::new_from_memory(left_data.clone(), 3, 3, 1).unwrap();
    let right = Image::new_from_memory(right_data.clone(), 3, 3, 1).unwrap();

    let sum = left.add(&right).unwrap();
    let tracked = sum.tracked_buffers();
    assert!(tracked
        .iter()
        .any(|buffer| std::ptr::eq(buffer.as_bytes().as_ptr(), left_data.as_ptr())));
    assert!(tracked
        .iter()
        .any(|buffer| std::ptr::eq(buffer.as_bytes().as_ptr(), right_data.as_ptr())));
}

#[test]
fn test_identical_buffers_tracked_separately() {
    // equal contents, distinct allocations: identity, not value
    let first = host_buffer(2 * 2);
    let second = host_buffer(2 * 2);
    let a = Image::new_from_memory(first, 2, 2, 1).unwrap();
    let b = Image::new_from_memory(second, 2, 2, 1).unwrap();

    let sum = a.add(&b).unwrap();
    assert_eq!(sum.tracked_buffers().len(), 2);
}

#[test]
fn test_memory_released_when_chain_dies() {
    let data = host_buffer(5 * 5);
    let weak = Arc::downgrade(&data);

    let source = Image::new_from_memory(data, 5, 5, 1).unwrap();
    let derived = source.linear(&[1.0], &[1.0]).unwrap();
    drop(source);

    // the derived object still pins the host buffer
    assert!(weak.upgrade().is_some());

    drop(derived);
    opix::cache_drop_all();
    // nothing depends on it any more
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_borrowed_pixels_are_not_copied() {
    let mut bytes = vec![0u8; 4];
    bytes[3] = 42;
    let data: Arc<[u8]> = Arc::from(bytes.into_boxed_slice());
    let image = Image::new_from_memory(data, 2, 2, 1).unwrap();
    assert_eq!(image.getpoint(1, 1).unwrap(), vec![42.0]);
}
