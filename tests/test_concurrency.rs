//! Shared-cache behavior under concurrent callers.

use opix::{get_schema, Image};
use std::sync::Arc;
use std::thread;

#[test]
fn test_concurrent_schema_lookup_publishes_one_schema() {
    let handles: Vec<_> = (0..8)
        .map(|_| thread::spawn(|| get_schema("embed").unwrap()))
        .collect();
    let schemas: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for schema in &schemas[1..] {
        // all callers see the same published instance
        assert!(Arc::ptr_eq(schema, &schemas[0]));
    }
}

#[test]
fn test_concurrent_calls() {
    let base = Image::black(16, 16).unwrap();
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let image = base.clone();
            thread::spawn(move || {
                let shifted = image.linear(&[1.0], &[i as f64]).unwrap();
                let sum = shifted.add(&image).unwrap();
                sum.getpoint(0, 0).unwrap()[0]
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), i as f64);
    }
}

#[test]
fn test_kill_flag_is_settable_cross_thread() {
    let image = Image::black(4, 4).unwrap();
    image.set_progress(|_| {});
    let remote = image.clone();
    thread::spawn(move || remote.set_kill(true)).join().unwrap();
    image.set_kill(false);
    assert!(image.copy_memory().is_ok());
}
