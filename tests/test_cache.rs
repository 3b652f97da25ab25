//! Operation memoization. One combined test: dropping the cache is
//! process-global, so the scenario runs as a single sequence.

use opix::{call, engine::heap, Image};

#[test]
fn test_memoization_lifecycle() {
    // identical calls reuse the same underlying object
    let first = call("black", &[33.into(), 31.into()])
        .unwrap()
        .into_image()
        .unwrap();
    let second = call("black", &[33.into(), 31.into()])
        .unwrap()
        .into_image()
        .unwrap();
    assert_eq!(first, second);

    // two wrappers plus the cache's own reference
    assert_eq!(first.refcount(), 3);
    opix::cache_drop_all();
    assert_eq!(first.refcount(), 2);

    // after the drop the call re-executes into a fresh object
    let third = call("black", &[33.into(), 31.into()])
        .unwrap()
        .into_image()
        .unwrap();
    assert_ne!(third, first);

    // different arguments never share
    let other = call("black", &[33.into(), 30.into()])
        .unwrap()
        .into_image()
        .unwrap();
    assert_ne!(other, third);

    // in-place operations are never memoized
    let painted_once = first.draw_rect(&[9.0], 0, 0, 2, 2, true).unwrap();
    let painted_twice = first.draw_rect(&[9.0], 0, 0, 2, 2, true).unwrap();
    assert_ne!(painted_once, painted_twice);

    // a disabled cache memoizes nothing
    opix::cache_set_max(0);
    let fourth = call("black", &[33.into(), 31.into()])
        .unwrap()
        .into_image()
        .unwrap();
    let fifth = call("black", &[33.into(), 31.into()])
        .unwrap()
        .into_image()
        .unwrap();
    assert_ne!(fourth, fifth);
    opix::cache_set_max(100);

    // leak check: with wrappers gone and the cache dropped, everything
    // allocated above is destroyed
    let baseline = heap::alive();
    {
        let a = Image::black(29, 23).unwrap();
        let b = a.add(&a).unwrap();
        let c = b.linear(&[2.0], &[1.0]).unwrap();
        assert_eq!(c.getpoint(0, 0).unwrap(), vec![1.0]);
    }
    opix::cache_drop_all();
    assert_eq!(heap::alive(), baseline);
}
