//! Dispatch overhead benchmarks.
//!
//! Measures the cost of the generic call path against direct engine
//! access: schema resolution, binding, memoized and unmemoized execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use opix::{call, call_full, get_schema, Image, Value};

fn bench_schema_lookup(c: &mut Criterion) {
    // warm the cache, then measure the cached path
    get_schema("linear").unwrap();
    c.bench_function("schema_cached", |b| {
        b.iter(|| get_schema(black_box("linear")).unwrap())
    });
}

fn bench_memoized_call(c: &mut Criterion) {
    call("black", &[64.into(), 64.into()]).unwrap();
    c.bench_function("call_memoized", |b| {
        b.iter(|| call(black_box("black"), &[64.into(), 64.into()]).unwrap())
    });
}

fn bench_unmemoized_call(c: &mut Criterion) {
    let image = Image::black(64, 64).unwrap();
    let mut offset = 0f64;
    c.bench_function("call_linear_fresh", |b| {
        b.iter(|| {
            // a fresh offset each round defeats the memo cache
            offset += 1.0;
            call_full(
                "linear",
                &[Value::Image(image.clone())],
                &[("b", vec![offset].into())],
                "",
            )
            .unwrap()
        })
    });
}

fn bench_binding_only(c: &mut Criterion) {
    let image = Image::black(8, 8).unwrap();
    c.bench_function("getpoint", |b| {
        b.iter(|| black_box(&image).getpoint(4, 4).unwrap())
    });
}

criterion_group!(
    benches,
    bench_schema_lookup,
    bench_memoized_call,
    bench_unmemoized_call,
    bench_binding_only
);
criterion_main!(benches);
