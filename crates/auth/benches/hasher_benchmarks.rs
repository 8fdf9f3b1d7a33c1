use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use authcore_auth::{Hasher, Pbkdf2Hasher, Pbkdf2Options, effective_permissions, has_all};
use authcore_auth::{PermissionMask, RoleMask};

fn hasher(iterations: u32) -> Pbkdf2Hasher {
    Pbkdf2Hasher::new(Pbkdf2Options {
        iterations,
        ..Pbkdf2Options::default()
    })
}

fn bench_hash_by_iterations(c: &mut Criterion) {
    let mut group = c.benchmark_group("pbkdf2_hash");
    group.sample_size(20);

    for iterations in [1_000u32, 10_000, 120_000] {
        let h = hasher(iterations);
        group.bench_with_input(BenchmarkId::new("hash", iterations), &h, |b, h| {
            b.iter(|| h.hash(black_box("p@ss1234")))
        });
    }

    group.finish();
}

fn bench_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("pbkdf2_verify");
    group.sample_size(20);

    let h = hasher(10_000);
    let Ok(encoded) = h.hash("p@ss1234") else {
        return;
    };

    group.bench_function("match", |b| {
        b.iter(|| h.verify(black_box("p@ss1234"), black_box(&encoded)))
    });
    group.bench_function("mismatch", |b| {
        b.iter(|| h.verify(black_box("wrong"), black_box(&encoded)))
    });
    group.bench_function("malformed", |b| {
        b.iter(|| h.verify(black_box("p@ss1234"), black_box("pbkdf2$sha256$x$y")))
    });

    group.finish();
}

fn bench_mask_checks(c: &mut Criterion) {
    c.bench_function("effective_permissions_all_roles", |b| {
        b.iter(|| {
            let eff = effective_permissions(black_box(RoleMask::from_bits(0b1111)), PermissionMask::NONE);
            has_all(eff, black_box(PermissionMask::ADMIN))
        })
    });
}

criterion_group!(benches, bench_hash_by_iterations, bench_verify, bench_mask_checks);
criterion_main!(benches);
