// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BENCHMARK SUITE - tessera-crypto
//
// Signer recovery runs once per block seal and once per flow sub-record,
// so it bounds flow report throughput.
//
// Run: cargo bench -p tessera-crypto
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tessera_crypto::{keccak256, recover_address, SecretKey};

fn bench_keccak(c: &mut Criterion) {
    let mut group = c.benchmark_group("crypto/keccak256");
    for size in [32, 256, 4096] {
        let data = vec![0xAB; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, d| {
            b.iter(|| black_box(keccak256(d)))
        });
    }
    group.finish();
}

fn bench_sign(c: &mut Criterion) {
    let key = SecretKey::from_bytes(&[42u8; 32]).unwrap();
    let digest = keccak256(b"bench");
    c.bench_function("crypto/sign_hash", |b| {
        b.iter(|| black_box(key.sign_hash(&digest).unwrap()))
    });
}

fn bench_recover(c: &mut Criterion) {
    let key = SecretKey::from_bytes(&[42u8; 32]).unwrap();
    let digest = keccak256(b"bench");
    let sig = key.sign_hash(&digest).unwrap();
    c.bench_function("crypto/recover_address", |b| {
        b.iter(|| black_box(recover_address(&digest, &sig).unwrap()))
    });
}

criterion_group!(benches, bench_keccak, bench_sign, bench_recover);
criterion_main!(benches);
