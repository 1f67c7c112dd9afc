use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::hash::Hasher;
use std::io::Cursor;

use chin::crypto::{self, stream};

fn bench_hashing(c: &mut Criterion) {
    let data = vec![0x42u8; 1024 * 1024];

    c.bench_function("blake3_1mb", |b| b.iter(|| blake3::hash(black_box(&data))));

    c.bench_function("xxh64_1mb", |b| {
        b.iter(|| {
            let mut hasher = twox_hash::XxHash64::with_seed(0);
            hasher.write(black_box(&data));
            hasher.finish()
        })
    });
}

fn bench_stream_crypto(c: &mut Criterion) {
    let data = vec![0x42u8; 1024 * 1024];
    // PBKDF2 is deliberately slow; run it once outside the measured loop.
    let master = crypto::derive_master_key(b"bench password", &[7u8; 16]);

    c.bench_function("encrypt_stream_1mb", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(data.len() + 4096);
            stream::encrypt_stream(Cursor::new(black_box(&data[..])), &mut out, &master).unwrap();
            out
        })
    });

    let mut stored = Vec::new();
    stream::encrypt_stream(Cursor::new(&data[..]), &mut stored, &master).unwrap();
    c.bench_function("decrypt_stream_1mb", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(data.len());
            stream::decrypt_stream(
                Cursor::new(black_box(&stored[..])),
                &mut out,
                &master,
                data.len() as u64,
            )
            .unwrap();
            out
        })
    });

    c.bench_function("derive_stream_key", |b| {
        b.iter(|| crypto::derive_stream_key(black_box(&master), &[9u8; 16]).unwrap())
    });
}

criterion_group!(benches, bench_hashing, bench_stream_crypto);
criterion_main!(benches);
