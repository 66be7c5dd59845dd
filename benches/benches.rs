use criterion::{black_box, criterion_group, criterion_main, Criterion};
use duo_slurper::{capture::ChannelStats, exfil::interleave, MAX_BLOCK_SAMPLES};
use rand::prelude::*;

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    let mut i = vec![0i16; MAX_BLOCK_SAMPLES];
    let mut q = vec![0i16; MAX_BLOCK_SAMPLES];
    rng.fill(&mut i[..]);
    rng.fill(&mut q[..]);

    // Containers
    let mut frame = vec![0i16; 2 * MAX_BLOCK_SAMPLES];

    c.bench_function("interleave", |b| {
        b.iter(|| interleave(black_box(&i), black_box(&q), black_box(&mut frame)))
    });

    c.bench_function("minmax scan", |b| {
        b.iter(|| {
            let mut stats = ChannelStats::default();
            stats.update(black_box(&i), black_box(&q));
            stats
        })
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
