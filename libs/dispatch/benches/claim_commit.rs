//! Claim/commit/poll throughput on a single producer and subscription.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use dispatch::{Dispatcher, DispatcherConfig, Fragment};

fn claim_commit_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher");

    for payload_len in [16usize, 128, 1024] {
        let dispatcher = Dispatcher::new(DispatcherConfig::new("bench", 4 * 1024 * 1024)).unwrap();
        let mut subscription = dispatcher.open_subscription("bench-reader");
        let payload = vec![0x5Au8; payload_len];

        group.throughput(Throughput::Bytes(payload_len as u64));
        group.bench_function(format!("publish_poll_{payload_len}b"), |b| {
            b.iter(|| {
                dispatcher.publish(black_box(&payload), 1).unwrap();
                subscription.poll(
                    &mut |fragment: Fragment<'_>| {
                        black_box(fragment.payload);
                    },
                    1,
                );
            })
        });
    }

    group.finish();
}

criterion_group!(benches, claim_commit_poll);
criterion_main!(benches);
