use std::sync::Arc;

use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;
use tikv_txn_client::test_util::MockCluster;
use tikv_txn_client::Config;
use tikv_txn_client::Key;

fn seeded_cluster() -> Arc<MockCluster> {
    let cluster = Arc::new(MockCluster::with_split_keys([
        vec![64_u8],
        vec![128_u8],
        vec![192_u8],
    ]));
    for i in 0..=255_u8 {
        for j in 0..8_u8 {
            cluster.put(vec![i, j], vec![i ^ j; 16]);
        }
    }
    cluster
}

fn bench_scan_4regions(c: &mut Criterion) {
    let cluster = seeded_cluster();
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let client = cluster.txn_client(Config::default().with_scan_batch_size(128));
    let version = rt
        .block_on(client.get_timestamp())
        .expect("timestamp from mock cluster");

    c.bench_function("scan/full_4regions_batch128", |b| {
        b.iter(|| {
            let pairs = rt
                .block_on(
                    client
                        .scan(Key::EMPTY, Key::EMPTY, version, false)
                        .collect_all(),
                )
                .expect("scan");
            black_box(pairs.len())
        })
    });

    c.bench_function("scan/bounded_key_only", |b| {
        b.iter(|| {
            let pairs = rt
                .block_on(
                    client
                        .scan(vec![60_u8], vec![70_u8], version, true)
                        .collect_all(),
                )
                .expect("scan");
            black_box(pairs.len())
        })
    });
}

criterion_group!(benches, bench_scan_4regions);
criterion_main!(benches);
