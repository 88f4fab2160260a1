// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

//! End-to-end flows over the in-memory cluster: commit a transaction, read it back with a
//! snapshot scan, and keep a long transaction's primary lock alive.

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use tikv_txn_client::test_util::MockCluster;
use tikv_txn_client::test_util::RecordingRegionManager;
use tikv_txn_client::test_util::RpcKind;
use tikv_txn_client::Config;
use tikv_txn_client::Error;
use tikv_txn_client::Key;
use tikv_txn_client::KvPair;
use tikv_txn_client::Mutation;
use tikv_txn_client::Result;
use tikv_txn_client::TtlManager;
use tikv_txn_client::TwoPhaseCommitter;
use tikv_txn_client::TxnKvClient;
use tikv_txn_client::MANAGED_LOCK_TTL;

fn put(key: impl Into<Key>, value: &str) -> Mutation {
    Mutation::Put(key.into(), value.as_bytes().to_vec())
}

#[tokio::test(start_paused = true)]
async fn committed_writes_are_visible_to_later_snapshots() -> Result<()> {
    let cluster = Arc::new(MockCluster::with_split_keys(["k3", "k6"]));
    let client = cluster.txn_client(Config::default().with_scan_batch_size(2));

    let start_ts = client.get_timestamp().await?;
    let mutations = (0..9).map(|i| put(format!("k{i}"), &format!("v{i}")));
    let commit_ts = TwoPhaseCommitter::new(client.clone(), start_ts, mutations)
        .commit()
        .await?;
    assert!(commit_ts > start_ts);
    assert_eq!(cluster.lock_count(), 0);

    // A snapshot taken before the commit sees nothing.
    let before = client
        .scan(Key::EMPTY, Key::EMPTY, start_ts, false)
        .collect_all()
        .await?;
    assert!(before.is_empty());

    let after: Vec<KvPair> = client
        .scan("k2", "k7", commit_ts, false)
        .into_stream()
        .try_collect()
        .await?;
    let keys: Vec<Key> = after.iter().map(|p| p.key.clone()).collect();
    let expected: Vec<Key> = (2..7).map(|i| Key::from(format!("k{i}"))).collect();
    assert_eq!(keys, expected);
    assert_eq!(after[0].value, b"v2".to_vec());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn conflicting_transactions_commit_at_most_once() -> Result<()> {
    let cluster = Arc::new(MockCluster::single_region());
    let client = cluster.txn_client(Config::default());

    let first = TwoPhaseCommitter::new(
        client.clone(),
        client.get_timestamp().await?,
        vec![put("balance", "10")],
    );
    let second = TwoPhaseCommitter::new(
        client.clone(),
        client.get_timestamp().await?,
        vec![put("balance", "20")],
    );
    second.commit().await?;
    let err = first.commit().await.unwrap_err();
    assert!(err.is_write_conflict(), "{err:?}");
    assert_eq!(cluster.get("balance"), Some(b"20".to_vec()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn long_transaction_keeps_its_primary_lock_alive() -> Result<()> {
    let cluster = Arc::new(MockCluster::single_region());
    let config = Config::default();
    let regions = Arc::new(RecordingRegionManager::new(cluster.region_cache(&config)));
    let client = TxnKvClient::new(config, cluster.clone(), regions.clone(), cluster.clone());

    let start_ts = client.get_timestamp().await?;
    cluster.lock_key("primary", start_ts.version(), MANAGED_LOCK_TTL);
    let manager = TtlManager::new(client.clone(), start_ts.version(), "primary");
    assert!(manager.start());

    // A store hiccup in the middle of the transaction is retried within one tick.
    cluster.inject_errors_after(RpcKind::TxnHeartBeat, 2, 1, || {
        tonic::Status::unavailable("store restarting").into()
    });
    tokio::time::sleep(Duration::from_secs(60)).await;

    let ttls = cluster.heartbeat_ttls();
    assert_eq!(ttls.len(), 6, "{ttls:?}");
    assert!(ttls.windows(2).all(|w| w[0] <= w[1]), "{ttls:?}");
    assert_eq!(manager.consecutive_failures(), 0);
    assert_eq!(regions.invalidated_regions(), 1);
    assert!(manager.last_ttl() >= 55_000 + MANAGED_LOCK_TTL);

    assert!(manager.stop_and_wait().await?);
    let sent = cluster.rpc_count(RpcKind::TxnHeartBeat);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(cluster.rpc_count(RpcKind::TxnHeartBeat), sent);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unreachable_pd_fails_the_transaction_before_any_write() {
    let cluster = Arc::new(MockCluster::single_region());
    let client =
        cluster.txn_client(Config::default().with_tso_max_backoff(Duration::from_millis(500)));
    cluster.inject_errors(RpcKind::GetTimestamp, usize::MAX, || {
        tonic::Status::unavailable("no leader").into()
    });
    let err = client.get_timestamp().await.unwrap_err();
    assert!(matches!(err, Error::TimestampUnavailable(_)), "{err:?}");
    assert_eq!(cluster.rpc_count(RpcKind::Prewrite), 0);
}
