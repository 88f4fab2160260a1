// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

//! In-memory stand-ins for PD and TiKV.
//!
//! [`MockCluster`] plays both the placement driver and the RPC gateway over a single
//! multi-version key space split into regions. It checks region epochs the way TiKV does, so
//! a client with a stale region cache sees `EpochNotMatch`, and it records every RPC so tests
//! can count them. Errors can be injected per RPC kind.

mod region_manager;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

pub use self::region_manager::RecordingRegionManager;
use crate::backoffer::Backoffer;
use crate::pd::PdClient;
use crate::region::Region;
use crate::region::RegionStore;
use crate::region::Store;
use crate::region::StoreId;
use crate::region_cache::RegionCache;
use crate::store::CommitRequest;
use crate::store::KvClient;
use crate::store::PrewriteRequest;
use crate::store::ScanRequest;
use crate::store::TxnHeartBeatRequest;
use crate::Config;
use crate::Error;
use crate::Key;
use crate::KvPair;
use crate::Mutation;
use crate::RegionError;
use crate::Result;
use crate::Timestamp;
use crate::TxnKvClient;
use crate::Value;
use crate::WriteConflictError;

const BASE_PHYSICAL_MS: i64 = 1_700_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RpcKind {
    GetTimestamp,
    RegionForKey,
    StoreForId,
    Prewrite,
    Commit,
    TxnHeartBeat,
    Scan,
}

type ErrorFactory = Arc<dyn Fn() -> Error + Send + Sync>;

/// Fails calls `[from, until)` of one RPC kind, counted from the cluster's creation.
struct Injection {
    from: usize,
    until: usize,
    make: ErrorFactory,
}

#[derive(Clone, Debug)]
struct MockLock {
    primary: Key,
    start_ts: u64,
    ttl: u64,
    mutation: Mutation,
}

#[derive(Clone, Debug)]
struct MockWrite {
    commit_ts: u64,
    /// `None` for a delete.
    value: Option<Value>,
}

pub struct MockCluster {
    epoch: Instant,
    logical: AtomicI64,
    regions: Mutex<Vec<Region>>,
    next_region_id: Mutex<u64>,
    /// Newest write first.
    data: Mutex<BTreeMap<Key, Vec<MockWrite>>>,
    locks: Mutex<BTreeMap<Key, MockLock>>,
    injections: Mutex<HashMap<RpcKind, Vec<Injection>>>,
    calls: Mutex<HashMap<RpcKind, usize>>,
    heartbeat_ttls: Mutex<Vec<u64>>,
    scan_requests: Mutex<Vec<ScanRequest>>,
    scan_overflow: AtomicBool,
    tso_delay: Mutex<Duration>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn store_of(region_id: u64) -> StoreId {
    region_id % 3 + 1
}

impl MockCluster {
    /// A cluster whose regions are exactly `regions`, which must tile the key space.
    pub fn new(regions: Vec<Region>) -> MockCluster {
        let next_region_id = regions.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        MockCluster {
            epoch: Instant::now(),
            logical: AtomicI64::new(0),
            regions: Mutex::new(regions),
            next_region_id: Mutex::new(next_region_id),
            data: Mutex::new(BTreeMap::new()),
            locks: Mutex::new(BTreeMap::new()),
            injections: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            heartbeat_ttls: Mutex::new(Vec::new()),
            scan_requests: Mutex::new(Vec::new()),
            scan_overflow: AtomicBool::new(false),
            tso_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn single_region() -> MockCluster {
        MockCluster::new(vec![Region::new(1, Key::EMPTY, Key::EMPTY, 1, 1, store_of(1))])
    }

    /// Regions bounded by the sorted `split_keys`, with ids from 1 in key order.
    pub fn with_split_keys<K: Into<Key>>(split_keys: impl IntoIterator<Item = K>) -> MockCluster {
        let mut bounds: Vec<Key> = split_keys.into_iter().map(Into::into).collect();
        bounds.sort();
        bounds.dedup();
        let mut regions = Vec::with_capacity(bounds.len() + 1);
        let mut start = Key::EMPTY;
        for (i, end) in bounds.into_iter().chain([Key::EMPTY]).enumerate() {
            let id = i as u64 + 1;
            regions.push(Region::new(id, start, end.clone(), 1, 1, store_of(id)));
            start = end;
        }
        MockCluster::new(regions)
    }

    /// A location resolver over this cluster, as a client would build it.
    pub fn region_cache(self: &Arc<Self>, config: &Config) -> RegionCache<MockCluster> {
        RegionCache::new(self.clone(), config)
    }

    pub fn txn_client(self: &Arc<Self>, config: Config) -> TxnKvClient {
        TxnKvClient::with_region_cache(config, self.clone(), self.clone())
    }

    /// Split the region containing `key` at `key`. The left half keeps the region id; both
    /// halves get a newer version.
    pub fn split(&self, key: impl Into<Key>) {
        let key = key.into();
        let mut regions = lock(&self.regions);
        let Some(pos) = regions.iter().position(|r| r.contains(&key)) else {
            return;
        };
        if regions[pos].start_key == key {
            return;
        }
        let mut next_id = lock(&self.next_region_id);
        let old = regions[pos].clone();
        let version = old.version + 1;
        let right_id = *next_id;
        *next_id += 1;
        regions[pos] = Region::new(
            old.id,
            old.start_key.clone(),
            key.clone(),
            old.conf_ver,
            version,
            old.leader_store_id,
        );
        regions.insert(
            pos + 1,
            Region::new(right_id, key, old.end_key, old.conf_ver, version, store_of(right_id)),
        );
    }

    pub fn regions(&self) -> Vec<Region> {
        lock(&self.regions).clone()
    }

    /// Write `key` directly, committed at a fresh timestamp.
    pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) {
        let commit_ts = self.next_timestamp().version();
        lock(&self.data).entry(key.into()).or_default().insert(
            0,
            MockWrite {
                commit_ts,
                value: Some(value.into()),
            },
        );
    }

    /// The newest committed value of `key`.
    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        lock(&self.data)
            .get(&key.into())
            .and_then(|writes| writes.first())
            .and_then(|w| w.value.clone())
    }

    /// Leave a prewritten lock on `key` as the primary of txn `start_ts`.
    pub fn lock_key(&self, key: impl Into<Key>, start_ts: u64, ttl: u64) {
        let key = key.into();
        lock(&self.locks).insert(
            key.clone(),
            MockLock {
                primary: key.clone(),
                start_ts,
                ttl,
                mutation: Mutation::Put(key, Vec::new()),
            },
        );
    }

    pub fn lock_count(&self) -> usize {
        lock(&self.locks).len()
    }

    /// Fail the next `count` calls of `kind` with errors built by `make`.
    pub fn inject_errors(
        &self,
        kind: RpcKind,
        count: usize,
        make: impl Fn() -> Error + Send + Sync + 'static,
    ) {
        self.inject_errors_after(kind, 0, count, make);
    }

    /// Let `skip` calls of `kind` through, then fail the following `count`.
    pub fn inject_errors_after(
        &self,
        kind: RpcKind,
        skip: usize,
        count: usize,
        make: impl Fn() -> Error + Send + Sync + 'static,
    ) {
        let from = self.rpc_count(kind).saturating_add(skip);
        lock(&self.injections).entry(kind).or_default().push(Injection {
            from,
            until: from.saturating_add(count),
            make: Arc::new(make),
        });
    }

    pub fn rpc_count(&self, kind: RpcKind) -> usize {
        lock(&self.calls).get(&kind).copied().unwrap_or(0)
    }

    /// TTLs asked for by every heartbeat received, in arrival order.
    pub fn heartbeat_ttls(&self) -> Vec<u64> {
        lock(&self.heartbeat_ttls).clone()
    }

    pub fn scan_requests(&self) -> Vec<ScanRequest> {
        lock(&self.scan_requests).clone()
    }

    /// Make scans answer with one pair more than asked for.
    pub fn set_scan_overflow(&self, overflow: bool) {
        self.scan_overflow.store(overflow, Ordering::SeqCst);
    }

    /// Delay every timestamp request.
    pub fn set_tso_delay(&self, delay: Duration) {
        *lock(&self.tso_delay) = delay;
    }

    /// Count the call and return the injected error for it, if any.
    fn enter(&self, kind: RpcKind) -> Result<()> {
        let n = {
            let mut calls = lock(&self.calls);
            let count = calls.entry(kind).or_default();
            *count += 1;
            *count - 1
        };
        let injections = lock(&self.injections);
        match injections
            .get(&kind)
            .and_then(|rules| rules.iter().find(|r| r.from <= n && n < r.until))
        {
            Some(rule) => Err((rule.make)()),
            None => Ok(()),
        }
    }

    fn next_timestamp(&self) -> Timestamp {
        let physical = BASE_PHYSICAL_MS + self.epoch.elapsed().as_millis() as i64;
        let logical = self.logical.fetch_add(1, Ordering::SeqCst);
        Timestamp::new(physical, logical)
    }

    /// The epoch and range check TiKV runs before serving a request.
    fn check_region<'a>(
        &self,
        target: &RegionStore,
        keys: impl IntoIterator<Item = &'a Key>,
    ) -> Result<()> {
        let regions = lock(&self.regions);
        let region_id = target.region.id;
        let Some(current) = regions.iter().find(|r| r.id == region_id) else {
            return Err(RegionError::RegionNotFound { region_id }.into());
        };
        if current.ver_id() != target.region.ver_id() {
            return Err(RegionError::EpochNotMatch { region_id }.into());
        }
        if target.store.id != current.leader_store_id {
            return Err(RegionError::NotLeader {
                region_id,
                leader: Some(current.leader_store_id),
            }
            .into());
        }
        for key in keys {
            if !current.contains(key) {
                return Err(RegionError::KeyNotInRegion {
                    region_id,
                    key: key.clone(),
                }
                .into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PdClient for MockCluster {
    async fn get_timestamp(&self) -> Result<Timestamp> {
        let delay = *lock(&self.tso_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.enter(RpcKind::GetTimestamp)?;
        Ok(self.next_timestamp())
    }

    async fn region_for_key(&self, key: &Key) -> Result<Region> {
        self.enter(RpcKind::RegionForKey)?;
        lock(&self.regions)
            .iter()
            .find(|r| r.contains(key))
            .cloned()
            .ok_or_else(|| Error::RegionForKeyNotFound { key: key.clone() })
    }

    async fn store_for_id(&self, id: StoreId) -> Result<Store> {
        self.enter(RpcKind::StoreForId)?;
        Ok(Store::new(id, format!("mock://store-{id}")))
    }
}

#[async_trait]
impl KvClient for MockCluster {
    async fn prewrite(
        &self,
        _bo: &mut Backoffer,
        target: &RegionStore,
        req: PrewriteRequest,
    ) -> Result<()> {
        self.enter(RpcKind::Prewrite)?;
        self.check_region(target, req.mutations.iter().map(Mutation::key))?;

        let data = lock(&self.data);
        let mut locks = lock(&self.locks);
        for mutation in &req.mutations {
            let key = mutation.key();
            if let Some(existing) = locks.get(key) {
                if existing.start_ts != req.start_version {
                    return Err(Error::KeyError {
                        message: format!("key {key:?} is locked by txn {}", existing.start_ts),
                    });
                }
            }
            if let Some(newest) = data.get(key).and_then(|writes| writes.first()) {
                if newest.commit_ts >= req.start_version {
                    return Err(WriteConflictError {
                        start_ts: req.start_version,
                        conflict_ts: newest.commit_ts,
                        conflict_commit_ts: newest.commit_ts,
                        key: key.clone(),
                        primary: req.primary_lock.clone(),
                    }
                    .into());
                }
            }
        }
        for mutation in req.mutations {
            locks.insert(
                mutation.key().clone(),
                MockLock {
                    primary: req.primary_lock.clone(),
                    start_ts: req.start_version,
                    ttl: req.lock_ttl,
                    mutation,
                },
            );
        }
        Ok(())
    }

    async fn commit(
        &self,
        _bo: &mut Backoffer,
        target: &RegionStore,
        req: CommitRequest,
    ) -> Result<()> {
        self.enter(RpcKind::Commit)?;
        self.check_region(target, &req.keys)?;

        let mut data = lock(&self.data);
        let mut locks = lock(&self.locks);
        for key in &req.keys {
            match locks.get(key) {
                Some(lock) if lock.start_ts == req.start_version => {}
                _ => {
                    let committed = data
                        .get(key)
                        .is_some_and(|w| w.iter().any(|w| w.commit_ts == req.commit_version));
                    if !committed {
                        return Err(Error::TxnNotFound {
                            start_ts: req.start_version,
                        });
                    }
                }
            }
        }
        for key in req.keys {
            let Some(lock) = locks.remove(&key) else {
                continue;
            };
            let value = match lock.mutation {
                Mutation::Put(_, value) => Some(value),
                Mutation::Delete(_) => None,
            };
            data.entry(key).or_default().insert(
                0,
                MockWrite {
                    commit_ts: req.commit_version,
                    value,
                },
            );
        }
        Ok(())
    }

    async fn txn_heartbeat(
        &self,
        _bo: &mut Backoffer,
        target: &RegionStore,
        req: TxnHeartBeatRequest,
    ) -> Result<u64> {
        self.enter(RpcKind::TxnHeartBeat)?;
        lock(&self.heartbeat_ttls).push(req.advise_lock_ttl);
        self.check_region(target, [&req.primary_lock])?;

        let mut locks = lock(&self.locks);
        match locks.get_mut(&req.primary_lock) {
            Some(lock) if lock.start_ts == req.start_version && lock.primary == req.primary_lock => {
                lock.ttl = lock.ttl.max(req.advise_lock_ttl);
                Ok(lock.ttl)
            }
            _ => Err(Error::TxnNotFound {
                start_ts: req.start_version,
            }),
        }
    }

    async fn scan(
        &self,
        _bo: &mut Backoffer,
        target: &RegionStore,
        req: ScanRequest,
    ) -> Result<Vec<KvPair>> {
        self.enter(RpcKind::Scan)?;
        lock(&self.scan_requests).push(req.clone());
        self.check_region(target, [&req.start_key])?;
        if !target.region.end_key.is_empty()
            && (req.end_key.is_empty() || req.end_key > target.region.end_key)
        {
            return Err(RegionError::KeyNotInRegion {
                region_id: target.region.id,
                key: req.end_key.clone(),
            }
            .into());
        }

        let limit = if self.scan_overflow.load(Ordering::SeqCst) {
            req.limit as usize + 1
        } else {
            req.limit as usize
        };
        let data = lock(&self.data);
        let pairs = data
            .range(req.start_key.clone()..)
            .take_while(|(key, _)| req.end_key.is_empty() || *key < &req.end_key)
            .filter_map(|(key, writes)| {
                let visible = writes.iter().find(|w| w.commit_ts <= req.version)?;
                let value = visible.value.as_ref()?;
                let value = if req.key_only {
                    Vec::new()
                } else {
                    value.clone()
                };
                Some(KvPair::new(key.clone(), value))
            })
            .take(limit)
            .collect();
        Ok(pairs)
    }
}
