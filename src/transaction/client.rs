// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use log::debug;
use log::error;

use super::ClientRpcResult;
use crate::backoffer::Backoffer;
use crate::backoffer::BO_PD_RPC;
use crate::config::duration_ms;
use crate::iterator::ScanIterator;
use crate::iterator::SnapshotScanner;
use crate::pd::PdClient;
use crate::region::RegionStore;
use crate::region_cache::RegionCache;
use crate::region_cache::RegionManager;
use crate::stats::pd_stats;
use crate::stats::txn_stats;
use crate::store::CommitRequest;
use crate::store::KvClient;
use crate::store::PrewriteRequest;
use crate::store::TxnHeartBeatRequest;
use crate::Config;
use crate::Error;
use crate::Key;
use crate::Mutation;
use crate::Result;
use crate::Timestamp;

/// The transactional client: fetches timestamps and sends the legs of two-phase commit.
///
/// Every leg targets exactly the region and store it is given and issues one RPC. Failures
/// are classified into a [`ClientRpcResult`]; the caller owns the retry loop.
///
/// Cloning is cheap; clones share the PD client, location resolver and RPC gateway.
#[derive(Clone)]
pub struct TxnKvClient {
    config: Config,
    pd: Arc<dyn PdClient>,
    region_manager: Arc<dyn RegionManager>,
    kv_client: Arc<dyn KvClient>,
}

impl TxnKvClient {
    pub fn new(
        config: Config,
        pd: Arc<dyn PdClient>,
        region_manager: Arc<dyn RegionManager>,
        kv_client: Arc<dyn KvClient>,
    ) -> TxnKvClient {
        TxnKvClient {
            config,
            pd,
            region_manager,
            kv_client,
        }
    }

    /// Create a client resolving locations through a [`RegionCache`] in front of `pd`.
    pub fn with_region_cache<PdC: PdClient>(
        config: Config,
        pd: Arc<PdC>,
        kv_client: Arc<dyn KvClient>,
    ) -> TxnKvClient {
        let region_manager = Arc::new(RegionCache::new(pd.clone(), &config));
        TxnKvClient::new(config, pd, region_manager, kv_client)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn region_manager(&self) -> &Arc<dyn RegionManager> {
        &self.region_manager
    }

    pub fn kv_client(&self) -> &Arc<dyn KvClient> {
        &self.kv_client
    }

    /// Fetch a fresh timestamp from PD, backing off on failures.
    ///
    /// Returns [`Error::TimestampUnavailable`] once the TSO backoff budget is spent. A zero
    /// version is never returned.
    pub async fn get_timestamp(&self) -> Result<Timestamp> {
        let mut bo = Backoffer::new(duration_ms(self.config.tso_max_backoff));
        loop {
            let res = pd_stats("get_timestamp")
                .done(self.pd.get_timestamp().await)
                .and_then(|ts| {
                    if ts.is_valid() {
                        Ok(ts)
                    } else {
                        Err(Error::StringError("PD returned a zero timestamp".to_owned()))
                    }
                });
            let err = match res {
                Ok(ts) => return Ok(ts),
                Err(e) => e,
            };
            if let Err(bo_err) = bo.backoff(&BO_PD_RPC, err.to_string()).await {
                error!("Get tso from pd failed: {}, last error: {}", bo_err, err);
                return Err(Error::TimestampUnavailable(Box::new(err)));
            }
        }
    }

    pub async fn prewrite(
        &self,
        bo: &mut Backoffer,
        mutations: Vec<Mutation>,
        primary: Key,
        lock_ttl: u64,
        start_ts: u64,
        target: &RegionStore,
    ) -> ClientRpcResult {
        let req = PrewriteRequest::new(primary, mutations, start_ts, lock_ttl);
        let stats = txn_stats(req.label());
        let result = ClientRpcResult::from_result(self.kv_client.prewrite(bo, target, req).await);
        stats.done_rpc(result.class());
        result
    }

    pub async fn commit(
        &self,
        bo: &mut Backoffer,
        keys: Vec<Key>,
        start_ts: u64,
        commit_ts: u64,
        target: &RegionStore,
    ) -> ClientRpcResult {
        let req = CommitRequest::new(keys, start_ts, commit_ts);
        let stats = txn_stats(req.label());
        let result = ClientRpcResult::from_result(self.kv_client.commit(bo, target, req).await);
        stats.done_rpc(result.class());
        result
    }

    /// Ask the store holding the primary lock to extend its TTL to `ttl` milliseconds.
    pub async fn txn_heartbeat(
        &self,
        bo: &mut Backoffer,
        primary: Key,
        start_ts: u64,
        ttl: u64,
        target: &RegionStore,
    ) -> ClientRpcResult {
        let req = TxnHeartBeatRequest::new(primary, start_ts, ttl);
        let stats = txn_stats(req.label());
        let res = self.kv_client.txn_heartbeat(bo, target, req).await;
        if let Ok(lock_ttl) = &res {
            debug!("txn heartbeat on region {} settled ttl={}", target.region.id, lock_ttl);
        }
        let result = ClientRpcResult::from_result(res);
        stats.done_rpc(result.class());
        result
    }

    /// Scan `[start, end)` at `version`; an empty `end` scans to the end of the key space.
    pub fn scan(
        &self,
        start: impl Into<Key>,
        end: impl Into<Key>,
        version: Timestamp,
        key_only: bool,
    ) -> ScanIterator<SnapshotScanner> {
        let end = end.into();
        let scanner = SnapshotScanner::new(self.clone(), end.clone(), version.version(), key_only);
        ScanIterator::new(scanner, start.into(), end, self.config.scan_batch_size)
    }
}
