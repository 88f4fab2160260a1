// Copyright 2020 TiKV Project Authors. Licensed under Apache-2.0.

use async_trait::async_trait;

use super::CommitRequest;
use super::PrewriteRequest;
use super::ScanRequest;
use super::TxnHeartBeatRequest;
use crate::backoffer::Backoffer;
use crate::region::RegionStore;
use crate::KvPair;
use crate::Result;

/// The RPC gateway: sends one transactional request to the store serving a region.
///
/// Each call targets exactly the `RegionStore` it is given. A stale region or a wrong leader
/// is reported as [`Error::RegionError`](crate::Error::RegionError), key-level failures as
/// the key error variants, and transport failures as `GrpcAPI`/`Grpc`/`Io`. The backoffer is
/// lent to implementations that need to wait inside a call (e.g. for a conflicting lock).
#[async_trait]
pub trait KvClient: Send + Sync + 'static {
    async fn prewrite(
        &self,
        bo: &mut Backoffer,
        target: &RegionStore,
        req: PrewriteRequest,
    ) -> Result<()>;

    async fn commit(&self, bo: &mut Backoffer, target: &RegionStore, req: CommitRequest)
        -> Result<()>;

    /// Returns the lock TTL the store settled on.
    async fn txn_heartbeat(
        &self,
        bo: &mut Backoffer,
        target: &RegionStore,
        req: TxnHeartBeatRequest,
    ) -> Result<u64>;

    /// Pairs in `[start_key, end_key)` of the target region, ascending, at most `limit` of them.
    async fn scan(
        &self,
        bo: &mut Backoffer,
        target: &RegionStore,
        req: ScanRequest,
    ) -> Result<Vec<KvPair>>;
}
