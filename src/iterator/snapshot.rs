// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use async_trait::async_trait;
use derive_new::new;
use log::debug;

use super::RegionScanner;
use super::ScanBatch;
use crate::backoffer::Backoffer;
use crate::backoffer::BO_REGION_MISS;
use crate::backoffer::BO_TIKV_RPC;
use crate::config::duration_ms;
use crate::stats::txn_stats;
use crate::store::ScanRequest;
use crate::Error;
use crate::Key;
use crate::Result;
use crate::TxnKvClient;

/// Reads batches of a snapshot at `version` through the transactional client.
///
/// Each batch is read from the region containing its start key, never past that region's
/// end or the scan's end. Stale regions and unavailable stores are retried within the
/// scanner backoff budget.
#[derive(new, Clone)]
pub struct SnapshotScanner {
    client: TxnKvClient,
    /// Exclusive; empty means unbounded.
    end_key: Key,
    version: u64,
    key_only: bool,
}

impl SnapshotScanner {
    fn request_end_key(&self, region_end: &Key) -> Key {
        if region_end.is_empty() {
            self.end_key.clone()
        } else if self.end_key.is_empty() || region_end < &self.end_key {
            region_end.clone()
        } else {
            self.end_key.clone()
        }
    }
}

#[async_trait]
impl RegionScanner for SnapshotScanner {
    async fn load_current_region(&mut self, start_key: &Key, limit: u32) -> Result<ScanBatch> {
        let mut bo = Backoffer::new(duration_ms(self.client.config().scanner_max_backoff));
        let region_manager = self.client.region_manager().clone();
        loop {
            let target = region_manager.region_store_for_key(start_key).await?;
            if !self.end_key.is_empty() && start_key >= &self.end_key {
                return Ok(ScanBatch::new(target.region, None));
            }

            let req = ScanRequest::new(
                start_key.clone(),
                self.request_end_key(&target.region.end_key),
                limit,
                self.key_only,
                self.version,
            );
            let stats = txn_stats(req.label());
            let err = match self.client.kv_client().scan(&mut bo, &target, req).await {
                Ok(pairs) => {
                    stats.done_rpc(None);
                    return Ok(ScanBatch::new(target.region, Some(pairs)));
                }
                Err(e) => e,
            };
            match err {
                Error::RegionError(_) => {
                    stats.done_rpc(Some("retryable"));
                    debug!("scan of region {} hit {}", target.region.id, err);
                    bo.backoff(&BO_REGION_MISS, err.to_string()).await?;
                    region_manager.invalidate_region(&target.region).await;
                }
                Error::GrpcAPI(_) => {
                    stats.done_rpc(Some("retryable"));
                    debug!("scan of store {} hit {}", target.store.id, err);
                    bo.backoff(&BO_TIKV_RPC, err.to_string()).await?;
                    region_manager.invalidate_store(target.store.id).await;
                    region_manager.invalidate_region(&target.region).await;
                }
                _ => {
                    stats.done_rpc(Some("fatal"));
                    return Err(err);
                }
            }
        }
    }
}
