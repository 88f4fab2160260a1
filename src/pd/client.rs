// Copyright 2018 TiKV Project Authors. Licensed under Apache-2.0.

use async_trait::async_trait;

use crate::region::Region;
use crate::region::Store;
use crate::region::StoreId;
use crate::Key;
use crate::Result;
use crate::Timestamp;

/// The placement driver: the authority for timestamps and for region/store placement.
///
/// Implementations perform a single request per call. Retrying is the caller's job; a
/// transient failure is reported as an `Err` the caller may back off on.
#[async_trait]
pub trait PdClient: Send + Sync + 'static {
    /// Fetch a fresh timestamp from the timestamp oracle.
    async fn get_timestamp(&self) -> Result<Timestamp>;

    /// The region containing `key` (keys in raw format).
    async fn region_for_key(&self, key: &Key) -> Result<Region>;

    async fn store_for_id(&self, id: StoreId) -> Result<Store>;
}
