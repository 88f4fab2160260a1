// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;

use crate::region::Region;
use crate::region::RegionStore;
use crate::region::StoreId;
use crate::region_cache::RegionManager;
use crate::Key;
use crate::Result;

/// Wraps a [`RegionManager`] and counts the invalidations passing through it.
pub struct RecordingRegionManager {
    inner: Arc<dyn RegionManager>,
    invalidated_regions: AtomicUsize,
    invalidated_stores: AtomicUsize,
}

impl RecordingRegionManager {
    pub fn new<R: RegionManager>(inner: R) -> RecordingRegionManager {
        RecordingRegionManager {
            inner: Arc::new(inner),
            invalidated_regions: AtomicUsize::new(0),
            invalidated_stores: AtomicUsize::new(0),
        }
    }

    pub fn invalidated_regions(&self) -> usize {
        self.invalidated_regions.load(Ordering::SeqCst)
    }

    pub fn invalidated_stores(&self) -> usize {
        self.invalidated_stores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegionManager for RecordingRegionManager {
    async fn region_store_for_key(&self, key: &Key) -> Result<RegionStore> {
        self.inner.region_store_for_key(key).await
    }

    async fn invalidate_region(&self, region: &Region) {
        self.invalidated_regions.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate_region(region).await
    }

    async fn invalidate_store(&self, store_id: StoreId) {
        self.invalidated_stores.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate_store(store_id).await
    }
}
