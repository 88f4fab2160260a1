// Copyright 2021 TiKV Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use rand::Rng;
use tokio::sync::RwLock;

use crate::pd::PdClient;
use crate::region::Region;
use crate::region::RegionId;
use crate::region::RegionStore;
use crate::region::RegionVerId;
use crate::region::Store;
use crate::region::StoreId;
use crate::Config;
use crate::Key;
use crate::Result;

/// The location resolver: maps keys to the region and store serving them.
///
/// Resolution may be served from a cache. Invalidation drops what the caller learned to be
/// stale, so the next resolution reads through to the placement driver.
#[async_trait]
pub trait RegionManager: Send + Sync + 'static {
    async fn region_store_for_key(&self, key: &Key) -> Result<RegionStore>;

    async fn invalidate_region(&self, region: &Region);

    async fn invalidate_store(&self, store_id: StoreId);
}

/// The cached region entry along with its expiration timestamp.
///
/// `ttl_epoch_sec` is an epoch timestamp in seconds. It is pushed forward on access so hot
/// regions stay cached.
struct CachedRegion {
    region: Region,
    ttl_epoch_sec: AtomicI64,
}

impl CachedRegion {
    fn new(region: Region, ttl_epoch_sec: i64) -> CachedRegion {
        CachedRegion {
            region,
            ttl_epoch_sec: AtomicI64::new(ttl_epoch_sec),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct RegionCacheTtl {
    base_sec: i64,
    jitter_sec: i64,
}

impl RegionCacheTtl {
    fn new(base: Duration, jitter: Duration) -> RegionCacheTtl {
        RegionCacheTtl {
            base_sec: i64::try_from(base.as_secs()).unwrap_or(i64::MAX),
            jitter_sec: i64::try_from(jitter.as_secs()).unwrap_or(i64::MAX),
        }
    }

    fn is_enabled(&self) -> bool {
        self.base_sec > 0
    }

    fn next_ttl(self, now_epoch_sec: i64) -> i64 {
        if !self.is_enabled() {
            return i64::MAX;
        }
        let jitter = if self.jitter_sec > 0 {
            rand::thread_rng().gen_range(0..self.jitter_sec)
        } else {
            0
        };
        now_epoch_sec
            .saturating_add(self.base_sec)
            .saturating_add(jitter)
    }

    /// Returns `true` if the entry is still alive, refreshing it when it is within its last
    /// base window.
    fn check_and_refresh(self, ttl_epoch_sec: &AtomicI64, now_epoch_sec: i64) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let mut new_ttl = 0;
        loop {
            let ttl = ttl_epoch_sec.load(Ordering::Relaxed);
            if now_epoch_sec > ttl {
                return false;
            }
            if ttl > now_epoch_sec.saturating_add(self.base_sec) {
                return true;
            }
            if new_ttl == 0 {
                new_ttl = self.next_ttl(now_epoch_sec);
            }
            if ttl_epoch_sec
                .compare_exchange(ttl, new_ttl, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

fn now_epoch_sec() -> i64 {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;

    i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    )
    .unwrap_or(0)
}

struct RegionCacheMap {
    /// RegionVerId -> Region.
    ver_id_to_region: HashMap<RegionVerId, CachedRegion>,
    /// Start key -> RegionVerId.
    ///
    /// Invariant: no two regions in the map intersect.
    key_to_ver_id: BTreeMap<Key, RegionVerId>,
    /// RegionId -> RegionVerId. The same id may name different regions across time.
    id_to_ver_id: HashMap<RegionId, RegionVerId>,
}

impl RegionCacheMap {
    fn new() -> RegionCacheMap {
        RegionCacheMap {
            ver_id_to_region: HashMap::new(),
            key_to_ver_id: BTreeMap::new(),
            id_to_ver_id: HashMap::new(),
        }
    }

    fn lookup(&self, key: &Key, ttl: RegionCacheTtl, now: i64) -> Option<Region> {
        let (_, ver_id) = self.key_to_ver_id.range(..=key).next_back()?;
        let cached = self.ver_id_to_region.get(ver_id)?;
        if ttl.check_and_refresh(&cached.ttl_epoch_sec, now) && cached.region.contains(key) {
            Some(cached.region.clone())
        } else {
            None
        }
    }
}

/// A [`RegionManager`] backed by PD with a region and store cache in front of it.
pub struct RegionCache<PdC: PdClient> {
    region_cache: RwLock<RegionCacheMap>,
    store_cache: RwLock<HashMap<StoreId, Store>>,
    pd: Arc<PdC>,
    ttl: RegionCacheTtl,
}

impl<PdC: PdClient> RegionCache<PdC> {
    pub fn new(pd: Arc<PdC>, config: &Config) -> RegionCache<PdC> {
        Self::new_with_ttl(pd, config.region_cache_ttl, config.region_cache_ttl_jitter)
    }

    pub fn new_with_ttl(
        pd: Arc<PdC>,
        region_cache_ttl: Duration,
        region_cache_ttl_jitter: Duration,
    ) -> RegionCache<PdC> {
        RegionCache {
            region_cache: RwLock::new(RegionCacheMap::new()),
            store_cache: RwLock::new(HashMap::new()),
            pd,
            ttl: RegionCacheTtl::new(region_cache_ttl, region_cache_ttl_jitter),
        }
    }

    /// Retrieve the region containing `key`, querying PD on a miss.
    pub async fn get_region_by_key(&self, key: &Key) -> Result<Region> {
        let cached = self
            .region_cache
            .read()
            .await
            .lookup(key, self.ttl, now_epoch_sec());
        match cached {
            Some(region) => Ok(region),
            None => self.read_through_region_by_key(key).await,
        }
    }

    pub async fn get_store_by_id(&self, id: StoreId) -> Result<Store> {
        let store = self.store_cache.read().await.get(&id).cloned();
        match store {
            Some(store) => Ok(store),
            None => self.read_through_store_by_id(id).await,
        }
    }

    /// Force a read through PD and update the cache.
    pub async fn read_through_region_by_key(&self, key: &Key) -> Result<Region> {
        let region = self.pd.region_for_key(key).await?;
        debug!("region cache miss for {:?}, loaded region {}", key, region.id);
        self.add_region(region.clone()).await;
        Ok(region)
    }

    async fn read_through_store_by_id(&self, id: StoreId) -> Result<Store> {
        let store = self.pd.store_for_id(id).await?;
        self.store_cache.write().await.insert(id, store.clone());
        Ok(store)
    }

    /// Insert `region`, evicting every cached region it intersects.
    pub async fn add_region(&self, region: Region) {
        let mut cache = self.region_cache.write().await;
        let ttl_epoch_sec = self.ttl.next_ttl(now_epoch_sec());

        let mut to_be_removed: HashSet<RegionVerId> = HashSet::new();
        if let Some(ver_id) = cache.id_to_ver_id.get(&region.id) {
            if ver_id != &region.ver_id() {
                to_be_removed.insert(ver_id.clone());
            }
        }

        // Walk backwards from the new end key; cached regions are disjoint and sorted, so the
        // first one that ends at or before the new start key ends the walk.
        {
            let mut search_range = if region.end_key.is_empty() {
                cache.key_to_ver_id.range(..)
            } else {
                cache.key_to_ver_id.range(..region.end_key.clone())
            };
            while let Some((_, ver_id_in_cache)) = search_range.next_back() {
                let Some(cached) = cache.ver_id_to_region.get(ver_id_in_cache) else {
                    continue;
                };
                let end_key_in_cache = &cached.region.end_key;
                if end_key_in_cache.is_empty() || end_key_in_cache > &region.start_key {
                    to_be_removed.insert(ver_id_in_cache.clone());
                } else {
                    break;
                }
            }
        }

        for ver_id in to_be_removed {
            let Some(removed) = cache.ver_id_to_region.remove(&ver_id) else {
                continue;
            };
            cache.key_to_ver_id.remove(&removed.region.start_key);
            if cache.id_to_ver_id.get(&removed.region.id) == Some(&ver_id) {
                cache.id_to_ver_id.remove(&removed.region.id);
            }
        }

        let ver_id = region.ver_id();
        cache
            .key_to_ver_id
            .insert(region.start_key(), ver_id.clone());
        cache.id_to_ver_id.insert(region.id, ver_id.clone());
        cache
            .ver_id_to_region
            .insert(ver_id, CachedRegion::new(region, ttl_epoch_sec));
    }

    pub async fn invalidate_region_cache(&self, ver_id: &RegionVerId) {
        let mut cache = self.region_cache.write().await;
        if let Some(cached) = cache.ver_id_to_region.remove(ver_id) {
            cache.id_to_ver_id.remove(&cached.region.id);
            cache.key_to_ver_id.remove(&cached.region.start_key);
        }
    }

    pub async fn invalidate_store_cache(&self, store_id: StoreId) {
        self.store_cache.write().await.remove(&store_id);
    }
}

#[async_trait]
impl<PdC: PdClient> RegionManager for RegionCache<PdC> {
    async fn region_store_for_key(&self, key: &Key) -> Result<RegionStore> {
        let region = self.get_region_by_key(key).await?;
        let store = self.get_store_by_id(region.leader_store_id).await?;
        Ok(RegionStore::new(region, store))
    }

    async fn invalidate_region(&self, region: &Region) {
        debug!("invalidate region {:?}", region.ver_id());
        self.invalidate_region_cache(&region.ver_id()).await;
    }

    async fn invalidate_store(&self, store_id: StoreId) {
        debug!("invalidate store {}", store_id);
        self.invalidate_store_cache(store_id).await;
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU64;
    use std::sync::atomic::Ordering;
    use std::sync::atomic::Ordering::SeqCst;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::RegionCache;
    use super::RegionManager;
    use crate::pd::PdClient;
    use crate::region::Region;
    use crate::region::RegionId;
    use crate::region::Store;
    use crate::region::StoreId;
    use crate::Error;
    use crate::Key;
    use crate::Result;
    use crate::Timestamp;

    #[derive(Default)]
    struct MockPd {
        regions: Mutex<Vec<Region>>,
        get_region_count: AtomicU64,
        get_store_count: AtomicU64,
    }

    #[async_trait]
    impl PdClient for MockPd {
        async fn get_timestamp(&self) -> Result<Timestamp> {
            Ok(Timestamp::new(1, 0))
        }

        async fn region_for_key(&self, key: &Key) -> Result<Region> {
            self.get_region_count.fetch_add(1, SeqCst);
            self.regions
                .lock()
                .await
                .iter()
                .find(|r| r.contains(key))
                .cloned()
                .ok_or_else(|| Error::RegionForKeyNotFound { key: key.clone() })
        }

        async fn store_for_id(&self, id: StoreId) -> Result<Store> {
            self.get_store_count.fetch_add(1, SeqCst);
            Ok(Store::new(id, format!("store-{id}")))
        }
    }

    fn cache(pd: &Arc<MockPd>) -> RegionCache<MockPd> {
        RegionCache::new_with_ttl(pd.clone(), Duration::from_secs(600), Duration::from_secs(60))
    }

    fn region(id: RegionId, start_key: Vec<u8>, end_key: Vec<u8>) -> Region {
        Region::new(id, start_key.into(), end_key.into(), 0, 0, id)
    }

    #[tokio::test]
    async fn cache_is_used() -> Result<()> {
        let pd = Arc::new(MockPd::default());
        let cache = cache(&pd);
        pd.regions.lock().await.push(region(1, vec![], vec![100]));
        pd.regions.lock().await.push(region(2, vec![100], vec![]));

        let target = cache.region_store_for_key(&vec![5].into()).await?;
        assert_eq!(target.region.id, 1);
        assert_eq!(target.store.id, 1);
        assert_eq!(pd.get_region_count.load(SeqCst), 1);
        assert_eq!(pd.get_store_count.load(SeqCst), 1);

        cache.region_store_for_key(&vec![50].into()).await?;
        assert_eq!(pd.get_region_count.load(SeqCst), 1);
        assert_eq!(pd.get_store_count.load(SeqCst), 1);

        cache.invalidate_region(&target.region).await;
        cache.invalidate_store(target.store.id).await;
        cache.region_store_for_key(&vec![50].into()).await?;
        assert_eq!(pd.get_region_count.load(SeqCst), 2);
        assert_eq!(pd.get_store_count.load(SeqCst), 2);

        let target = cache.region_store_for_key(&vec![200].into()).await?;
        assert_eq!(target.region.id, 2);
        assert_eq!(pd.get_region_count.load(SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn cache_entry_expires_by_ttl() -> Result<()> {
        let pd = Arc::new(MockPd::default());
        let cache = RegionCache::new_with_ttl(pd.clone(), Duration::from_secs(600), Duration::ZERO);
        pd.regions.lock().await.push(region(1, vec![], vec![10]));

        let ver_id = cache.get_region_by_key(&vec![1].into()).await?.ver_id();
        assert_eq!(pd.get_region_count.load(SeqCst), 1);
        {
            let guard = cache.region_cache.read().await;
            guard
                .ver_id_to_region
                .get(&ver_id)
                .unwrap()
                .ttl_epoch_sec
                .store(super::now_epoch_sec() - 1, Ordering::Relaxed);
        }
        cache.get_region_by_key(&vec![1].into()).await?;
        assert_eq!(pd.get_region_count.load(SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn add_intersecting_regions() {
        let pd = Arc::new(MockPd::default());
        let cache = cache(&pd);

        cache.add_region(region(1, vec![], vec![10])).await;
        cache.add_region(region(2, vec![10], vec![20])).await;
        cache.add_region(region(3, vec![30], vec![40])).await;
        cache.add_region(region(4, vec![50], vec![60])).await;
        cache.add_region(region(5, vec![20], vec![35])).await;

        let mut expected: BTreeMap<Key, Region> = BTreeMap::new();
        expected.insert(vec![].into(), region(1, vec![], vec![10]));
        expected.insert(vec![10].into(), region(2, vec![10], vec![20]));
        expected.insert(vec![20].into(), region(5, vec![20], vec![35]));
        expected.insert(vec![50].into(), region(4, vec![50], vec![60]));
        assert_cache(&cache, &expected).await;

        cache.add_region(region(6, vec![15], vec![25])).await;
        let mut expected = BTreeMap::new();
        expected.insert(vec![].into(), region(1, vec![], vec![10]));
        expected.insert(vec![15].into(), region(6, vec![15], vec![25]));
        expected.insert(vec![50].into(), region(4, vec![50], vec![60]));
        assert_cache(&cache, &expected).await;

        cache.add_region(region(7, vec![20], vec![])).await;
        let mut expected = BTreeMap::new();
        expected.insert(vec![].into(), region(1, vec![], vec![10]));
        expected.insert(vec![20].into(), region(7, vec![20], vec![]));
        assert_cache(&cache, &expected).await;
    }

    #[tokio::test]
    async fn split_replaces_parent_region() -> Result<()> {
        let pd = Arc::new(MockPd::default());
        let cache = cache(&pd);
        cache.add_region(region(1, vec![], vec![])).await;

        // After a split the left half keeps the id with a newer version.
        let mut left = region(1, vec![], vec![50]);
        left.version = 1;
        cache.add_region(left.clone()).await;
        cache.add_region(region(2, vec![50], vec![])).await;

        assert_eq!(cache.get_region_by_key(&vec![10].into()).await?, left);
        assert_eq!(cache.get_region_by_key(&vec![60].into()).await?.id, 2);
        assert_eq!(pd.get_region_count.load(SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_region_is_an_error() {
        let pd = Arc::new(MockPd::default());
        let cache = cache(&pd);
        cache.add_region(region(1, vec![], vec![10])).await;
        let err = cache.get_region_by_key(&vec![20].into()).await.unwrap_err();
        assert!(matches!(err, Error::RegionForKeyNotFound { .. }));
    }

    async fn assert_cache(cache: &RegionCache<MockPd>, expected: &BTreeMap<Key, Region>) {
        let guard = cache.region_cache.read().await;
        let mut actual = guard
            .ver_id_to_region
            .values()
            .map(|r| &r.region)
            .collect::<Vec<_>>();
        let mut expected_regions = expected.values().collect::<Vec<_>>();
        actual.sort_by_key(|r| r.id);
        expected_regions.sort_by_key(|r| r.id);
        assert_eq!(actual, expected_regions);
        assert_eq!(
            guard.key_to_ver_id.keys().collect::<HashSet<_>>(),
            expected.keys().collect::<HashSet<_>>()
        );
    }
}
