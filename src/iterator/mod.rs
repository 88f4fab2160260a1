// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

//! Scans that cross region boundaries.
//!
//! A [`ScanIterator`] asks a [`RegionScanner`] for one batch at a time and works out where
//! the next batch starts: at the end of the region when the batch came back short, or right
//! after the last key when the batch is full. Callers see a single ascending sequence of
//! pairs in `[start_key, end_key)`.

mod snapshot;

use std::cmp::Ordering;

use async_trait::async_trait;
use derive_new::new;
use futures::Stream;
use log::debug;

pub use self::snapshot::SnapshotScanner;
use crate::compat::stream_fn;
use crate::region::Region;
use crate::Error;
use crate::Key;
use crate::KvPair;
use crate::Result;

/// One batch loaded from a region.
#[derive(new, Clone, Debug)]
pub struct ScanBatch {
    /// The region the batch was read from.
    pub region: Region,
    /// `None` when the region has nothing for this scan at all; the scan ends.
    /// `Some(vec![])` is an empty batch and the scan moves on to the next region.
    pub pairs: Option<Vec<KvPair>>,
}

/// Loads the batch of pairs starting at `start_key` from the region containing it.
#[async_trait]
pub trait RegionScanner: Send {
    async fn load_current_region(&mut self, start_key: &Key, limit: u32) -> Result<ScanBatch>;
}

/// A single-consumer cursor over the pairs of `[start_key, end_key)`.
///
/// An empty `end_key` scans to the end of the key space. Any error ends the scan: it is
/// returned once, wrapped in [`Error::ScanError`], and every later call returns `Ok(None)`
/// without sending another request.
pub struct ScanIterator<S: RegionScanner> {
    scanner: S,
    cache: Option<Vec<KvPair>>,
    index: usize,
    /// `None` once the last batch is loaded.
    start_key: Option<Key>,
    end_key: Key,
    has_end_key: bool,
    limit: u32,
    end_of_scan: bool,
    processing_last_batch: bool,
}

impl<S: RegionScanner> ScanIterator<S> {
    /// `limit` is the batch size asked of each region; zero is treated as one.
    pub fn new(scanner: S, start_key: Key, end_key: Key, limit: u32) -> ScanIterator<S> {
        ScanIterator {
            scanner,
            cache: None,
            index: 0,
            start_key: Some(start_key),
            has_end_key: !end_key.is_empty(),
            end_key,
            limit: limit.max(1),
            end_of_scan: false,
            processing_last_batch: false,
        }
    }

    /// The next pair in key order, or `None` when the range is exhausted.
    pub async fn next(&mut self) -> Result<Option<KvPair>> {
        loop {
            if let Some(pair) = self.next_cached() {
                if self.has_end_key && pair.key >= self.end_key {
                    self.end_of_scan = true;
                    self.cache = None;
                    return Ok(None);
                }
                return Ok(Some(pair));
            }
            match self.load_next_batch().await {
                Ok(true) => {}
                Ok(false) => {
                    self.end_of_scan = true;
                    return Ok(None);
                }
                Err(e) => {
                    self.end_of_scan = true;
                    self.cache = None;
                    return Err(Error::ScanError(Box::new(e)));
                }
            }
        }
    }

    /// Drain the rest of the scan.
    pub async fn collect_all(&mut self) -> Result<Vec<KvPair>> {
        let mut pairs = Vec::new();
        while let Some(pair) = self.next().await? {
            pairs.push(pair);
        }
        Ok(pairs)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<KvPair>>
    where
        S: 'static,
    {
        stream_fn(self, |mut iter| async move {
            match iter.next().await? {
                Some(pair) => Ok(Some((iter, pair))),
                None => Ok(None),
            }
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.end_of_scan
    }

    fn next_cached(&mut self) -> Option<KvPair> {
        let cache = self.cache.as_mut()?;
        let pair = cache.get_mut(self.index).map(std::mem::take)?;
        self.index += 1;
        Some(pair)
    }

    /// Returns `Ok(false)` when there is nothing left to load.
    async fn load_next_batch(&mut self) -> Result<bool> {
        if self.end_of_scan || self.processing_last_batch {
            return Ok(false);
        }
        let Some(start_key) = self.start_key.clone() else {
            return Ok(false);
        };

        let batch = self
            .scanner
            .load_current_region(&start_key, self.limit)
            .await?;
        let Some(pairs) = batch.pairs else {
            self.end_of_scan = true;
            self.cache = None;
            return Ok(false);
        };

        let limit = self.limit as usize;
        // `last_key` decides whether this is the last batch, `next_start` where the next
        // one begins.
        let (last_key, next_start) = match pairs.len().cmp(&limit) {
            Ordering::Less => {
                let region_end = batch.region.end_key();
                (region_end.clone(), region_end)
            }
            Ordering::Equal => match pairs.last() {
                Some(last) => (last.key.clone(), last.key.clone().next_key()),
                None => return Err(crate::internal_err!("full scan batch without pairs")),
            },
            Ordering::Greater => {
                return Err(Error::ScanBatchOverflow {
                    size: pairs.len(),
                    limit: self.limit,
                })
            }
        };

        debug!(
            "scan loaded {} pairs from region {}, next start {:?}",
            pairs.len(),
            batch.region.id,
            next_start
        );
        self.cache = Some(pairs);
        self.index = 0;

        // An empty continuation key is +infinity.
        let reaches_end =
            self.has_end_key && (last_key >= self.end_key || next_start >= self.end_key);
        if reaches_end || next_start.is_empty() {
            self.processing_last_batch = true;
            self.start_key = None;
        } else {
            self.start_key = Some(next_start);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::Mutex;

    use futures::TryStreamExt;

    use super::*;

    /// Replays canned batches and records the requested start keys.
    struct ScriptedScanner {
        batches: VecDeque<Result<ScanBatch>>,
        requests: Arc<Mutex<Vec<(Key, u32)>>>,
    }

    impl ScriptedScanner {
        fn new(batches: Vec<Result<ScanBatch>>) -> (Self, Arc<Mutex<Vec<(Key, u32)>>>) {
            let requests = Arc::new(Mutex::new(Vec::new()));
            (
                ScriptedScanner {
                    batches: batches.into(),
                    requests: requests.clone(),
                },
                requests,
            )
        }
    }

    #[async_trait]
    impl RegionScanner for ScriptedScanner {
        async fn load_current_region(&mut self, start_key: &Key, limit: u32) -> Result<ScanBatch> {
            self.requests.lock().unwrap().push((start_key.clone(), limit));
            self.batches
                .pop_front()
                .unwrap_or_else(|| Err(crate::internal_err!("unexpected scan request")))
        }
    }

    fn region(id: u64, start: &[u8], end: &[u8]) -> Region {
        Region::new(id, start.to_vec().into(), end.to_vec().into(), 1, 1, 1)
    }

    fn pairs(keys: impl IntoIterator<Item = Vec<u8>>) -> Vec<KvPair> {
        keys.into_iter().map(|k| KvPair::new(k, b"v".to_vec())).collect()
    }

    fn keys(pairs: &[KvPair]) -> Vec<Vec<u8>> {
        pairs.iter().map(|p| p.key.clone().into()).collect()
    }

    #[tokio::test]
    async fn short_batch_continues_at_region_end() {
        let first = pairs((0..60u8).map(|i| vec![b'a', i]));
        let (scanner, requests) = ScriptedScanner::new(vec![
            Ok(ScanBatch::new(region(1, b"", b"m"), Some(first))),
            Ok(ScanBatch::new(region(2, b"m", b""), Some(pairs([b"n".to_vec()])))),
        ]);
        let mut iter = ScanIterator::new(scanner, Key::EMPTY, Key::EMPTY, 100);
        let all = iter.collect_all().await.unwrap();
        assert_eq!(all.len(), 61);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].0, Key::from("m"));
        // The second region ends at +infinity, so nothing is loaded after it.
        assert!(iter.load_next_batch().await.is_ok_and(|more| !more));
    }

    #[tokio::test]
    async fn full_batch_continues_after_last_key() {
        let (scanner, requests) = ScriptedScanner::new(vec![
            Ok(ScanBatch::new(
                region(1, b"", b""),
                Some(pairs([b"a".to_vec(), b"b".to_vec()])),
            )),
            Ok(ScanBatch::new(region(1, b"", b""), Some(pairs([b"c".to_vec()])))),
        ]);
        let mut iter = ScanIterator::new(scanner, Key::from("a"), Key::EMPTY, 2);
        let all = iter.collect_all().await.unwrap();
        assert_eq!(keys(&all), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        let requests = requests.lock().unwrap();
        assert_eq!(requests[1], (Key::from("b").next_key(), 2));
    }

    #[tokio::test]
    async fn overflowing_batch_is_an_error_and_ends_the_scan() {
        let (scanner, requests) = ScriptedScanner::new(vec![Ok(ScanBatch::new(
            region(1, b"", b""),
            Some(pairs([b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])),
        ))]);
        let mut iter = ScanIterator::new(scanner, Key::EMPTY, Key::EMPTY, 2);
        let err = iter.next().await.unwrap_err();
        match &err {
            Error::ScanError(source) => assert!(
                matches!(**source, Error::ScanBatchOverflow { size: 3, limit: 2 }),
                "{source:?}"
            ),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(iter.next().await.unwrap().is_none());
        assert!(iter.is_exhausted());
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_reaching_end_key_is_the_last() {
        let (scanner, requests) = ScriptedScanner::new(vec![Ok(ScanBatch::new(
            region(1, b"", b""),
            Some(pairs([b"a".to_vec(), b"k".to_vec()])),
        ))]);
        let mut iter = ScanIterator::new(scanner, Key::EMPTY, Key::from("k"), 2);
        assert_eq!(iter.next().await.unwrap().unwrap().key, Key::from("a"));
        // "k" is not below the end key.
        assert!(iter.next().await.unwrap().is_none());
        assert!(iter.next().await.unwrap().is_none());
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn continuation_at_end_key_is_not_loaded() {
        let end_key = Key::from("b").next_key();
        let (scanner, requests) = ScriptedScanner::new(vec![Ok(ScanBatch::new(
            region(1, b"", b""),
            Some(pairs([b"a".to_vec(), b"b".to_vec()])),
        ))]);
        let mut iter = ScanIterator::new(scanner, Key::EMPTY, end_key, 2);
        let all = iter.collect_all().await.unwrap();
        assert_eq!(keys(&all), vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(iter.is_exhausted());
        assert_eq!(*requests.lock().unwrap(), vec![(Key::EMPTY, 2)]);
    }

    #[tokio::test]
    async fn region_end_past_end_key_is_the_last_batch() {
        let (scanner, requests) = ScriptedScanner::new(vec![Ok(ScanBatch::new(
            region(1, b"", b"z"),
            Some(pairs([b"a".to_vec()])),
        ))]);
        let mut iter = ScanIterator::new(scanner, Key::EMPTY, Key::from("m"), 10);
        assert_eq!(iter.collect_all().await.unwrap().len(), 1);
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_moves_on_but_missing_batch_ends() {
        let (scanner, requests) = ScriptedScanner::new(vec![
            Ok(ScanBatch::new(region(1, b"", b"f"), Some(vec![]))),
            Ok(ScanBatch::new(region(2, b"f", b"p"), None)),
        ]);
        let mut iter = ScanIterator::new(scanner, Key::EMPTY, Key::EMPTY, 10);
        assert!(iter.next().await.unwrap().is_none());
        assert!(iter.next().await.unwrap().is_none());
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn scanner_error_is_wrapped() {
        let (scanner, _) = ScriptedScanner::new(vec![Err(Error::RegionForKeyNotFound {
            key: Key::EMPTY,
        })]);
        let iter = ScanIterator::new(scanner, Key::EMPTY, Key::EMPTY, 10);
        let res: Result<Vec<KvPair>> = iter.into_stream().try_collect().await;
        let err = res.unwrap_err();
        assert_eq!(err.to_string(), "Error scanning data from region");
    }
}
