// Copyright 2018 TiKV Project Authors. Licensed under Apache-2.0.

//! The transaction coordination layer of a [TiKV](https://github.com/tikv/tikv) client.
//!
//! A TiKV transaction buffers its writes, then commits them with two-phase commit: a
//! *prewrite* leg leaves a lock on every key, pointing at the transaction's *primary* key, and a
//! *commit* leg turns the locks into committed versions, primary first. This crate provides the
//! pieces that sit between a transaction and the wire:
//!
//! - [`TxnKvClient`] sends the prewrite, commit and heartbeat legs to the region owning each key,
//!   and classifies every outcome as a [`ClientRpcResult`].
//! - [`TtlManager`] keeps a long transaction's primary lock alive by extending its TTL on a fixed
//!   schedule, so that other transactions do not resolve it as abandoned.
//! - [`ScanIterator`] reads a consistent snapshot range batch by batch across region boundaries.
//! - [`TwoPhaseCommitter`] drives a set of mutations through both legs.
//!
//! The placement driver ([`PdClient`]) and the RPC gateway ([`KvClient`]) are traits; plug in a
//! gRPC implementation or, with the `test-util` feature, the in-memory mock cluster.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use tikv_txn_client::{Config, KvClient, Mutation, PdClient, Result, TwoPhaseCommitter, TxnKvClient};
//! # async fn example(pd: Arc<impl PdClient>, tikv: Arc<dyn KvClient>) -> Result<()> {
//! let client = TxnKvClient::with_region_cache(Config::default(), pd, tikv);
//! let start_ts = client.get_timestamp().await?;
//! let mutations = vec![Mutation::Put("key".into(), b"value".to_vec())];
//! let commit_ts = TwoPhaseCommitter::new(client.clone(), start_ts, mutations)
//!     .commit()
//!     .await?;
//!
//! let pairs = client
//!     .scan("a", "z", commit_ts, false)
//!     .collect_all()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Since this crate provides an async API, you need an async runtime (Tokio-only).

pub mod backoffer;
pub mod iterator;
pub mod metrics;
pub mod pd;
pub mod region;
pub mod region_cache;
pub mod store;
pub mod transaction;

mod common;
mod compat;
mod config;
mod kv;
mod stats;
mod timestamp;

#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(feature = "test-util", allow(dead_code))]
mod mock;

/// Test and benchmark utilities (feature-gated).
#[cfg(feature = "test-util")]
pub mod test_util {
    pub use super::mock::MockCluster;
    pub use super::mock::RecordingRegionManager;
    pub use super::mock::RpcKind;
}

#[doc(inline)]
pub use common::Error;
#[doc(inline)]
pub use common::RegionError;
#[doc(inline)]
pub use common::Result;
#[doc(inline)]
pub use common::WriteConflictError;
#[doc(inline)]
pub use config::Config;
#[doc(inline)]
pub use iterator::RegionScanner;
#[doc(inline)]
pub use iterator::ScanBatch;
#[doc(inline)]
pub use iterator::ScanIterator;
#[doc(inline)]
pub use iterator::SnapshotScanner;
#[doc(inline)]
pub use kv::Key;
#[doc(inline)]
pub use kv::KvPair;
#[doc(inline)]
pub use kv::Mutation;
#[doc(inline)]
pub use kv::Value;
#[doc(inline)]
pub use pd::PdClient;
#[doc(inline)]
pub use region_cache::RegionCache;
#[doc(inline)]
pub use region_cache::RegionManager;
#[doc(inline)]
pub use store::KvClient;
#[doc(inline)]
pub use timestamp::compose_ts;
#[doc(inline)]
pub use timestamp::extract_logical;
#[doc(inline)]
pub use timestamp::extract_physical;
#[doc(inline)]
pub use timestamp::Timestamp;
#[doc(inline)]
pub use transaction::ClientRpcResult;
#[doc(inline)]
pub use transaction::TtlManager;
#[doc(inline)]
pub use transaction::TwoPhaseCommitter;
#[doc(inline)]
pub use transaction::TxnKvClient;
#[doc(inline)]
pub use transaction::MANAGED_LOCK_TTL;
