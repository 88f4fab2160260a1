// Copyright 2020 TiKV Project Authors. Licensed under Apache-2.0.

//! Arguments of the transactional RPC legs.
//!
//! The wire encoding is owned by the gateway implementation; these are the fields every
//! encoding has to carry.

use derive_new::new;

use crate::Key;
use crate::Mutation;

#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct PrewriteRequest {
    pub primary_lock: Key,
    pub mutations: Vec<Mutation>,
    pub start_version: u64,
    /// Milliseconds.
    pub lock_ttl: u64,
}

#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct CommitRequest {
    pub keys: Vec<Key>,
    pub start_version: u64,
    pub commit_version: u64,
}

#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct TxnHeartBeatRequest {
    pub primary_lock: Key,
    pub start_version: u64,
    /// The TTL the lock should have from now on, in milliseconds.
    pub advise_lock_ttl: u64,
}

#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct ScanRequest {
    pub start_key: Key,
    /// Exclusive; empty means the end of the region.
    pub end_key: Key,
    pub limit: u32,
    pub key_only: bool,
    pub version: u64,
}

impl ScanRequest {
    pub(crate) fn label(&self) -> &'static str {
        "kv_scan"
    }
}

impl PrewriteRequest {
    pub(crate) fn label(&self) -> &'static str {
        "kv_prewrite"
    }
}

impl CommitRequest {
    pub(crate) fn label(&self) -> &'static str {
        "kv_commit"
    }
}

impl TxnHeartBeatRequest {
    pub(crate) fn label(&self) -> &'static str {
        "kv_txn_heart_beat"
    }
}
