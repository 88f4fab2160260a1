// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

//! Transactional APIs: the RPC legs of two-phase commit, primary lock keep-alive, and a
//! small committer driving them.

pub use self::client::TxnKvClient;
pub use self::committer::TwoPhaseCommitter;
pub use self::rpc_result::ClientRpcResult;
pub use self::ttl_manager::TtlManager;
pub use self::ttl_manager::MANAGED_LOCK_TTL;

mod client;
mod committer;
mod rpc_result;
mod ttl_manager;
