// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

mod client;
mod request;

pub use self::client::KvClient;
pub use self::request::CommitRequest;
pub use self::request::PrewriteRequest;
pub use self::request::ScanRequest;
pub use self::request::TxnHeartBeatRequest;
