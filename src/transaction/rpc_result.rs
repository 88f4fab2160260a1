// Copyright 2026 TiKV Project Authors. Licensed under Apache-2.0.

use crate::Error;
use crate::Result;

/// The outcome of one transactional RPC leg.
///
/// A leg never returns `Err` to its caller: the gateway's error is classified here instead,
/// and the caller decides whether to back off and retry.
#[derive(Debug)]
pub enum ClientRpcResult {
    Success,
    /// The region or store may have changed, or TiKV asked the client to try again.
    Retryable(Error),
    Fatal(Error),
}

impl ClientRpcResult {
    /// Classify a gateway result with [`Error::is_retryable_rpc_error`].
    pub fn from_result<T>(result: Result<T>) -> ClientRpcResult {
        match result {
            Ok(_) => ClientRpcResult::Success,
            Err(e) if e.is_retryable_rpc_error() => ClientRpcResult::Retryable(e),
            Err(e) => ClientRpcResult::Fatal(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ClientRpcResult::Success)
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, ClientRpcResult::Retryable(_))
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            ClientRpcResult::Success => None,
            ClientRpcResult::Retryable(e) | ClientRpcResult::Fatal(e) => Some(e),
        }
    }

    pub fn into_error(self) -> Option<Error> {
        match self {
            ClientRpcResult::Success => None,
            ClientRpcResult::Retryable(e) | ClientRpcResult::Fatal(e) => Some(e),
        }
    }

    pub(crate) fn class(&self) -> Option<&'static str> {
        match self {
            ClientRpcResult::Success => None,
            ClientRpcResult::Retryable(_) => Some("retryable"),
            ClientRpcResult::Fatal(_) => Some("fatal"),
        }
    }
}
