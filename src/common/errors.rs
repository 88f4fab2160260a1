// Copyright 2018 TiKV Project Authors. Licensed under Apache-2.0.

use std::fmt;
use std::result;

use thiserror::Error;

use crate::backoffer::BackofferError;
use crate::region::RegionId;
use crate::region::StoreId;
use crate::Key;

/// A write conflict returned by TiKV.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WriteConflictError {
    pub start_ts: u64,
    pub conflict_ts: u64,
    pub conflict_commit_ts: u64,
    pub key: Key,
    pub primary: Key,
}

impl fmt::Display for WriteConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "start_ts={}, conflict_ts={}, conflict_commit_ts={}, key={:?}, primary={:?}",
            self.start_ts, self.conflict_ts, self.conflict_commit_ts, self.key, self.primary
        )
    }
}

/// Region-level errors reported by a store. All of them mean the client's view of the
/// region (or of the replica serving it) is stale.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RegionError {
    /// The target store is not the leader; `leader` is the store TiKV believes leads now.
    NotLeader {
        region_id: RegionId,
        leader: Option<StoreId>,
    },
    /// The region was split or merged since the client cached it.
    EpochNotMatch { region_id: RegionId },
    RegionNotFound { region_id: RegionId },
    KeyNotInRegion { region_id: RegionId, key: Key },
    StoreNotMatch {
        request_store_id: StoreId,
        actual_store_id: StoreId,
    },
    ServerIsBusy { reason: String },
    StaleCommand,
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionError::NotLeader { region_id, leader } => {
                write!(f, "not leader, region_id={region_id}, leader={leader:?}")
            }
            RegionError::EpochNotMatch { region_id } => {
                write!(f, "epoch not match, region_id={region_id}")
            }
            RegionError::RegionNotFound { region_id } => {
                write!(f, "region not found, region_id={region_id}")
            }
            RegionError::KeyNotInRegion { region_id, key } => {
                write!(f, "key {key:?} not in region {region_id}")
            }
            RegionError::StoreNotMatch {
                request_store_id,
                actual_store_id,
            } => write!(
                f,
                "store not match, request_store_id={request_store_id}, actual_store_id={actual_store_id}"
            ),
            RegionError::ServerIsBusy { reason } => write!(f, "server is busy: {reason}"),
            RegionError::StaleCommand => f.write_str("stale command"),
        }
    }
}

/// An error originating from the transaction client or its collaborators.
#[derive(Debug, Error)]
#[allow(clippy::large_enum_variant)]
pub enum Error {
    /// Write conflict returned by TiKV.
    #[error("Write conflict: {0}")]
    WriteConflict(WriteConflictError),
    /// Key already exists (e.g. Insert on an existing key).
    #[error("Key already exists: {key:?}")]
    KeyExists { key: Key },
    /// Retryable key error returned by TiKV.
    #[error("Retryable error: {message}")]
    Retryable { message: String },
    /// TiKV aborts the transaction with a reason.
    #[error("TiKV aborts txn: {message}")]
    TxnAborted { message: String },
    /// The transaction is not found on TiKV.
    #[error("Txn {start_ts} not found")]
    TxnNotFound { start_ts: u64 },
    /// Any other key-level error (malformed key, unexpected lock, ...).
    #[error("Key error: {message}")]
    KeyError { message: String },
    /// Errors caused by changes of region information
    #[error("Region error: {0}")]
    RegionError(Box<RegionError>),
    /// Wraps a `tonic::Status` returned by a gRPC call.
    #[error("gRPC api error: {0}")]
    GrpcAPI(#[from] tonic::Status),
    /// Wraps a `tonic::transport::Error`; the request may or may not have reached the server.
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),
    /// Wraps a `std::io::Error`.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Can't join tokio tasks
    #[error("Failed to join tokio tasks")]
    JoinError(#[from] tokio::task::JoinError),
    /// The backoff budget is exhausted.
    #[error("Backoff exhausted: {0}")]
    Backoff(#[from] BackofferError),
    /// Whether the transaction is committed or not is undetermined
    #[error("Whether the transaction is committed or not is undetermined")]
    UndeterminedError(#[source] Box<Error>),
    /// A scan RPC returned more entries than it was asked for.
    #[error("current cache size = {size}, larger than {limit}")]
    ScanBatchOverflow { size: usize, limit: u32 },
    /// Error scanning data from region.
    #[error("Error scanning data from region")]
    ScanError(#[source] Box<Error>),
    /// A heartbeat attempt failed after exhausting its retries.
    #[error("{message}")]
    HeartbeatFailed {
        message: String,
        #[source]
        source: Box<Error>,
    },
    /// A two-phase commit leg failed with a non-retryable error.
    #[error("{phase} failed")]
    TwoPhaseCommit {
        phase: &'static str,
        #[source]
        source: Box<Error>,
    },
    /// PD could not hand out a timestamp within the TSO backoff budget.
    #[error("Get tso from pd failed")]
    TimestampUnavailable(#[source] Box<Error>),
    /// An operation requires a primary key, but the transaction was empty.
    #[error("transaction has no primary key")]
    NoPrimaryKey,
    /// No region is found for the given key.
    #[error("Region is not found for key: {:?}", key)]
    RegionForKeyNotFound { key: Key },
    #[error("Store {} is not found", store_id)]
    StoreNotFound { store_id: StoreId },
    #[error("{}", message)]
    InternalError { message: String },
    #[error("{0}")]
    StringError(String),
}

impl From<RegionError> for Error {
    fn from(e: RegionError) -> Error {
        Error::RegionError(Box::new(e))
    }
}

impl From<WriteConflictError> for Error {
    fn from(e: WriteConflictError) -> Error {
        Error::WriteConflict(e)
    }
}

/// A result holding an [`Error`](enum@Error).
pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn is_region_error(&self) -> bool {
        matches!(self, Error::RegionError(_))
    }

    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            Error::WriteConflict(_)
                | Error::KeyExists { .. }
                | Error::Retryable { .. }
                | Error::TxnAborted { .. }
                | Error::TxnNotFound { .. }
                | Error::KeyError { .. }
        )
    }

    pub fn is_write_conflict(&self) -> bool {
        match self {
            Error::WriteConflict(_) => true,
            Error::UndeterminedError(inner)
            | Error::TwoPhaseCommit { source: inner, .. }
            | Error::ScanError(inner) => inner.is_write_conflict(),
            _ => false,
        }
    }

    pub fn is_undetermined(&self) -> bool {
        matches!(self, Error::UndeterminedError(_))
    }

    /// Whether a failed RPC leg may be retried after backing off and refreshing the region.
    ///
    /// Transport-level failures that are not a gRPC status (connection reset, I/O) are
    /// deliberately fatal: the request may have been applied, and only the caller can decide
    /// what that means for the transaction.
    pub fn is_retryable_rpc_error(&self) -> bool {
        matches!(self, Error::InternalError { .. } | Error::GrpcAPI(_))
            || self.is_key_error()
            || self.is_region_error()
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! internal_err {
    ($e:expr) => ({
        $crate::Error::InternalError {
            message: format!("[{}:{}]: {}", file!(), line!(),  $e)
        }
    });
    ($f:tt, $($arg:expr),+) => ({
        $crate::internal_err!(format!($f, $($arg),+))
    });
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;
    use crate::backoffer::BackoffErrorKind;

    fn make_wc() -> Error {
        Error::WriteConflict(WriteConflictError {
            start_ts: 1,
            conflict_ts: 2,
            conflict_commit_ts: 3,
            key: Key::from(vec![0x01]),
            primary: Key::from(vec![0x02]),
        })
    }

    #[test]
    fn rpc_error_classification() {
        let cases: Vec<(Error, bool)> = vec![
            (crate::internal_err!("invariant"), true),
            (make_wc(), true),
            (Error::KeyExists { key: Key::from(vec![1]) }, true),
            (Error::Retryable { message: "retry".to_owned() }, true),
            (Error::TxnNotFound { start_ts: 7 }, true),
            (RegionError::EpochNotMatch { region_id: 1 }.into(), true),
            (tonic::Status::unavailable("down").into(), true),
            (std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into(), false),
            (
                BackofferError::MaxSleepExceeded {
                    kind: BackoffErrorKind::RegionUnavailable,
                }
                .into(),
                false,
            ),
            (Error::UndeterminedError(Box::new(Error::StringError("x".to_owned()))), false),
            (Error::ScanBatchOverflow { size: 3, limit: 2 }, false),
        ];
        for (err, retryable) in cases {
            assert_eq!(err.is_retryable_rpc_error(), retryable, "{err:?}");
        }
    }

    #[test]
    fn error_queries_recurse_through_wrappers() {
        assert!(make_wc().is_write_conflict());

        let wrapped = Error::UndeterminedError(Box::new(make_wc()));
        assert!(wrapped.is_write_conflict());
        assert!(wrapped.is_undetermined());
        assert!(!wrapped.is_key_error());

        let committed = Error::TwoPhaseCommit {
            phase: "prewrite",
            source: Box::new(make_wc()),
        };
        assert!(committed.is_write_conflict());
        assert!(!committed.is_undetermined());
    }

    #[test]
    fn scan_error_preserves_cause() {
        let err = Error::ScanError(Box::new(Error::ScanBatchOverflow { size: 5, limit: 4 }));
        assert_eq!(err.to_string(), "Error scanning data from region");
        let cause = err.source().expect("scan error keeps its cause");
        assert_eq!(cause.to_string(), "current cache size = 5, larger than 4");
    }

    #[test]
    fn internal_err_macro_contains_message() {
        let err = crate::internal_err!("boom");
        let msg = err.to_string();
        assert!(msg.contains("boom"), "{msg}");
        assert!(msg.contains("errors.rs"), "{msg}");
    }
}
