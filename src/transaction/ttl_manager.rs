// Copyright 2020 TiKV Project Authors. Licensed under Apache-2.0.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use log::debug;
use log::error;
use log::info;
use log::warn;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::ClientRpcResult;
use super::TxnKvClient;
use crate::backoffer::Backoffer;
use crate::backoffer::BO_REGION_MISS;
use crate::stats::observe_heartbeat;
use crate::timestamp::extract_physical;
use crate::Error;
use crate::Key;
use crate::Result;

/// The TTL, in milliseconds, the manager keeps ahead of the transaction's uptime.
pub const MANAGED_LOCK_TTL: u64 = 20_000;

const SCHEDULER_PERIOD_MS: u64 = MANAGED_LOCK_TTL / 2;
const SCHEDULER_INITIAL_DELAY_MS: u64 = MANAGED_LOCK_TTL / 4;

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[repr(u8)]
enum TtlManagerState {
    Uninitialized = 0,
    Running = 1,
    Closed = 2,
}

impl From<u8> for TtlManagerState {
    fn from(num: u8) -> Self {
        match num {
            0 => TtlManagerState::Uninitialized,
            1 => TtlManagerState::Running,
            _ => TtlManagerState::Closed,
        }
    }
}

/// Keeps the primary lock of a transaction alive while the transaction is in flight.
///
/// After [`start`](TtlManager::start) a background task sends a heartbeat every
/// `MANAGED_LOCK_TTL / 2`, the first one `MANAGED_LOCK_TTL / 4` after starting. Each
/// heartbeat asks for a TTL of the transaction's uptime plus `MANAGED_LOCK_TTL`, so the lock
/// outlives the transaction by about one TTL window as long as heartbeats succeed.
///
/// A manager is started at most once and stopped at most once. Failed heartbeats are logged
/// and do not stop the schedule; [`lock_may_have_expired`](TtlManager::lock_may_have_expired)
/// reports when they have covered a whole TTL window.
pub struct TtlManager {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    start_ts: u64,
    primary_lock: Key,
    client: TxnKvClient,
    state: AtomicU8,
    shutdown: Notify,
    consecutive_failures: AtomicU32,
    expiry_reported: AtomicBool,
    last_ttl: AtomicU64,
}

impl TtlManager {
    pub fn new(client: TxnKvClient, start_ts: u64, primary_lock: impl Into<Key>) -> TtlManager {
        TtlManager {
            inner: Arc::new(Inner {
                start_ts,
                primary_lock: primary_lock.into(),
                client,
                state: AtomicU8::new(TtlManagerState::Uninitialized as u8),
                shutdown: Notify::new(),
                consecutive_failures: AtomicU32::new(0),
                expiry_reported: AtomicBool::new(false),
                last_ttl: AtomicU64::new(0),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Start the heartbeat schedule. Returns `false`, and schedules nothing, if the manager
    /// was already started or stopped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        if let Err(current) = self
            .inner
            .transit(TtlManagerState::Uninitialized, TtlManagerState::Running)
        {
            warn!(
                "keep alive failed, state={:?} key={:?}",
                current, self.inner.primary_lock
            );
            return false;
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                Instant::now() + Duration::from_millis(SCHEDULER_INITIAL_DELAY_MS),
                Duration::from_millis(SCHEDULER_PERIOD_MS),
            );
            loop {
                tokio::select! {
                    biased;
                    _ = inner.shutdown.notified() => break,
                    _ = ticker.tick() => {}
                }
                if inner.state() != TtlManagerState::Running {
                    break;
                }
                // Not raced against shutdown: a started heartbeat runs to completion.
                inner.keep_alive().await;
            }
            debug!("ttl manager of {:?} exited", inner.primary_lock);
        });
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    /// Stop the heartbeat schedule without waiting for it.
    ///
    /// A heartbeat already in flight completes; no new one starts. Returns `false` if the
    /// manager is not running.
    pub fn stop(&self) -> bool {
        if self
            .inner
            .transit(TtlManagerState::Running, TtlManagerState::Closed)
            .is_err()
        {
            return false;
        }
        self.inner.shutdown.notify_one();
        true
    }

    /// [`stop`](TtlManager::stop), then wait for the background task to exit.
    pub async fn stop_and_wait(&self) -> Result<bool> {
        let stopped = self.stop();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.await?;
        }
        Ok(stopped)
    }

    pub fn is_running(&self) -> bool {
        self.inner.state() == TtlManagerState::Running
    }

    pub fn start_ts(&self) -> u64 {
        self.inner.start_ts
    }

    pub fn primary_lock(&self) -> &Key {
        &self.inner.primary_lock
    }

    /// The TTL requested by the most recent heartbeat, `0` before the first one.
    pub fn last_ttl(&self) -> u64 {
        self.inner.last_ttl.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::Acquire)
    }

    /// Whether failed heartbeats have covered a whole TTL window, so the store may already
    /// consider the primary lock expired.
    pub fn lock_may_have_expired(&self) -> bool {
        failures_cover_ttl(self.consecutive_failures())
    }
}

impl Drop for TtlManager {
    fn drop(&mut self) {
        if self.stop() {
            debug!("ttl manager of {:?} dropped while running", self.inner.primary_lock);
        }
    }
}

fn failures_cover_ttl(failures: u32) -> bool {
    u64::from(failures) * SCHEDULER_PERIOD_MS >= MANAGED_LOCK_TTL
}

impl Inner {
    fn state(&self) -> TtlManagerState {
        self.state.load(Ordering::Acquire).into()
    }

    fn transit(
        &self,
        from: TtlManagerState,
        to: TtlManagerState,
    ) -> std::result::Result<(), TtlManagerState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(TtlManagerState::from)
    }

    async fn keep_alive(&self) {
        let now = match self.client.get_timestamp().await {
            Ok(now) => now,
            Err(e) => {
                warn!(
                    "keep alive of {:?} skipped, no timestamp: {}",
                    self.primary_lock, e
                );
                self.record_failure("timestamp_unavailable");
                return;
            }
        };
        let uptime = u64::try_from(now.physical - extract_physical(self.start_ts)).unwrap_or(0);
        let ttl = uptime + MANAGED_LOCK_TTL;
        self.last_ttl.store(ttl, Ordering::Release);

        info!(
            "keep alive key={:?} uptime={} ttl={}",
            self.primary_lock, uptime, ttl
        );

        let mut bo = Backoffer::new_custom(MANAGED_LOCK_TTL);
        match self.send_txn_heartbeat(&mut bo, ttl).await {
            Ok(()) => {
                info!("keep alive success");
                self.record_success();
            }
            Err(e) => {
                warn!("keep alive error: {}", e);
                self.record_failure("rpc_failed");
            }
        }
    }

    async fn send_txn_heartbeat(&self, bo: &mut Backoffer, ttl: u64) -> Result<()> {
        let region_manager = self.client.region_manager();
        loop {
            let target = region_manager
                .region_store_for_key(&self.primary_lock)
                .await
                .map_err(|e| Error::HeartbeatFailed {
                    message: format!("txn heartbeat error, no region for {:?}", self.primary_lock),
                    source: Box::new(e),
                })?;
            let region_id = target.region.id;
            let result = self
                .client
                .txn_heartbeat(bo, self.primary_lock.clone(), self.start_ts, ttl, &target)
                .await;
            match result {
                ClientRpcResult::Success => {
                    debug!(
                        "txn heartbeat success key={:?} ttl={}",
                        self.primary_lock, ttl
                    );
                    return Ok(());
                }
                ClientRpcResult::Fatal(e) => {
                    return Err(Error::HeartbeatFailed {
                        message: format!("txn heartbeat error, region_id={region_id}"),
                        source: Box::new(e),
                    });
                }
                ClientRpcResult::Retryable(e) => {
                    let message = format!("txn heartbeat failed, region_id={region_id}: {e}");
                    if let Err(bo_err) = bo.backoff(&BO_REGION_MISS, message).await {
                        return Err(Error::HeartbeatFailed {
                            message: format!(
                                "txn heartbeat error, region_id={region_id}, detail={bo_err}"
                            ),
                            source: Box::new(e),
                        });
                    }
                    region_manager.invalidate_store(target.store.id).await;
                    region_manager.invalidate_region(&target.region).await;
                }
            }
        }
    }

    fn record_success(&self) {
        observe_heartbeat("ok");
        self.consecutive_failures.store(0, Ordering::Release);
        self.expiry_reported.store(false, Ordering::Release);
    }

    fn record_failure(&self, result: &'static str) {
        observe_heartbeat(result);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures_cover_ttl(failures) && !self.expiry_reported.swap(true, Ordering::AcqRel) {
            error!(
                "primary lock {:?} of txn {} may have expired after {} failed heartbeats",
                self.primary_lock, self.start_ts, failures
            );
        }
    }
}
