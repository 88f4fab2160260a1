// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeMap;

use fail::fail_point;
use log::debug;
use log::info;
use log::warn;

use super::ClientRpcResult;
use super::TtlManager;
use super::TxnKvClient;
use super::MANAGED_LOCK_TTL;
use crate::backoffer::Backoffer;
use crate::backoffer::BO_REGION_MISS;
use crate::config::duration_ms;
use crate::region::RegionStore;
use crate::Error;
use crate::Key;
use crate::Mutation;
use crate::Result;
use crate::Timestamp;

/// Drives one transaction through two-phase commit.
///
/// Mutations are sorted by key; the smallest key is the primary. Legs are sent one region
/// at a time: prewrite the primary's region, start the [`TtlManager`], prewrite the rest,
/// fetch the commit timestamp, commit the primary, then the secondaries. Once the primary is
/// committed the transaction is committed, so secondary failures are only logged.
pub struct TwoPhaseCommitter {
    client: TxnKvClient,
    start_ts: u64,
    mutations: Vec<Mutation>,
    ttl_manager: Option<TtlManager>,
}

impl TwoPhaseCommitter {
    /// Later mutations of the same key replace earlier ones.
    pub fn new(
        client: TxnKvClient,
        start_ts: Timestamp,
        mutations: impl IntoIterator<Item = Mutation>,
    ) -> TwoPhaseCommitter {
        let mutations: BTreeMap<Key, Mutation> = mutations
            .into_iter()
            .map(|m| (m.key().clone(), m))
            .collect();
        TwoPhaseCommitter {
            client,
            start_ts: start_ts.version(),
            mutations: mutations.into_values().collect(),
            ttl_manager: None,
        }
    }

    pub fn primary_key(&self) -> Option<&Key> {
        self.mutations.first().map(Mutation::key)
    }

    /// Run both phases and return the commit timestamp.
    ///
    /// A failure after the primary key may have been committed is reported as
    /// [`Error::UndeterminedError`].
    pub async fn commit(mut self) -> Result<Timestamp> {
        let primary = self.primary_key().cloned().ok_or(Error::NoPrimaryKey)?;
        debug!("committing txn {} with primary {:?}", self.start_ts, primary);

        self.prewrite(&primary).await.map_err(|e| Error::TwoPhaseCommit {
            phase: "prewrite",
            source: Box::new(e),
        })?;

        fail_point!("after-prewrite", |_| {
            Err(Error::StringError(
                "failpoint: after-prewrite return error".to_owned(),
            ))
        });

        let commit_ts = self.client.get_timestamp().await;
        if let Some(manager) = &self.ttl_manager {
            manager.stop();
        }
        let commit_ts = commit_ts?;

        self.commit_primary(&primary, commit_ts.version()).await?;
        info!("txn {} committed at {}", self.start_ts, commit_ts);
        self.commit_secondaries(&primary, commit_ts.version()).await;
        Ok(commit_ts)
    }

    async fn prewrite(&mut self, primary: &Key) -> Result<()> {
        let mut bo = Backoffer::new(duration_ms(self.client.config().prewrite_max_backoff));
        let mut mutations = std::mem::take(&mut self.mutations);
        let secondaries = {
            let primary_region = self
                .client
                .region_manager()
                .region_store_for_key(primary)
                .await?
                .region;
            let split = mutations
                .iter()
                .position(|m| !primary_region.contains(m.key()))
                .unwrap_or(mutations.len());
            mutations.split_off(split)
        };

        let res = self.prewrite_mutations(&mut bo, primary, mutations.clone()).await;
        self.mutations = mutations;
        res?;

        if self.client.config().enable_ttl_manager {
            let manager = TtlManager::new(self.client.clone(), self.start_ts, primary.clone());
            manager.start();
            self.ttl_manager = Some(manager);
        }

        let res = self
            .prewrite_mutations(&mut bo, primary, secondaries.clone())
            .await;
        self.mutations.extend(secondaries);
        res
    }

    async fn prewrite_mutations(
        &self,
        bo: &mut Backoffer,
        primary: &Key,
        mutations: Vec<Mutation>,
    ) -> Result<()> {
        let mut pending = vec![mutations];
        while let Some(batch) = pending.pop() {
            for (target, group) in self.group_by_region(batch).await? {
                let result = self
                    .client
                    .prewrite(
                        bo,
                        group.clone(),
                        primary.clone(),
                        MANAGED_LOCK_TTL,
                        self.start_ts,
                        &target,
                    )
                    .await;
                if self.retry_after_backoff(bo, result, &target).await? {
                    pending.push(group);
                }
            }
        }
        Ok(())
    }

    async fn commit_primary(&self, primary: &Key, commit_ts: u64) -> Result<()> {
        let mut bo = Backoffer::new(duration_ms(self.client.config().commit_max_backoff));
        let region_manager = self.client.region_manager();
        let mut sent = false;
        loop {
            let target = match region_manager.region_store_for_key(primary).await {
                Ok(target) => target,
                Err(e) if sent => return Err(Error::UndeterminedError(Box::new(e))),
                Err(e) => {
                    return Err(Error::TwoPhaseCommit {
                        phase: "commit",
                        source: Box::new(e),
                    })
                }
            };
            let result = self
                .client
                .commit(
                    &mut bo,
                    vec![primary.clone()],
                    self.start_ts,
                    commit_ts,
                    &target,
                )
                .await;
            sent = true;
            match self.retry_after_backoff(&mut bo, result, &target).await {
                Ok(false) => return Ok(()),
                Ok(true) => {}
                // The primary lock is gone without a commit record: the txn was rolled back.
                Err(e @ (Error::TxnNotFound { .. } | Error::TxnAborted { .. })) => {
                    warn!(
                        "commit primary {:?} of txn {} rejected: {}",
                        primary, self.start_ts, e
                    );
                    return Err(Error::TwoPhaseCommit {
                        phase: "commit",
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        "commit primary {:?} of txn {} undetermined: {}",
                        primary, self.start_ts, e
                    );
                    return Err(Error::UndeterminedError(Box::new(e)));
                }
            }
        }
    }

    async fn commit_secondaries(&self, primary: &Key, commit_ts: u64) {
        let keys: Vec<Key> = self
            .mutations
            .iter()
            .map(|m| m.key().clone())
            .filter(|key| key != primary)
            .collect();
        if keys.is_empty() {
            return;
        }
        let mut bo = Backoffer::new(duration_ms(self.client.config().commit_max_backoff));
        if let Err(e) = self.commit_keys(&mut bo, keys, commit_ts).await {
            warn!(
                "commit secondaries of txn {} failed, locks are left to be resolved: {}",
                self.start_ts, e
            );
        }
    }

    async fn commit_keys(&self, bo: &mut Backoffer, keys: Vec<Key>, commit_ts: u64) -> Result<()> {
        let mut pending = vec![keys];
        while let Some(batch) = pending.pop() {
            for (target, group) in self.group_by_region(batch).await? {
                let result = self
                    .client
                    .commit(bo, group.clone(), self.start_ts, commit_ts, &target)
                    .await;
                if self.retry_after_backoff(bo, result, &target).await? {
                    pending.push(group);
                }
            }
        }
        Ok(())
    }

    /// `Ok(true)` when the leg should be re-sent after refreshing its region.
    async fn retry_after_backoff(
        &self,
        bo: &mut Backoffer,
        result: ClientRpcResult,
        target: &RegionStore,
    ) -> Result<bool> {
        let e = match result {
            ClientRpcResult::Success => return Ok(false),
            ClientRpcResult::Fatal(e) => return Err(e),
            ClientRpcResult::Retryable(e) => e,
        };
        // A committed conflicting write or a rolled-back lock will still be there after any
        // backoff.
        if is_final_key_error(&e) {
            return Err(e);
        }
        let region_id = target.region.id;
        let message = format!("txn {} failed on region {}: {}", self.start_ts, region_id, e);
        if let Err(bo_err) = bo.backoff(&BO_REGION_MISS, message).await {
            warn!("txn {} gave up on region {}: {}", self.start_ts, region_id, bo_err);
            return Err(e);
        }
        let region_manager = self.client.region_manager();
        region_manager.invalidate_store(target.store.id).await;
        region_manager.invalidate_region(&target.region).await;
        Ok(true)
    }

    /// Split sorted items into runs served by the same region.
    async fn group_by_region<T: AsRef<Key>>(
        &self,
        items: Vec<T>,
    ) -> Result<Vec<(RegionStore, Vec<T>)>> {
        let region_manager = self.client.region_manager();
        let mut groups: Vec<(RegionStore, Vec<T>)> = Vec::new();
        for item in items {
            match groups.last_mut() {
                Some((target, group)) if target.region.contains(item.as_ref()) => group.push(item),
                _ => {
                    let target = region_manager.region_store_for_key(item.as_ref()).await?;
                    groups.push((target, vec![item]));
                }
            }
        }
        Ok(groups)
    }
}

fn is_final_key_error(e: &Error) -> bool {
    matches!(
        e,
        Error::WriteConflict(_)
            | Error::KeyExists { .. }
            | Error::TxnNotFound { .. }
            | Error::TxnAborted { .. }
    )
}
