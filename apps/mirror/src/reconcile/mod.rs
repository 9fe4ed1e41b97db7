//! Reconciling mutation: dual-write to the local mirror and the remote API,
//! then invalidate dependent queries.
//!
//! 1. Read the mirror list for the collection (empty if absent or unreadable).
//! 2. Shallow-merge the patch into the matching record, or create it. A
//!    partial patch for a record the mirror lacks skips the local side.
//! 3. Write the list back. A failed write is logged, never fatal.
//! 4. Send the same change to the remote. A failure is logged and the
//!    mirror stands in until the next successful fetch.
//! 5. Publish the collection's dependent query keys.
//! 6. Succeed if either channel accepted the write.
//!
//! Steps 1-3 run under a lock held by this instance, so two submits on one
//! collection never lose each other's local change. Instances sharing a
//! backing store do not share the lock: their read-modify-writes can still
//! interleave and the later write wins.
//!
//! Known race: the read-modify-write is not coordinated with list fetches.
//! A fetch whose GET was issued before a mutation and resolves after it
//! replaces the mirror with the older remote list.

pub mod policy;

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::bus::InvalidationBus;
use crate::errors::{ErrorKind, MutationError, RemoteError, RemoteFailure, StoreError};
use crate::keys::{Collection, QueryKey};
use crate::models::{sort_by_schedule, Record};
use crate::remote::{Method, RemoteApi, RemoteResponse, Routes};
use crate::store::{LocalStore, Mirror};

pub use policy::{MutationPolicy, RetryPolicy};

/// What happened on one side of a dual write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    Written,
    /// The collection has no remote route.
    Skipped,
    Failed(ErrorKind),
}

impl ChannelOutcome {
    pub fn accepted(&self) -> bool {
        matches!(self, ChannelOutcome::Written)
    }
}

#[derive(Debug, Clone)]
pub struct MutationReport<R> {
    /// The record as written to the mirror (for removals, the removed record).
    pub record: Option<R>,
    pub created: bool,
    pub local: ChannelOutcome,
    pub remote: ChannelOutcome,
    /// Query keys published after the write; empty when nothing was published.
    pub invalidated: Vec<QueryKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Remote,
    LocalMirror,
}

#[derive(Debug, Clone, Serialize)]
pub struct Fetched<R> {
    pub records: Vec<R>,
    pub source: Source,
}

/// What the local half of an upsert left behind.
struct LocalWrite<R> {
    record: Option<R>,
    created: bool,
    result: Result<(), StoreError>,
    previous: Vec<R>,
}

pub struct Reconciler {
    mirror: Mirror,
    /// Serialises read-modify-write of mirror lists within this instance.
    mirror_lock: Mutex<()>,
    remote: Arc<dyn RemoteApi>,
    bus: InvalidationBus,
    policy: MutationPolicy,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteApi>,
        bus: InvalidationBus,
        policy: MutationPolicy,
    ) -> Self {
        Self {
            mirror: Mirror::new(store),
            mirror_lock: Mutex::new(()),
            remote,
            bus,
            policy,
        }
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn bus(&self) -> &InvalidationBus {
        &self.bus
    }

    pub fn policy(&self) -> &MutationPolicy {
        &self.policy
    }

    /// Id for a record created before the server has assigned one.
    pub fn next_local_id<R: Record>(&self, collection: &Collection<R>) -> i64 {
        let now = Utc::now().timestamp_millis();
        let max = self
            .mirror
            .load(collection)
            .iter()
            .map(Record::id)
            .max()
            .unwrap_or(0);
        now.max(max.saturating_add(1))
    }

    /// Applies `patch` to record `id`, creating it when the mirror does not
    /// hold it yet. Creation requires the entity's minimal fields in `patch`.
    /// A partial patch for a record the mirror does not hold still goes to
    /// the remote; the local side counts as failed.
    pub async fn upsert<R: Record>(
        &self,
        collection: &Collection<R>,
        id: i64,
        patch: R::Patch,
    ) -> Result<MutationReport<R>, MutationError> {
        let routes = Routes::for_collection(collection.namespace(), collection.parent());
        let LocalWrite {
            record,
            created,
            result: local,
            previous,
        } = self.upsert_local(collection, id, &patch, routes.is_some())?;

        let remote = match routes {
            None => Err(RemoteFailure::NoRoute),
            Some(routes) => {
                let (method, path) = if created {
                    routes.create()
                } else {
                    routes.update(id)
                };
                let body = match (&record, created) {
                    (Some(record), true) => serde_json::to_value(record),
                    _ => serde_json::to_value(&patch),
                };
                match body {
                    Ok(body) => self
                        .write_remote(method, &path, Some(&body))
                        .await
                        .map_err(RemoteFailure::from),
                    Err(e) => Err(RemoteFailure::Error(RemoteError::Decode(e))),
                }
            }
        };

        let (local, remote, invalidated) =
            self.settle(collection, Some(id), local, remote, &previous)?;
        info!(
            "Upserted {} in {} (created: {created}, local: {local:?}, remote: {remote:?})",
            id,
            collection.storage_key()
        );
        Ok(MutationReport {
            record,
            created,
            local,
            remote,
            invalidated,
        })
    }

    /// Removes record `id` from the mirror and the remote.
    pub async fn remove<R: Record>(
        &self,
        collection: &Collection<R>,
        id: i64,
    ) -> Result<MutationReport<R>, MutationError> {
        let (previous, removed, local) = {
            let _guard = self.lock_mirror();
            let previous = self.mirror.load(collection);
            let mut records = previous.clone();
            let position = records.iter().position(|r| r.id() == id);
            let removed = position.map(|index| records.remove(index));
            let local = self.write_local(collection, &records);
            (previous, removed, local)
        };

        let remote = match Routes::for_collection(collection.namespace(), collection.parent()) {
            None => Err(RemoteFailure::NoRoute),
            Some(routes) => {
                let (method, path) = routes.delete(id);
                self.write_remote(method, &path, None)
                    .await
                    .map_err(RemoteFailure::from)
            }
        };

        let (local, remote, invalidated) =
            self.settle(collection, Some(id), local, remote, &previous)?;
        info!(
            "Removed {} from {} (local: {local:?}, remote: {remote:?})",
            id,
            collection.storage_key()
        );
        Ok(MutationReport {
            record: removed,
            created: false,
            local,
            remote,
            invalidated,
        })
    }

    /// Reads a collection, preferring the remote. A successful remote read
    /// refreshes the mirror; any remote failure falls back to the mirror.
    pub async fn fetch<R: Record>(&self, collection: &Collection<R>) -> Fetched<R> {
        let Some(routes) = Routes::for_collection(collection.namespace(), collection.parent())
        else {
            return Fetched {
                records: self.mirror.load(collection),
                source: Source::LocalMirror,
            };
        };

        let (method, path) = routes.list();
        let result = self
            .remote
            .request(method, &path, None)
            .await
            .and_then(decode_list::<R>);

        match result {
            Ok(mut records) => {
                sort_by_schedule(&mut records);
                let refreshed = {
                    let _guard = self.lock_mirror();
                    self.mirror.replace(collection, &records)
                };
                match refreshed {
                    Ok(changed) => debug!("Mirror {} refreshed (changed: {changed})", collection.storage_key()),
                    Err(e) => warn!(kind = %e.kind(), "Could not refresh mirror {}: {e}", collection.storage_key()),
                }
                Fetched {
                    records,
                    source: Source::Remote,
                }
            }
            Err(e) => {
                log_remote_failure(method, &path, &e);
                Fetched {
                    records: self.mirror.load(collection),
                    source: Source::LocalMirror,
                }
            }
        }
    }

    fn upsert_local<R: Record>(
        &self,
        collection: &Collection<R>,
        id: i64,
        patch: &R::Patch,
        has_route: bool,
    ) -> Result<LocalWrite<R>, MutationError> {
        let _guard = self.lock_mirror();
        let now = Utc::now();
        let previous = self.mirror.load(collection);
        let mut records = previous.clone();

        let (record, created) = match records.iter_mut().find(|r| r.id() == id) {
            Some(existing) => {
                existing.apply(patch);
                existing.touch(now);
                (Some(existing.clone()), false)
            }
            None => match R::from_patch(id, collection.owner(), patch, now) {
                Ok(mut record) => {
                    record.touch(now);
                    records.push(record.clone());
                    (Some(record), true)
                }
                Err(MutationError::Incomplete { field, .. }) if has_route => {
                    debug!(
                        "Record {id} not in {} and patch lacks `{field}`, sending update to remote only",
                        collection.storage_key()
                    );
                    (None, false)
                }
                Err(e) => return Err(e),
            },
        };

        let result = match &record {
            Some(_) => {
                sort_by_schedule(&mut records);
                self.write_local(collection, &records)
            }
            None => {
                let e = StoreError::NotMirrored {
                    key: collection.storage_key(),
                    id,
                };
                warn!(kind = %e.kind(), "{e}, continuing with remote");
                Err(e)
            }
        };

        Ok(LocalWrite {
            record,
            created,
            result,
            previous,
        })
    }

    fn lock_mirror(&self) -> MutexGuard<'_, ()> {
        self.mirror_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_local<R: Record>(
        &self,
        collection: &Collection<R>,
        records: &[R],
    ) -> Result<(), StoreError> {
        let result = self.mirror.save(collection, records);
        if let Err(e) = &result {
            warn!(kind = %e.kind(), "Local mirror write to {} failed, continuing with remote: {e}", collection.storage_key());
        }
        result
    }

    /// Sends a mutation. The response body is not used, so a 2xx whose body
    /// does not decode still counts as accepted.
    async fn write_remote(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(), RemoteError> {
        match self.send(method, path, body).await {
            Ok(_) => Ok(()),
            Err(RemoteError::Decode(e)) => {
                debug!("{method} {path} accepted with an undecodable body: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Single remote call with bounded retry on retryable failures.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<RemoteResponse, RemoteError> {
        let retry = &self.policy.retry;
        let mut attempt = 0;
        loop {
            match self.remote.request(method, path, body).await {
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    attempt += 1;
                    let delay = retry.delay(attempt);
                    warn!(
                        "{method} {path} failed ({e}), retry {attempt}/{} after {}ms",
                        retry.max_retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Applies the success/failure policy once both channels have answered.
    fn settle<R: Record>(
        &self,
        collection: &Collection<R>,
        record_id: Option<i64>,
        local: Result<(), StoreError>,
        remote: Result<(), RemoteFailure>,
        previous: &[R],
    ) -> Result<(ChannelOutcome, ChannelOutcome, Vec<QueryKey>), MutationError> {
        let remote = match remote {
            Err(RemoteFailure::Error(e))
                if self.policy.reject_on_validation_error
                    && e.kind() == ErrorKind::Validation =>
            {
                error!(kind = %e.kind(), "Remote rejected change to {}: {e}", collection.storage_key());
                if local.is_ok() {
                    let _guard = self.lock_mirror();
                    if let Err(restore) = self.mirror.save(collection, previous) {
                        warn!(kind = %restore.kind(), "Could not roll back mirror {}: {restore}", collection.storage_key());
                    }
                }
                return Err(MutationError::RemoteRejected(e));
            }
            other => other,
        };

        let remote_outcome = match &remote {
            Ok(()) => ChannelOutcome::Written,
            Err(RemoteFailure::NoRoute) => ChannelOutcome::Skipped,
            Err(RemoteFailure::Error(e)) => {
                log_remote_write_failure(collection.storage_key(), e);
                ChannelOutcome::Failed(e.kind())
            }
        };
        let local_outcome = match &local {
            Ok(()) => ChannelOutcome::Written,
            Err(e) => ChannelOutcome::Failed(e.kind()),
        };

        let keys = collection
            .namespace()
            .dependent_queries(collection.parent(), record_id);

        match (local, remote) {
            (Err(local), Err(remote)) => {
                if self.policy.notify_on_total_failure {
                    self.bus.publish(&keys);
                }
                Err(MutationError::Rejected { local, remote })
            }
            _ => {
                self.bus.publish(&keys);
                Ok((local_outcome, remote_outcome, keys))
            }
        }
    }
}

fn decode_list<R: Record>(response: RemoteResponse) -> Result<Vec<R>, RemoteError> {
    match response.body {
        Some(body) => Ok(serde_json::from_value(body)?),
        None => Ok(Vec::new()),
    }
}

fn log_remote_failure(method: Method, path: &str, e: &RemoteError) {
    match e.kind() {
        ErrorKind::Validation => {
            error!(kind = %e.kind(), "{method} {path} rejected by remote, using local mirror: {e}")
        }
        _ => warn!(kind = %e.kind(), "{method} {path} failed, using local mirror: {e}"),
    }
}

fn log_remote_write_failure(key: String, e: &RemoteError) {
    match e.kind() {
        ErrorKind::Validation => {
            error!(kind = %e.kind(), "Remote rejected change to {key}; keeping local write: {e}")
        }
        _ => warn!(kind = %e.kind(), "Remote write for {key} failed; local mirror stands in: {e}"),
    }
}

#[cfg(test)]
mod tests;
