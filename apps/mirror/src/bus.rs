//! Cache invalidation signal.
//!
//! One bus per application instance, passed by reference. Publishing takes a
//! set of query keys; every subscriber whose registered key is a prefix of at
//! least one published key is told which of the published keys matched.
//! Delivery is fire-and-forget: a subscriber that errors or panics is logged
//! and skipped, the rest still hear the publication.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::keys::{Namespace, QueryKey};
use crate::store::{StorageChange, TabId};

pub trait Subscriber: Send + Sync {
    /// `keys` is the non-empty subset of a publication matching this
    /// subscriber's registered key.
    fn on_invalidate(&self, keys: &[QueryKey]) -> anyhow::Result<()>;
}

impl<F> Subscriber for F
where
    F: Fn(&[QueryKey]) -> anyhow::Result<()> + Send + Sync,
{
    fn on_invalidate(&self, keys: &[QueryKey]) -> anyhow::Result<()> {
        self(keys)
    }
}

struct Registration {
    id: u64,
    key: QueryKey,
    subscriber: Arc<dyn Subscriber>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    registrations: RwLock<Vec<Registration>>,
}

impl BusInner {
    fn unsubscribe(&self, id: u64) {
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registrations.retain(|r| r.id != id);
    }
}

#[derive(Clone, Default)]
pub struct InvalidationBus {
    inner: Arc<BusInner>,
}

/// Keeps a subscriber registered; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

impl InvalidationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, key: QueryKey, subscriber: Arc<dyn Subscriber>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("Subscriber {id} registered for {key}");
        self.inner
            .registrations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Registration {
                id,
                key,
                subscriber,
            });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscribe_fn<F>(&self, key: QueryKey, callback: F) -> Subscription
    where
        F: Fn(&[QueryKey]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(key, Arc::new(callback))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .registrations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Returns how many subscribers were notified.
    pub fn publish(&self, keys: &[QueryKey]) -> usize {
        // Snapshot so callbacks may subscribe or unsubscribe re-entrantly.
        let targets: Vec<(u64, Vec<QueryKey>, Arc<dyn Subscriber>)> = {
            let registrations = self
                .inner
                .registrations
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            registrations
                .iter()
                .filter_map(|r| {
                    let matching: Vec<QueryKey> = keys
                        .iter()
                        .filter(|k| r.key.is_prefix_of(k))
                        .cloned()
                        .collect();
                    (!matching.is_empty()).then(|| (r.id, matching, r.subscriber.clone()))
                })
                .collect()
        };

        for (id, matching, subscriber) in &targets {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_invalidate(matching))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Subscriber {id} failed to refresh: {e:#}"),
                Err(_) => error!("Subscriber {id} panicked while refreshing"),
            }
        }
        debug!(
            "Published {} keys to {} subscribers",
            keys.len(),
            targets.len()
        );
        targets.len()
    }

    /// Treats a write made by another instance as a local publication.
    /// Own writes and keys outside the mirror namespaces are ignored.
    pub fn handle_storage_change(&self, change: &StorageChange, own_tab: TabId) -> bool {
        if change.origin == own_tab {
            return false;
        }
        match Namespace::parse_key(&change.key) {
            Some((namespace, parent)) => {
                debug!("Cross-instance change on {}", change.key);
                self.publish(&namespace.dependent_queries(parent, None));
                true
            }
            None => false,
        }
    }

    /// Forwards storage changes from other instances until the hub closes.
    pub fn listen_storage(
        &self,
        mut changes: broadcast::Receiver<StorageChange>,
        own_tab: TabId,
    ) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        bus.handle_storage_change(&change, own_tab);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {missed} storage changes, invalidating top-level views");
                        bus.publish(&[
                            QueryKey::applications(),
                            QueryKey::contacts(),
                            QueryKey::followups_needed(),
                            QueryKey::upcoming_interviews(),
                        ]);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Storage listener for {own_tab} stopped");
        })
    }
}
