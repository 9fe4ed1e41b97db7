use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::store::LocalStore;

const CHANNEL_CAPACITY: usize = 256;

/// Identity of one application instance sharing a backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(Uuid);

impl TabId {
    pub fn new() -> Self {
        TabId(Uuid::new_v4())
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notification that a key changed in the shared backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub origin: TabId,
    pub removed: bool,
}

/// Broadcast hub shared by every instance writing to the same backing store.
#[derive(Debug, Clone)]
pub struct StorageEvents {
    tx: broadcast::Sender<StorageChange>,
}

impl StorageEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.tx.subscribe()
    }

    /// Number of live receivers on the hub.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn emit(&self, change: StorageChange) {
        // No receivers is the normal single-instance case.
        if self.tx.send(change).is_err() {
            debug!("Storage change dropped: no listeners");
        }
    }
}

impl Default for StorageEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// A view of a backing store owned by one instance. Successful writes are
/// announced to every other instance on the same [`StorageEvents`] hub,
/// tagged with this instance's [`TabId`].
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<dyn LocalStore>,
    tab: TabId,
    events: StorageEvents,
}

impl SharedStore {
    pub fn new(inner: Arc<dyn LocalStore>, events: StorageEvents) -> Self {
        Self {
            inner,
            tab: TabId::new(),
            events,
        }
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn events(&self) -> &StorageEvents {
        &self.events
    }
}

impl LocalStore for SharedStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value)?;
        self.events.emit(StorageChange {
            key: key.to_string(),
            origin: self.tab,
            removed: false,
        });
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key)?;
        self.events.emit(StorageChange {
            key: key.to_string(),
            origin: self.tab,
            removed: true,
        });
        Ok(())
    }
}
