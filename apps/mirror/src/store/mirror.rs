use std::sync::Arc;

use tracing::warn;

use crate::errors::{ErrorKind, StoreError};
use crate::keys::Collection;
use crate::models::Record;
use crate::store::LocalStore;

/// Typed access to mirror lists on top of a raw [`LocalStore`].
#[derive(Clone)]
pub struct Mirror {
    store: Arc<dyn LocalStore>,
}

impl Mirror {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Reads the mirror list. Absent, unreadable and malformed lists all
    /// come back empty; the latter two are logged and never fatal.
    pub fn load<R: Record>(&self, collection: &Collection<R>) -> Vec<R> {
        let key = collection.storage_key();
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(kind = %ErrorKind::Persistence, "Local mirror {key} unreadable, treating as empty: {e}");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<R>>(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(kind = %ErrorKind::Persistence, "Local mirror {key} is malformed, treating as empty: {e}");
                Vec::new()
            }
        }
    }

    pub fn save<R: Record>(
        &self,
        collection: &Collection<R>,
        records: &[R],
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(records)?;
        self.store.set(&collection.storage_key(), &raw)
    }

    /// Like [`Mirror::save`], but skips the write when the stored list is
    /// already identical so instances refreshing the same remote data stop
    /// announcing changes to each other.
    pub fn replace<R: Record>(
        &self,
        collection: &Collection<R>,
        records: &[R],
    ) -> Result<bool, StoreError> {
        let key = collection.storage_key();
        let raw = serde_json::to_string(records)?;
        if matches!(self.store.get(&key), Ok(Some(existing)) if existing == raw) {
            return Ok(false);
        }
        self.store.set(&key, &raw)?;
        Ok(true)
    }

    pub fn clear<R: Record>(&self, collection: &Collection<R>) -> Result<(), StoreError> {
        self.store.remove(&collection.storage_key())
    }
}
