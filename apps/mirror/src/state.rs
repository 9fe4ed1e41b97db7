use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::{InvalidationBus, Subscription};
use crate::cache::QueryCache;
use crate::config::Config;
use crate::reconcile::{MutationPolicy, Reconciler};
use crate::remote::{HttpRemote, RemoteApi};
use crate::store::{FileStore, SharedStore, StorageEvents};

/// Everything one application instance needs, built once and passed by
/// reference. Cloning shares the same store, bus and cache.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: SharedStore,
    pub remote: Arc<dyn RemoteApi>,
    pub bus: InvalidationBus,
    pub cache: Arc<QueryCache>,
    pub reconciler: Arc<Reconciler>,
    /// Keeps the cache subscribed for as long as any clone of the state lives.
    _cache_subscription: Arc<Subscription>,
    _storage_listener: Arc<ListenerGuard>,
}

/// Stops the storage-change forwarder when the last clone of the state drops.
struct ListenerGuard(JoinHandle<()>);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        debug!("Stopping storage listener");
        self.0.abort();
    }
}

impl AppState {
    /// Must be called from within a Tokio runtime: the storage-change
    /// listener is spawned here.
    pub fn from_config(config: Config) -> Result<Self> {
        let file_store = FileStore::open(&config.mirror_dir)?;
        Self::with_events(config, file_store, StorageEvents::new())
    }

    /// Builds an instance on an existing storage-change hub, so several
    /// instances over one directory see each other's writes.
    pub fn with_events(
        config: Config,
        file_store: FileStore,
        events: StorageEvents,
    ) -> Result<Self> {
        let store = SharedStore::new(Arc::new(file_store), events.clone());
        let tab = store.tab();

        let remote: Arc<dyn RemoteApi> = Arc::new(
            HttpRemote::new(
                config.api_base_url.clone(),
                config.api_token.clone(),
                config.remote_timeout(),
            )
            .context("Failed to build HTTP client")?,
        );

        let bus = InvalidationBus::new();
        let cache = Arc::new(QueryCache::new());
        let cache_subscription = cache.attach(&bus);

        let reconciler = Arc::new(Reconciler::new(
            Arc::new(store.clone()),
            remote.clone(),
            bus.clone(),
            MutationPolicy::from_config(&config),
        ));

        let listener = bus.listen_storage(events.subscribe(), tab);
        info!("Mirror instance {tab} ready (remote: {})", config.api_base_url);

        Ok(AppState {
            config,
            store,
            remote,
            bus,
            cache,
            reconciler,
            _cache_subscription: Arc::new(cache_subscription),
            _storage_listener: Arc::new(ListenerGuard(listener)),
        })
    }
}
