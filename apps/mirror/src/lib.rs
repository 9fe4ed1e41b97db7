//! Offline-first mirror for the job-search tracker: every editor mutation is
//! written to a local store and to the remote API, and the queries that
//! depend on it are invalidated on a pub/sub bus shared by every view.

pub mod actions;
pub mod bus;
pub mod cache;
pub mod config;
pub mod errors;
pub mod keys;
pub mod models;
pub mod reconcile;
pub mod remote;
pub mod state;
pub mod store;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use bus::{InvalidationBus, Subscriber, Subscription};
pub use config::Config;
pub use errors::{ErrorKind, MutationError, RemoteError, StoreError};
pub use keys::{Collection, Namespace, QueryKey};
pub use reconcile::{ChannelOutcome, Fetched, MutationPolicy, MutationReport, Reconciler, Source};
pub use state::AppState;
