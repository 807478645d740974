//! Tracked background persistence.
//!
//! Admin mutations apply to the route table first and then submit a write
//! here, so the table is always at least as fresh as the store. Writes run
//! on a [`TaskTracker`]; shutdown closes and drains it, so an acknowledged
//! mutation is never lost to process exit.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::RouteStore;
use crate::routing::RouteTable;

#[derive(Clone)]
pub struct PersistQueue {
    store: Arc<RouteStore>,
    routes: Arc<RouteTable>,
    tracker: TaskTracker,
    // Serialises writes; each one snapshots the table once it holds this,
    // so the last write to finish carries the latest state.
    write_lock: Arc<Mutex<()>>,
}

impl PersistQueue {
    pub fn new(store: RouteStore, routes: Arc<RouteTable>) -> Self {
        Self {
            store: Arc::new(store),
            routes,
            tracker: TaskTracker::new(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Schedule a write of the current route table.
    pub fn submit(&self, operation: &'static str, key: &str) {
        let store = self.store.clone();
        let routes = self.routes.clone();
        let write_lock = self.write_lock.clone();
        let span = tracing::debug_span!("persist_routes", operation, key = %key);

        self.tracker.spawn(
            async move {
                let _guard = write_lock.lock().await;
                let snapshot = routes.get_all();

                match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
                    Ok(Ok(())) => tracing::debug!("Route store updated"),
                    Ok(Err(e)) => tracing::error!(error = %e, "Error saving routes to store"),
                    Err(e) => tracing::error!(error = %e, "Route store writer panicked"),
                }
            }
            .instrument(span),
        );
    }

    /// Number of writes submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Close the queue and wait for every submitted write to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        tracing::info!(pending = self.pending(), "Waiting for route store writes to finish");
        self.tracker.wait().await;
    }
}
