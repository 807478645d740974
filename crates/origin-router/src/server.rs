//! Axum listeners: dispatch and admin, startup population and graceful
//! shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::admin::{self, AdminState};
use crate::config::RouterConfig;
use crate::dispatch::{self, proxy, Dispatcher};
use crate::routing::RouteTable;
use crate::store::{PersistQueue, RouteStore};

/// Router for the dispatch listener. Every method and path is routed by
/// the peer's address alone.
pub fn dispatch_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .fallback(dispatch::handle)
        .with_state(dispatcher)
}

/// Load routes, start both listeners and run until a shutdown signal.
pub async fn run(config: RouterConfig) -> anyhow::Result<()> {
    // The table is fully populated before any listener accepts a connection.
    let store = RouteStore::new(&config.storage.path);
    let routes = Arc::new(RouteTable::from_routes(store.load()?));
    tracing::info!(
        path = %store.path().display(),
        routes = routes.len(),
        "Routes loaded"
    );

    let client = proxy::build_client(&config.proxy)?;
    let dispatcher = Arc::new(Dispatcher::new(routes.clone(), client));
    let persist = PersistQueue::new(store, routes.clone());

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let dispatch_listener = TcpListener::bind(&config.server.listen_address).await?;
    tracing::info!(address = %config.server.listen_address, "Dispatch listener ready");

    let admin_listener = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.listen_address).await?;
        tracing::info!(address = %config.admin.listen_address, "Admin API listening");
        Some(listener)
    } else {
        tracing::info!("Admin API disabled");
        None
    };

    let dispatch_server = async {
        axum::serve(
            dispatch_listener,
            dispatch_router(dispatcher).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
    };

    let admin_state = AdminState {
        routes: routes.clone(),
        persist: persist.clone(),
    };
    let admin_server = async {
        match admin_listener {
            Some(listener) => {
                axum::serve(listener, admin::router(admin_state))
                    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                    .await
            }
            None => Ok(()),
        }
    };

    let served = tokio::try_join!(dispatch_server, admin_server);
    if let Err(ref e) = served {
        tracing::error!(error = %e, "Listener failed, shutting down");
        shutdown.cancel();
    }

    // Acknowledged mutations reach the store before the process exits.
    persist.drain().await;

    served?;
    tracing::info!("origin-router shut down gracefully");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then cancel `token`.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections...");
    token.cancel();
}
