//! HTTP surface reporting the last known leader.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use elector_core::Result;
use elector_engine::LeaderObserver;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Body of the status response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderData {
    pub name: String,
}

/// Router answering `GET <path>` with the observer's current leader.
///
/// The handler only reads the observer, so it never waits on the election.
pub fn status_router(observer: Arc<LeaderObserver>, path: &str) -> Router {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    Router::new()
        .route(&path, get(leader_status))
        .with_state(observer)
}

async fn leader_status(State(observer): State<Arc<LeaderObserver>>) -> Json<LeaderData> {
    Json(LeaderData {
        name: observer.get_leader(),
    })
}

/// Serve `router` on `listener` until `shutdown` turns `true`.
pub async fn serve_status(
    listener: TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Status endpoint listening on {}", addr);
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    info!("Status endpoint stopped");
    Ok(())
}
