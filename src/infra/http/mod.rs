mod middleware;
mod public;

pub use middleware::{REQUEST_ID_HEADER, RequestId};
pub use public::{HttpState, build_router};

use std::{future::IntoFuture, sync::Arc, time::Duration};

use axum::Router;
use tokio::{net::TcpListener, sync::Notify};
use tracing::{info, warn};

use super::error::InfraError;

/// Run `router` on `listener` until Ctrl-C, then give in-flight requests
/// `grace` to finish before returning.
pub async fn serve(listener: TcpListener, router: Router, grace: Duration) -> Result<(), InfraError> {
    let addr = listener.local_addr()?;
    info!(
        target = "tessera::http",
        op = "serve",
        addr = %addr,
        "Listening for asset requests"
    );

    let stopping = Arc::new(Notify::new());
    let signal = {
        let stopping = stopping.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(
                    target = "tessera::http",
                    op = "serve",
                    error = %err,
                    "Failed to listen for shutdown signal"
                );
                std::future::pending::<()>().await;
            }
            info!(target = "tessera::http", op = "serve", "Shutdown requested");
            stopping.notify_one();
        }
    };

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(signal)
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result.map_err(InfraError::from),
        _ = async {
            stopping.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "tessera::http",
                op = "serve",
                grace_ms = grace.as_millis() as u64,
                "Graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}
