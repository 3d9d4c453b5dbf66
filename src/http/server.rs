//! HTTP server setup.
//!
//! Wraps a router with the shared middleware stack (request context,
//! timeout, body limit, tracing) and serves it until shutdown.

use std::net::SocketAddr;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::schema::AdminConfig;
use crate::http::request::request_context_middleware;
use crate::lifecycle::shutdown::Shutdown;

/// HTTP server for the admin API.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Wrap `routes` with the middleware configured in `config`.
    pub fn new(routes: Router, config: &AdminConfig) -> Self {
        Self {
            router: Self::build_router(routes, config),
        }
    }

    #[allow(deprecated)]
    fn build_router(routes: Router, config: &AdminConfig) -> Router {
        routes
            .layer(TimeoutLayer::new(config.request_timeout()))
            .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
            .layer(middleware::from_fn(request_context_middleware))
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut stop = shutdown.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("HTTP server shutting down");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
