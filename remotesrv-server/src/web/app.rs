use std::net::SocketAddr;

use anyhow::Result;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::Level;

use crate::endpoints::{self, Protocols};
use crate::state::ServiceState;
use crate::web::middleware as m;

/// The application serving one listener.
#[derive(Debug)]
pub struct App {
    router: axum::Router,
}

impl App {
    /// Creates the application router for the given protocols.
    ///
    /// Use [`serve`](Self::serve) to run the server future.
    pub fn new(state: ServiceState, protocols: Protocols) -> Self {
        // Service builder order defines layers added first will be called first. This means:
        //  - Requests go from top to bottom
        //  - Responses go from bottom to top
        let middleware = ServiceBuilder::new()
            .layer(CatchPanicLayer::custom(m::handle_panic))
            .layer(m::set_server_header())
            .layer(NewSentryLayer::new_from_top())
            .layer(SentryHttpLayer::new().enable_transaction())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(m::make_http_span)
                    .on_failure(DefaultOnFailure::new().level(Level::DEBUG)),
            );

        let router = endpoints::routes(protocols)
            .layer(middleware)
            .with_state(state);

        App { router }
    }

    /// Runs the server on `listener` until `shutdown` is cancelled.
    ///
    /// After cancellation, the listener stops accepting connections and the future resolves once
    /// all in-flight requests have completed.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let service = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, service)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        Ok(())
    }
}
