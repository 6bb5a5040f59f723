//! Coordinated start and stop of a bootstrapped server.
//!
//! A [`Lifecycle`] moves through the [`Phase`]s in order. It starts serving in the background,
//! waits for its shutdown token, and then stops the server gracefully: listeners stop accepting
//! connections and in-flight requests run to completion. There is no deadline on the graceful
//! stop.
//!
//! The shutdown token is usually cancelled by [`cancel_on_signal`] when the process receives a
//! termination signal.

use anyhow::{Context, Result};
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::ServerHandle;

/// The phase of a [`Lifecycle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Listeners are bound but not yet accepting connections.
    Starting,
    /// Connections are being served.
    Serving,
    /// A graceful stop is in progress.
    Stopping,
    /// The server has stopped.
    Stopped,
}

/// Drives a server from start to graceful stop.
#[derive(Debug)]
pub struct Lifecycle {
    shutdown: CancellationToken,
    phase: watch::Sender<Phase>,
}

impl Lifecycle {
    /// Creates a lifecycle that stops once `shutdown` is cancelled.
    pub fn new(shutdown: CancellationToken) -> Self {
        let (phase, _) = watch::channel(Phase::Starting);
        Self { shutdown, phase }
    }

    /// Subscribes to phase changes.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Serves until shutdown is requested, then stops gracefully.
    ///
    /// Returns an error if serving ends on its own before shutdown was requested.
    pub async fn run(self, handle: ServerHandle) -> Result<()> {
        let (server, listeners) = handle.into_parts();

        let mut serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve(listeners).await }
        });
        self.phase.send_replace(Phase::Serving);
        tracing::info!("server started");

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {}
            joined = &mut serving => {
                self.phase.send_replace(Phase::Stopped);
                joined.context("server task panicked")??;
                anyhow::bail!("server stopped serving unexpectedly");
            }
        }

        self.phase.send_replace(Phase::Stopping);
        tracing::info!("stopping server gracefully ...");
        server.graceful_stop().await;

        let served = serving.await.context("server task panicked")?;
        self.phase.send_replace(Phase::Stopped);
        served.context("error while serving")?;

        tracing::info!("shutdown complete");
        Ok(())
    }
}

/// Cancels `shutdown` when the process receives SIGTERM, SIGINT, SIGHUP or SIGQUIT.
pub fn cancel_on_signal(shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        elegant_departure::tokio::depart()
            .on_termination()
            .on_sigint()
            .on_signal(SignalKind::hangup())
            .on_signal(SignalKind::quit())
            .await;

        tracing::info!("shutting down ...");
        shutdown.cancel();
    })
}
