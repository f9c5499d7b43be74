//! Supervisor of the three inbound pipelines.
//!
//! `NetworkServer` drains received radio frames, application payloads and
//! MAC commands from their backends, handing each item to its own worker
//! task. A failing or panicking worker only loses its own item. Shutdown
//! closes the backends, which ends their sequences, and then waits for every
//! worker still in flight.

mod error;
mod runtime;
mod worker;

use std::{future::Future, sync::Arc};

use log::info;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

pub use error::{CloseFailure, ShutdownError};
use runtime::{MAC_PAYLOADS, PipelineOptions, RX_PACKETS, TX_PAYLOADS, run_pipeline};

use crate::context::Context;

/// Packet-processing server built around a [`Context`].
pub struct NetworkServer {
    ctx: Arc<Context>,
}

impl NetworkServer {
    #[must_use]
    pub fn new(ctx: Context) -> Self { Self { ctx: Arc::new(ctx) } }

    /// Build a server sharing an existing context.
    #[must_use]
    pub fn from_shared(ctx: Arc<Context>) -> Self { Self { ctx } }

    #[must_use]
    pub fn context(&self) -> &Arc<Context> { &self.ctx }

    /// Spawn the three pipelines on the current runtime.
    #[must_use]
    pub fn start(self) -> RunningServer {
        let options = PipelineOptions {
            max_in_flight: self.ctx.config.max_in_flight(),
            ctx: self.ctx,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };
        let tracker = options.tracker.clone();
        tracker.spawn(run_pipeline(RX_PACKETS, options.clone()));
        tracker.spawn(run_pipeline(TX_PAYLOADS, options.clone()));
        tracker.spawn(run_pipeline(MAC_PAYLOADS, options.clone()));
        info!(
            "network server started: net_id={}, max_in_flight={}",
            options.ctx.config.net_id(),
            options.max_in_flight
        );
        RunningServer {
            ctx: options.ctx,
            shutdown: options.shutdown,
            tracker,
        }
    }

    /// Run until Ctrl+C is received, then shut down.
    ///
    /// # Errors
    ///
    /// Returns a [`ShutdownError`] if any backend fails to close.
    pub async fn run(self) -> Result<(), ShutdownError> {
        self.run_until(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run until `signal` resolves, then shut down.
    ///
    /// ```no_run
    /// # use loraserver::{context::Context, server::NetworkServer};
    /// # async fn example(ctx: Context) -> Result<(), loraserver::server::ShutdownError> {
    /// let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    /// let server = tokio::spawn(NetworkServer::new(ctx).run_until(async {
    ///     let _ = rx.await;
    /// }));
    /// let _ = tx.send(());
    /// server.await.expect("join server task")?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a [`ShutdownError`] if any backend fails to close.
    pub async fn run_until<S>(self, signal: S) -> Result<(), ShutdownError>
    where
        S: Future<Output = ()> + Send,
    {
        let running = self.start();
        signal.await;
        running.stop().await
    }
}

/// A started [`NetworkServer`].
pub struct RunningServer {
    ctx: Arc<Context>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl RunningServer {
    #[must_use]
    pub fn context(&self) -> &Arc<Context> { &self.ctx }

    /// Close every backend, then wait for all pipelines and in-flight workers.
    ///
    /// A backend that fails to close cannot be relied on to end its
    /// sequence, so in that case the pipelines are cancelled instead; workers
    /// already running still finish.
    ///
    /// # Errors
    ///
    /// Returns a [`ShutdownError`] listing every backend that failed to close.
    pub async fn stop(self) -> Result<(), ShutdownError> {
        let backends = &self.ctx.backends;
        let mut failures = Vec::new();
        let closes = [
            ("gateway", backends.gateway.close().await),
            ("application", backends.application.close().await),
            ("controller", backends.controller.close().await),
        ];
        for (backend, result) in closes {
            if let Err(source) = result {
                log::error!("close {backend} backend error: {source}");
                failures.push(CloseFailure { backend, source });
            }
        }
        if !failures.is_empty() {
            self.shutdown.cancel();
        }

        info!("waiting for pending actions to complete");
        self.tracker.close();
        self.tracker.wait().await;
        info!("network server stopped");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { failures })
        }
    }
}
