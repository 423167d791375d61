//! Tokio TCP front end for the collector.
//!
//! [`CollectorServer`] binds a listener and spawns a configurable number of
//! accept loops sharing it. Each accepted connection runs
//! [`handle_connection`] in its own task with its own
//! [`Pipeline`](crate::pipeline::Pipeline); connections share only the
//! router, the metrics backend and the sink.

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use tokio::{net::TcpListener, sync::oneshot};

mod connection;
mod error;
mod runtime;

pub use connection::{
    CloseReason,
    ConnectionContext,
    ConnectionSettings,
    ConnectionSummary,
    handle_connection,
};
pub use error::ServerError;
pub use runtime::BackoffConfig;

use crate::{config::CollectorConfig, metrics::Metrics, sink::Sink};

/// TCP server feeding client connections through the collector pipeline.
#[derive(Debug)]
pub struct CollectorServer {
    listener: Arc<TcpListener>,
    workers: usize,
    backoff: BackoffConfig,
    context: ConnectionContext,
    ready_tx: Option<oneshot::Sender<()>>,
}

impl CollectorServer {
    /// Bind to the configured listen address.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if binding or configuring the listener
    /// fails.
    pub fn bind(
        config: &CollectorConfig,
        metrics: Arc<dyn Metrics>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, ServerError> {
        let std_listener = StdTcpListener::bind(config.server.listen).map_err(ServerError::Bind)?;
        Self::bind_existing_listener(std_listener, config, metrics, sink)
    }

    /// Serve connections from an already bound listener.
    ///
    /// The configured listen address is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listener cannot be handed to
    /// Tokio.
    pub fn bind_existing_listener(
        std_listener: StdTcpListener,
        config: &CollectorConfig,
        metrics: Arc<dyn Metrics>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, ServerError> {
        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;
        Ok(Self {
            listener: Arc::new(listener),
            workers: config.server.workers.max(1),
            backoff: BackoffConfig::from(config.server.backoff),
            context: ConnectionContext {
                router: Arc::new(config.router()),
                metrics,
                sink,
                settings: ConnectionSettings::from_config(config),
            },
            ready_tx: None,
        })
    }

    /// Signal `tx` once every accept loop has been spawned.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// The bound address, or `None` if it cannot be retrieved.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.listener.local_addr().ok() }

    /// Number of accept loops started by [`run`](Self::run).
    #[must_use]
    pub const fn workers(&self) -> usize { self.workers }
}
