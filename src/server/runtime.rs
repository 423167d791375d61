//! Runtime control for [`CollectorServer`].

mod accept;
mod backoff;

use std::sync::Arc;

use accept::{AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
use futures::Future;
use log::{info, warn};
use tokio::{select, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{CollectorServer, ServerError};

impl CollectorServer {
    /// Run the server until Ctrl+C is received.
    ///
    /// # Errors
    ///
    /// Accept failures are retried with exponential back-off and do not
    /// surface as errors; the result is reserved for startup failures.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until the `shutdown` future resolves.
    ///
    /// Shutdown stops every accept loop, then asks open connections to
    /// cancel their frame sequence, flush routed messages and close. The call
    /// returns once every connection task has finished.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use event_collector::{
    ///     config::CollectorConfig,
    ///     metrics::NoopMetrics,
    ///     server::CollectorServer,
    ///     sink::LoggingSink,
    /// };
    /// use tokio::sync::oneshot;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), event_collector::server::ServerError> {
    /// let server = CollectorServer::bind(
    ///     &CollectorConfig::default(),
    ///     Arc::new(NoopMetrics),
    ///     Arc::new(LoggingSink),
    /// )?;
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(server.run_with_shutdown(async {
    ///     let _ = rx.await;
    /// }));
    /// let _ = tx.send(());
    /// handle.await.expect("join server task")?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Accept failures are retried with exponential back-off and do not
    /// surface as errors.
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let CollectorServer {
            listener,
            workers,
            backoff,
            context,
            ready_tx,
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        for _ in 0..workers {
            tracker.spawn(accept_loop(
                Arc::clone(&listener),
                AcceptLoopOptions {
                    context: context.clone(),
                    shutdown: shutdown_token.clone(),
                    tracker: tracker.clone(),
                    backoff,
                },
            ));
        }
        info!(
            "collector listening: addr={:?}, workers={workers}",
            listener.local_addr().ok()
        );

        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        info!("collector stopped");
        Ok(())
    }
}
