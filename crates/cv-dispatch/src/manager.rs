//! Manager: process-level runner for a dispatcher
//!
//! Races the dispatch run against a shutdown signal. On the signal it stops
//! fetching and gives the dispatcher a bounded amount of time to drain; past
//! that it aborts the run, which still exits every route.

use std::future::Future;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::error::{DispatchError, ManagerError, RouteError};
use crate::route::Route;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Manager {
    dispatcher: Dispatcher,
    shutdown_timeout: Duration,
}

impl Manager {
    pub fn new(routes: Vec<Route>, config: DispatcherConfig) -> Result<Self, RouteError> {
        Ok(Self::from_dispatcher(Dispatcher::new(routes, config)?))
    }

    pub fn from_dispatcher(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// How long a signalled shutdown may spend draining
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stop(&self) {
        self.dispatcher.stop();
    }

    /// Run until the dispatcher finishes or SIGINT/SIGTERM arrives.
    pub async fn run(&self, forever: bool) -> Result<(), ManagerError> {
        self.run_until(forever, shutdown_signal()).await
    }

    /// Run until the dispatcher finishes or `shutdown` completes.
    pub async fn run_until<F>(&self, forever: bool, shutdown: F) -> Result<(), ManagerError>
    where
        F: Future<Output = ()>,
    {
        info!(
            pid = std::process::id(),
            forever,
            routes = self.dispatcher.routes().len(),
            "Starting dispatcher"
        );

        let dispatch = self.dispatcher.dispatch(forever);
        tokio::pin!(dispatch);

        let result = tokio::select! {
            result = &mut dispatch => result,
            _ = shutdown => {
                info!("Shutdown requested, draining in-flight messages");
                self.dispatcher.stop();

                match tokio::time::timeout(self.shutdown_timeout, &mut dispatch).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            timeout_secs = self.shutdown_timeout.as_secs(),
                            "Dispatcher did not drain within the shutdown timeout"
                        );
                        // Keep polling the run so it exits its routes
                        self.dispatcher.abort();
                        if let Err(e) = (&mut dispatch).await {
                            debug!(error = %e, "Aborted dispatch finished");
                        }
                        return Err(ManagerError::ShutdownTimeout(self.shutdown_timeout));
                    }
                }
            }
        };

        match result {
            Ok(()) => {
                info!("Dispatcher stopped");
                Ok(())
            }
            Err(DispatchError::Cancelled) => {
                info!("Dispatcher cancelled");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Dispatcher failed");
                Err(e.into())
            }
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed that source is logged and ignored.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
