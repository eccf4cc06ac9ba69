//! Application lifecycle management and graceful shutdown.
//!
//! 1. **Startup**: install metrics, connect backends, provision seats
//! 2. **Runtime**: run the expiry reclaimer in the background
//! 3. **Shutdown**: on Ctrl+C or SIGTERM, signal the reclaimer and wait for
//!    it to finish its current sweep (bounded by `SHUTDOWN_TIMEOUT`)
//!
//! # Example
//!
//! ```rust,ignore
//! let app = Application::build(Config::from_env()?).await?;
//! app.run().await;
//! ```

use crate::bootstrap::{self, BootstrapError};
use crate::config::Config;
use seatlock_runtime::metrics::MetricsServer;
use seatlock_runtime::{ArbitrationService, ExpiryReclaimer};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Running application with its background reclaimer.
pub struct Application {
    /// The arbitration entry point shared with callers
    service: Arc<ArbitrationService>,

    /// Background expiry reclaimer
    reclaimer: Arc<ExpiryReclaimer>,

    /// Prometheus recorder, when enabled
    metrics: Option<MetricsServer>,

    /// Shutdown signal for background tasks
    shutdown_tx: watch::Sender<bool>,

    /// Application configuration
    config: Arc<Config>,
}

impl Application {
    /// Build every component described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] if a backend cannot be reached, seats
    /// cannot be provisioned or the metrics recorder cannot be installed.
    pub async fn build(config: Config) -> Result<Self, BootstrapError> {
        let metrics = if config.server.metrics_enabled {
            let mut server = MetricsServer::new(config.server.metrics_addr);
            server.start()?;
            Some(server)
        } else {
            None
        };

        let backends = bootstrap::connect_backends(&config).await?;
        let service = Arc::new(bootstrap::build_service(&config, backends));
        bootstrap::provision_seats(&service, &config).await?;

        let reclaimer = Arc::new(ExpiryReclaimer::new(
            service.store(),
            service.holds(),
            config.reclaim_interval(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            service,
            reclaimer,
            metrics,
            shutdown_tx,
            config: Arc::new(config),
        })
    }

    /// The arbitration service.
    #[must_use]
    pub fn service(&self) -> Arc<ArbitrationService> {
        Arc::clone(&self.service)
    }

    /// Current metrics in Prometheus text format, if the recorder is ours.
    #[must_use]
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().and_then(MetricsServer::render)
    }

    /// Run until Ctrl+C or SIGTERM.
    pub async fn run(self) {
        self.run_until(shutdown_signal()).await;
    }

    /// Run until `shutdown` completes, then stop the background tasks.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            interval_secs = self.config.arbitration.reclaim_interval_seconds,
            "Starting expiry reclaimer"
        );
        let handle = Arc::clone(&self.reclaimer).spawn(self.shutdown_tx.subscribe());

        shutdown.await;
        info!("Shutdown requested, stopping background tasks...");

        let _ = self.shutdown_tx.send(true);

        match tokio::time::timeout(self.config.shutdown_timeout(), handle).await {
            Ok(Ok(())) => info!("Reclaimer stopped gracefully"),
            Ok(Err(e)) => warn!(error = %e, "Reclaimer task failed"),
            Err(_) => warn!("Reclaimer shutdown timed out"),
        }

        info!("Graceful shutdown complete");
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
