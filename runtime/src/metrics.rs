//! Prometheus metrics for arbitration outcomes.
//!
//! Every operation records its outcome as a labelled counter, so a dashboard
//! can tell benign contention apart from authorization failures and partial
//! failures without parsing logs.
//!
//! # Example
//!
//! ```rust,no_run
//! use seatlock_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! println!("{}", server.render().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use seatlock_core::ArbitrationError;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder and renderer.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be built or installed. An
    /// already-installed recorder is tolerated with a warning.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Address the exposition is meant to be served on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("seatlock_holds_total", "Hold requests by outcome");
    describe_counter!("seatlock_confirmations_total", "Confirm requests by outcome");
    describe_counter!("seatlock_cancellations_total", "Cancel requests by outcome");
    describe_counter!(
        "seatlock_holds_reclaimed_total",
        "Expired holds returned to AVAILABLE by the reclaimer"
    );
    describe_counter!(
        "seatlock_gate_release_failures_total",
        "Gate releases that failed and were left to expire"
    );
    describe_counter!(
        "seatlock_ledger_retries_total",
        "Ledger writes re-attempted after a transient failure"
    );
    describe_counter!(
        "seatlock_store_cas_misses_total",
        "Durable-store transitions rejected by the state/revision check"
    );
    describe_histogram!(
        "seatlock_confirm_duration_seconds",
        "Time taken by confirm, including admission and ledger write"
    );
}

/// Outcome label for a result.
fn outcome<T>(result: &Result<T, ArbitrationError>, success: &'static str) -> &'static str {
    match result {
        Ok(_) => success,
        Err(err) => err.label(),
    }
}

/// Arbitration metrics recorder.
pub struct ArbitrationMetrics;

impl ArbitrationMetrics {
    /// Record a hold attempt.
    pub fn record_hold<T>(result: &Result<T, ArbitrationError>) {
        counter!("seatlock_holds_total", "outcome" => outcome(result, "granted")).increment(1);
    }

    /// Record a confirm attempt and its latency.
    pub fn record_confirm<T>(result: &Result<T, ArbitrationError>, duration: Duration) {
        counter!("seatlock_confirmations_total", "outcome" => outcome(result, "confirmed")).increment(1);
        histogram!("seatlock_confirm_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a cancel attempt.
    pub fn record_cancel<T>(result: &Result<T, ArbitrationError>) {
        counter!("seatlock_cancellations_total", "outcome" => outcome(result, "cancelled")).increment(1);
    }

    /// Record a re-attempted ledger write.
    pub fn record_ledger_retry() {
        counter!("seatlock_ledger_retries_total").increment(1);
    }

    /// Record a gate release that failed.
    pub fn record_gate_release_failure() {
        counter!("seatlock_gate_release_failures_total").increment(1);
    }
}

/// Reclaimer metrics recorder.
pub struct ReclaimerMetrics;

impl ReclaimerMetrics {
    /// Record holds reclaimed in one sweep.
    pub fn record_reclaimed(count: u64) {
        counter!("seatlock_holds_reclaimed_total").increment(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatlock_core::ResourceId;

    #[test]
    fn outcome_uses_error_label() {
        let ok: Result<(), ArbitrationError> = Ok(());
        let lost: Result<(), ArbitrationError> =
            Err(ArbitrationError::ContentionLost(ResourceId::new("seat-1")));

        assert_eq!(outcome(&ok, "confirmed"), "confirmed");
        assert_eq!(outcome(&lost, "confirmed"), "contention_lost");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        ArbitrationMetrics::record_hold(&Ok::<(), ArbitrationError>(()));
        ArbitrationMetrics::record_confirm(&Ok::<(), ArbitrationError>(()), Duration::from_millis(3));
        ReclaimerMetrics::record_reclaimed(2);
    }
}
