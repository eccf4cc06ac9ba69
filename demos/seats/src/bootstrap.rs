//! Backend selection and service wiring.
//!
//! Turns a [`Config`] into a ready [`ArbitrationService`]:
//!
//! 1. Connect the resource store and ledger (memory or `PostgreSQL`)
//! 2. Connect the coordination gate (Redis if configured, else in process)
//! 3. Pick the admission strategy
//! 4. Provision the start-up seats

use crate::config::{AdmissionMode, Backend, Config};
use seatlock_core::gate::{CoordinationGate, GateError};
use seatlock_core::ledger::ReservationLedger;
use seatlock_core::store::ResourceStore;
use seatlock_core::ArbitrationError;
use seatlock_postgres::{PostgresReservationLedger, PostgresResourceStore, SetupError};
use seatlock_redis::RedisCoordinationGate;
use seatlock_runtime::fault::{FaultInjector, NoFaults, RandomFaults};
use seatlock_runtime::metrics::MetricsError;
use seatlock_runtime::{AdmissionStrategy, ArbitrationService, GateAdmission, OptimisticAdmission};
use seatlock_testing::{InMemoryCoordinationGate, InMemoryReservationLedger, InMemoryResourceStore};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors raised while bringing the application up.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// `PostgreSQL` could not be reached or migrated.
    #[error(transparent)]
    Postgres(#[from] SetupError),

    /// Redis could not be reached.
    #[error("Coordination gate unavailable: {0}")]
    Gate(#[from] GateError),

    /// Provisioning failed.
    #[error("Provisioning failed: {0}")]
    Arbitration(#[from] ArbitrationError),

    /// The metrics recorder could not be installed.
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// The storage seams the service runs on.
pub struct Backends {
    /// Resource state.
    pub store: Arc<dyn ResourceStore>,
    /// Acquisition ledger.
    pub ledger: Arc<dyn ReservationLedger>,
    /// Coordination gate, if gate admission is configured.
    pub gate: Option<Arc<dyn CoordinationGate>>,
}

/// Connect every backend the configuration asks for.
///
/// # Errors
///
/// Returns [`BootstrapError`] if `PostgreSQL` or Redis cannot be reached.
pub async fn connect_backends(config: &Config) -> Result<Backends, BootstrapError> {
    let (store, ledger) = match config.backend {
        Backend::Memory => {
            info!("Using in-memory resource store and ledger");
            let store: Arc<dyn ResourceStore> = Arc::new(InMemoryResourceStore::new());
            let ledger: Arc<dyn ReservationLedger> = Arc::new(InMemoryReservationLedger::new());
            (store, ledger)
        }
        Backend::Postgres => {
            info!("Connecting to PostgreSQL...");
            let pool = seatlock_postgres::connect(&config.postgres.url, &config.pool_config()).await?;
            seatlock_postgres::migrate(&pool).await?;
            let store: Arc<dyn ResourceStore> = Arc::new(PostgresResourceStore::from_pool(pool.clone()));
            let ledger: Arc<dyn ReservationLedger> = Arc::new(PostgresReservationLedger::from_pool(pool));
            (store, ledger)
        }
    };

    let gate = match (config.admission, &config.redis.url) {
        (AdmissionMode::Optimistic, _) => None,
        (AdmissionMode::Gate, Some(url)) => {
            info!("Connecting to Redis coordination gate...");
            let gate: Arc<dyn CoordinationGate> = Arc::new(RedisCoordinationGate::new(url).await?);
            Some(gate)
        }
        (AdmissionMode::Gate, None) => {
            info!("Using in-process coordination gate");
            Some(in_process_gate())
        }
    };

    Ok(Backends { store, ledger, gate })
}

fn in_process_gate() -> Arc<dyn CoordinationGate> {
    Arc::new(InMemoryCoordinationGate::new())
}

/// The admission strategy for `config`.
///
/// Gate admission without a gate falls back to an in-process one.
#[must_use]
pub fn admission_strategy(config: &Config, gate: Option<Arc<dyn CoordinationGate>>) -> Arc<dyn AdmissionStrategy> {
    match config.admission {
        AdmissionMode::Gate => {
            let gate = gate.unwrap_or_else(in_process_gate);
            Arc::new(GateAdmission::new(gate, config.gate_ttl()))
        }
        AdmissionMode::Optimistic => Arc::new(OptimisticAdmission::new(config.confirm_retry_policy())),
    }
}

/// The fault injector for `config`.
#[must_use]
pub fn fault_injector(config: &Config) -> Arc<dyn FaultInjector> {
    let rate = config.arbitration.fault_injection_rate;
    if rate > 0.0 {
        tracing::warn!(rate, "Ledger fault injection enabled");
        Arc::new(RandomFaults::new(rate))
    } else {
        Arc::new(NoFaults)
    }
}

/// Wire the service over `backends`.
#[must_use]
pub fn build_service(config: &Config, backends: Backends) -> ArbitrationService {
    let service = ArbitrationService::builder(backends.store, backends.ledger)
        .admission(admission_strategy(config, backends.gate))
        .faults(fault_injector(config))
        .ledger_retry(config.ledger_retry_policy())
        .default_hold_ttl(config.hold_ttl())
        .build();

    info!(
        backend = %config.backend,
        admission = service.admission_name(),
        hold_ttl_secs = config.arbitration.hold_ttl_seconds,
        "Arbitration service ready"
    );
    service
}

/// Create the start-up seats that do not exist yet.
///
/// # Errors
///
/// Returns [`BootstrapError::Arbitration`] if the store rejects the writes.
pub async fn provision_seats(service: &ArbitrationService, config: &Config) -> Result<usize, BootstrapError> {
    let created = service.provision(config.seat_ids()).await?;
    info!(
        created,
        configured = config.server.initial_seat_count,
        "Seats provisioned"
    );
    Ok(created)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_with_gate() {
        let config = Config::default();
        let backends = connect_backends(&config).await.unwrap();
        assert!(backends.gate.is_some());

        let service = build_service(&config, backends);
        assert_eq!(service.admission_name(), "gate");
        assert_eq!(provision_seats(&service, &config).await.unwrap(), 9);
        assert_eq!(provision_seats(&service, &config).await.unwrap(), 0);
        assert_eq!(service.list_resources().await.unwrap().len(), 9);
    }

    #[tokio::test]
    async fn optimistic_admission_needs_no_gate() {
        let config = Config {
            admission: AdmissionMode::Optimistic,
            ..Config::default()
        };
        let backends = connect_backends(&config).await.unwrap();
        assert!(backends.gate.is_none());
        assert_eq!(build_service(&config, backends).admission_name(), "optimistic");
    }

    #[test]
    fn gate_admission_without_gate_falls_back() {
        let strategy = admission_strategy(&Config::default(), None);
        assert_eq!(strategy.name(), "gate");
    }
}
