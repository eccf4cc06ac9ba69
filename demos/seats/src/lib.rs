//! Seat arbitration daemon.
//!
//! Wires the seatlock crates into a runnable process: configuration from the
//! environment, backend selection, seat provisioning and the background
//! expiry reclaimer with graceful shutdown.

pub mod bootstrap;
pub mod config;
pub mod lifecycle;

pub use bootstrap::BootstrapError;
pub use config::{AdmissionMode, Backend, Config, ConfigError};
pub use lifecycle::Application;
