//! Seat arbitration daemon.
//!
//! Provisions the configured seats and reclaims expired holds until Ctrl+C
//! or SIGTERM.

use seats::{Application, Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,seatlock=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting seat arbitration daemon");

    let config = Config::from_env()?;
    info!(
        backend = %config.backend,
        admission = %config.admission,
        seats = config.server.initial_seat_count,
        "Configuration loaded"
    );

    let app = Application::build(config).await?;
    app.run().await;
    Ok(())
}
