//! Contention simulator.
//!
//! Races `N` confirmers (default 1000) for one freshly provisioned seat and
//! reports how many won, how many ledger entries exist and why the rest
//! lost.
//!
//! ```text
//! cargo run -p seats --bin contention -- 1000
//! ```

use futures::future::join_all;
use seatlock_core::{HolderId, ResourceId, Utc};
use seats::{Application, Config};
use std::collections::BTreeMap;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONTENDERS: usize = 1000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,contention=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let contenders = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<usize>()?,
        None => DEFAULT_CONTENDERS,
    };

    let app = Application::build(Config::from_env()?).await?;
    let service = app.service();

    let seat = ResourceId::new(format!("contention-{}", Utc::now().timestamp_millis()));
    service.provision([seat.clone()]).await?;
    info!(seat = %seat, contenders, admission = service.admission_name(), "Starting race");

    let tasks = (0..contenders).map(|i| {
        let service = service.clone();
        let seat = seat.clone();
        tokio::spawn(async move {
            service
                .confirm_acquisition(&seat, &HolderId::new(format!("contender-{i}")))
                .await
        })
    });

    let mut successes = 0usize;
    let mut failures: BTreeMap<&'static str, usize> = BTreeMap::new();
    for joined in join_all(tasks).await {
        match joined? {
            Ok(_) => successes += 1,
            Err(e) => *failures.entry(e.label()).or_default() += 1,
        }
    }

    let confirmed = service
        .resource_history(&seat)
        .await?
        .iter()
        .filter(|acquisition| acquisition.is_confirmed())
        .count();
    let winner = service.resource_state(&seat).await?.holder;

    println!("seat:               {seat}");
    println!("contenders:         {contenders}");
    println!("successful:         {successes}");
    println!("confirmed in ledger: {confirmed}");
    match winner {
        Some(holder) => println!("winner:             {holder}"),
        None => println!("winner:             none"),
    }
    for (label, count) in &failures {
        println!("failed ({label}): {count}");
    }

    if let Some(rendered) = app.render_metrics() {
        println!();
        println!("{rendered}");
    }

    if successes == 1 && confirmed == 1 {
        Ok(())
    } else {
        Err(format!("expected exactly one winner, got {successes} successes and {confirmed} ledger entries").into())
    }
}
