//! Dream60 auction scheduler — entry point.
//!
//! Loads configuration, initializes all subsystems and runs until
//! SIGINT/SIGTERM.

mod auction;
mod clock;
mod config;
mod daily;
mod db;
mod error;
mod events;
mod logging;
mod notify;
mod payments;
mod scheduler;
mod web;

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use crate::clock::Clock;
use crate::config::Config;
use crate::db::pool;
use crate::db::store::AuctionStore;
use crate::events::bus::EventBus;
use crate::payments::{Gateways, PaymentService};
use crate::scheduler::Scheduler;
use crate::web::{AppState, WebServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (ignore if missing)
    let _ = dotenvy::dotenv();

    let config = Arc::new(Config::load()?);

    logging::structured::init_logging(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        slots = config.auction.time_slots.len(),
        rounds = config.auction.round_count,
        gateway = %config.payments.default_gateway,
        "dream60-scheduler starting"
    );

    let db_pool = pool::create_pool(&config.database).await?;
    pool::run_migrations(&db_pool).await?;
    info!("database connected and migrations applied");

    let clock = Clock::new(
        config.scheduler.server_time_offset_ms,
        config.auction.timezone_offset_minutes,
    )?;
    if clock.offset_ms() != 0 {
        info!(offset_ms = clock.offset_ms(), "service clock is shifted");
    }

    let event_bus = Arc::new(EventBus::new(1024));
    let store = Arc::new(AuctionStore::new(
        db_pool.clone(),
        config.scheduler.max_conflict_retries,
    ));

    let scheduler = Arc::new(Scheduler::new(
        config.clone(),
        store.clone(),
        clock,
        event_bus.clone(),
    ));
    let scheduler_loop = scheduler.clone();
    let bus_for_loop = event_bus.clone();
    let _scheduler_handle = tokio::spawn(async move {
        scheduler::run_scheduler_loop(scheduler_loop, bus_for_loop).await;
    });

    // Spawn webhook notifier (if configured)
    let _notify_handle = match notify::WebhookNotifier::new(&config.notify, event_bus.subscribe())? {
        Some(notifier) => Some(tokio::spawn(async move {
            if let Err(e) = notifier.run().await {
                error!(error = %e, "notifier error");
            }
        })),
        None => {
            info!("no notification webhook configured");
            None
        }
    };

    let payments = Arc::new(PaymentService::new(
        Gateways::from_config(&config.payments)?,
        store.clone(),
        clock,
        event_bus.clone(),
        &config.payments.currency,
    ));

    let _web_handle = if config.web.enabled {
        let web_server = WebServer::new(AppState {
            config: config.clone(),
            store: store.clone(),
            scheduler: scheduler.clone(),
            payments,
            clock,
            event_bus: event_bus.clone(),
        });
        Some(tokio::spawn(async move {
            if let Err(e) = web_server.start().await {
                error!(error = %e, "web server error");
            }
        }))
    } else {
        None
    };

    info!("all subsystems started, waiting for shutdown signal");

    let shutdown = async {
        let ctrl_c = signal::ctrl_c();
        #[cfg(unix)]
        {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => { info!("received SIGINT"); }
                        _ = sigterm.recv() => { info!("received SIGTERM"); }
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    info!("received SIGINT");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received SIGINT");
        }
    };

    shutdown.await;

    db_pool.close().await;
    info!("shutdown complete");
    Ok(())
}
