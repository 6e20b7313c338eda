//! Axum HTTP server for the public and admin API.

use std::sync::Arc;

use axum::Router;
use tracing::info;

use crate::clock::Clock;
use crate::config::Config;
use crate::db::store::AuctionStore;
use crate::events::bus::EventBus;
use crate::payments::PaymentService;
use crate::scheduler::Scheduler;

use super::routes;

/// Shared state for all web routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<AuctionStore>,
    pub scheduler: Arc<Scheduler>,
    pub payments: Arc<PaymentService>,
    pub clock: Clock,
    pub event_bus: Arc<EventBus>,
}

pub struct WebServer {
    port: u16,
    state: AppState,
}

impl WebServer {
    pub fn new(state: AppState) -> Self {
        Self {
            port: state.config.web.port,
            state,
        }
    }

    pub fn router(state: AppState) -> Router {
        Router::new()
            .merge(routes::api_routes())
            .merge(routes::admin_routes())
            .with_state(state)
    }

    /// Start the HTTP server.
    pub async fn start(self) -> anyhow::Result<()> {
        let app = Self::router(self.state);

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.port));
        info!(port = self.port, "web api starting");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
