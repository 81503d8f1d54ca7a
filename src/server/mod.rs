//! HTTP ingestion gateway.
//!
//! Accepts card image uploads, creates their pending cards, and serves
//! card records and extraction progress as JSON.

mod handlers;
mod routes;

pub use handlers::CardResponse;
pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::repository::DieselCardRepository;
use crate::services::IngestService;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub cards: Arc<DieselCardRepository>,
    pub ingest: Arc<IngestService>,
}

impl AppState {
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        let ctx = settings.create_db_context();
        ctx.init_schema().await?;

        Ok(Self {
            cards: Arc::new(ctx.cards()),
            ingest: Arc::new(IngestService::new(ctx.cards(), settings.upload_dir.clone())),
        })
    }
}

/// Start the web server.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(settings).await?;
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
