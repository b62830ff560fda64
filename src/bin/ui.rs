//! UI gateway server
//!
//! Serves the browser front end, manages `lch_` projects, and streams
//! orchestrator runs to the client as NDJSON.

use lowcortisol::config::GatewayConfig;
use lowcortisol::gateway::{router, GatewayState};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lowcortisol=info".parse()?))
        .init();

    let config = GatewayConfig::from_env();
    std::fs::create_dir_all(&config.workspaces_root)?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(GatewayState::new(config));
    let app = router(state);

    info!("UI server running on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
