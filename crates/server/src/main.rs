// crates/server/src/main.rs
//! Entrypoint: initializes tracing, loads configuration, wires application
//! state, and serves the HTTP/WS surface.

use clap::Parser;
use comfygen_server::{create_app, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::parse();
    let bind_addr = config.bind_addr();

    let state = AppState::new(config).await?;
    let app = create_app(state);

    tracing::info!(addr = %bind_addr, "starting comfygen-server");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
