use anyhow::Context;
use server::{AppState, config::ServerConfig, routes};
use tracing_subscriber::{EnvFilter, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from `.env` if present
    dotenv::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,server={level},services={level},utils={level},tower_http={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string).context("Failed to create tracing filter")?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let config = ServerConfig::from_env().context("Failed to load configuration")?;
    tracing::info!(
        "Rendering into {} (scratch: {})",
        config.output_dir.display(),
        config.temp_dir.display()
    );

    let state = AppState::from_config(&config);
    let app_router = routes::router(state);

    let host = config.host.clone();
    let listener = tokio::net::TcpListener::bind(format!("{host}:{}", config.port)).await?;
    let actual_port = listener.local_addr()?.port();

    tracing::info!("Server running on http://{host}:{actual_port}");

    axum::serve(listener, app_router).await?;
    Ok(())
}
