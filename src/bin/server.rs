//! HTTP server for the text-to-SQL pipeline

use std::sync::Arc;
use text2sql::config::AppConfig;
use text2sql::rate_limit::RateLimiter;
use text2sql::server::{serve, AppState};
use text2sql::Text2SqlPipeline;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    if config.llm.is_dummy() {
        warn!("LLM_API_KEY not set - answers come from the canned generator");
    } else {
        info!("Using model {}", config.llm.model);
    }

    let pipeline = Text2SqlPipeline::from_config(&config, false)?;
    let limiter = RateLimiter::new(
        config.rate_limit.max_requests,
        config.rate_limit.window,
        config.rate_limit.max_clients,
    );
    info!(
        "Rate limit: {} requests per {:?} per client",
        config.rate_limit.max_requests, config.rate_limit.window
    );

    let listener = TcpListener::bind(&config.server_addr).await?;
    serve(listener, Arc::new(AppState { pipeline, limiter })).await?;

    Ok(())
}
