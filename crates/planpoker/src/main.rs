use std::sync::Arc;

use planpoker::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), PlanpokerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("planpoker=info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let builder = PlanpokerServerBuilder::from_config(&config);

    match config.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            tracing::info!("using redis store");
            builder.build(Arc::new(store)).await?.run_until(shutdown_signal()).await
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            tracing::warn!("PLANPOKER_REDIS_URL is set but redis support is not compiled in, using the in-memory store");
            serve_in_memory(builder).await
        }
        None => serve_in_memory(builder).await,
    }
}

async fn serve_in_memory(builder: PlanpokerServerBuilder) -> Result<(), PlanpokerError> {
    tracing::info!("using in-memory store");
    builder
        .build(Arc::new(MemoryStore::new()))
        .await?
        .run_until(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
