use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

mod app;
mod http;
mod runtime;

use app::AppState;
use http::operator_stub::OperatorStubState;
use runtime::Runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dispatch_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("DISPATCH_CONFIG").ok();
    let config = dispatch_core::config::DispatchConfig::load(config_path.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("config load failed ({}), using defaults", e);
            dispatch_core::config::DispatchConfig::default()
        });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let runtime = Arc::new(Runtime::new(config)?);
    runtime.spawn_background_tasks().await;

    let state = Arc::new(AppState {
        runtime: runtime.clone(),
        operator_stub: Arc::new(OperatorStubState::new()),
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("dispatch gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(runtime.clone()))
        .await?;

    Ok(())
}

/// Waits for Ctrl+C, then runs the documented shutdown sequence (§9: cancel
/// root context before closing queues) before releasing the listener.
async fn shutdown_signal(runtime: Arc<Runtime>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    runtime.shutdown().await;
}
