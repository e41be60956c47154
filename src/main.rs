use anyhow::Result;
use axum::Router;
use clap::Parser;
use std::{io::ErrorKind, sync::Arc};
use swift_gateway::{
    config::{self, AppConfig, Args},
    handlers::object_handlers::GatewayState,
    routes::routes::routes,
    server::{self, ServerLimits},
    services::{
        pool::ConnectionPool,
        swift::{SwiftConnection, build_http_client},
    },
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    swift_gateway::init_tracing();

    // --- Parse config ---
    let args = Args::parse();
    config::load_dotenv();
    let cfg = AppConfig::from_env_and_args(args)?;

    tracing::info!("Starting swift-gateway with config: {:?}", cfg);

    // --- Connection pool ---
    let store = Arc::new(cfg.store.clone());
    let client = build_http_client(&store)?;
    let pool =
        ConnectionPool::new(move || SwiftConnection::new(Arc::clone(&store), client.clone()))?;

    // --- Build router ---
    let state = GatewayState::new(pool, cfg.store.container.as_str())
        .with_request_timeout(cfg.request_timeout);
    let app: Router = routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server started on http://{}", listener.local_addr()?);
    server::serve(
        listener,
        app,
        ServerLimits::default(),
        server::shutdown_signal(),
    )
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}
