use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stratus::billing::{spawn_usage_accountant, AccountantConfig};
use stratus::catalog::Catalog;
use stratus::client::NodeClient;
use stratus::cluster::{spawn_liveness_loop, LivenessConfig};
use stratus::config::Settings;
use stratus::metrics::Metrics;
use stratus::server::{create_router, AppState};
use stratus::services::{spawn_service_health_loop, ServiceHealthConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::parse();

    // Initialize logging
    let filter = match settings.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let metrics = Metrics::install();

    info!(database_url = %settings.database_url, "opening catalog");
    let catalog = Catalog::connect(&settings.database_url)
        .await
        .context("failed to open catalog")?;

    let node_client = NodeClient::new(settings.node_auth_token.clone());

    // Background loops. The shutdown handles live for the life of the
    // process; dropping them on exit stops the loops.
    let _liveness = spawn_liveness_loop(
        catalog.clone(),
        node_client.clone(),
        LivenessConfig {
            interval: settings.health_check_interval(),
        },
    );
    let _service_health = spawn_service_health_loop(
        catalog.clone(),
        node_client.clone(),
        ServiceHealthConfig {
            interval: settings.service_health_check_interval(),
            ..ServiceHealthConfig::default()
        },
    );
    let _accountant = spawn_usage_accountant(
        catalog.clone(),
        AccountantConfig {
            interval: settings.usage_tracking_interval(),
        },
    );

    let addr = format!("{}:{}", settings.bind_addr, settings.port);
    let state = AppState::new(catalog, settings, metrics);
    state.limiter.start_gc();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("Stratus control plane listening on {}", addr);
    info!("Endpoints:");
    info!("  GET  /health                 - Control-plane health summary");
    info!("  GET  /metrics                - Prometheus exposition");
    info!("  POST /register_node/{{id}}    - Node self-registration");
    info!("  GET  /nodes                  - List nodes");
    info!("  POST /launch                 - Launch a container");
    info!("  POST /launchBucket|DB|NoSQL|Queue|Secrets - Launch managed services");
    info!("  WS   /ws/terminal/{{node}}/{{container}} - Terminal proxy");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
