use clap::Parser;
use std::{error::Error, sync::Arc, time::Duration};

use axum::{Router, http::header, routing::get};
use common::config::{BackendConfig, Config};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    gateway::{PaymentService, PaystackGateway, WebhookVerifier},
    reconciler::Reconciler,
    routes::{AppState, build_router},
    session::SessionStore,
    storage::{ProdStoreStorage, StoreStorage},
    tax::TaxPolicy,
    workflow::OrderWorkflow,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to config file
    #[arg(short, long, default_value = "storefront/config/dev.yaml")]
    pub config: String,
}

pub fn initialize_executable() -> Result<Config, Box<dyn Error + Send + Sync>> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    initialize_tracing(&config.backend.log_level);
    info!(config = %args.config, project = %config.common.project_name, "Configuration loaded");

    Ok(config)
}

pub fn initialize_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    // Ignore the error when a subscriber is already installed (tests)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Wire the storage, gateway and reconciler from configuration.
pub fn build_state(
    config: &Config,
    storage: Arc<dyn StoreStorage>,
) -> Result<AppState, Box<dyn Error + Send + Sync>> {
    let tax = TaxPolicy::from_config(&config.tax)?;
    let gateway = Arc::new(PaystackGateway::new(config.payments.clone())?);
    let verifier = WebhookVerifier::new(&config.payments.webhook_secret);

    Ok(AppState::new(
        OrderWorkflow::new(storage.clone(), tax),
        PaymentService::new(storage.clone(), gateway),
        Reconciler::new(storage, verifier),
        SessionStore::with_ttl(Duration::from_secs(config.backend.session_ttl_secs)),
    ))
}

fn with_http_layers(app: Router, config: &BackendConfig) -> Result<Router, Box<dyn Error + Send + Sync>> {
    let origin = config.allowed_origin.parse::<header::HeaderValue>()?;
    Ok(app.layer(TraceLayer::new_for_http()).layer(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
    ))
}

pub async fn run_backend(config: Config) -> Result<(), Box<dyn Error + Send + Sync>> {
    if config.payments.webhook_secret.is_empty() {
        error!("payments.webhook_secret is empty, every webhook will be rejected");
    }

    let storage = ProdStoreStorage::new(&config.common.database_url).await?;
    storage.create_schema().await?;
    let storage: Arc<dyn StoreStorage> = Arc::new(storage);

    let metrics: PrometheusHandle = PrometheusBuilder::new().install_recorder()?;
    let state = build_state(&config, storage)?;
    let _sweeper = state
        .sessions
        .spawn_sweeper(Duration::from_secs(config.backend.session_sweep_secs.max(1)));

    let app = build_router(state).route(
        "/metrics",
        get(move || {
            let metrics = metrics.clone();
            async move { metrics.render() }
        }),
    );
    let app = with_http_layers(app, &config.backend)?;

    info!("Starting backend service at {}", config.backend.server_address);
    let listener = tokio::net::TcpListener::bind(&config.backend.server_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Backend stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
