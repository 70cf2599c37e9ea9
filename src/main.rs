//! RigShare Escrow Server
//!
//! Backend payment core for the RigShare equipment rental marketplace:
//! webhook reconciliation against the payment gateway, the escrow release
//! engine, and the claim resolution workflow.

use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use rigshare_server::claims::ClaimService;
use rigshare_server::config::Config;
use rigshare_server::db;
use rigshare_server::escrow::EscrowService;
use rigshare_server::middleware;
use rigshare_server::notifications::Notifier;
use rigshare_server::routes;
use rigshare_server::state::AppState;
use rigshare_server::stripe::StripeClient;
use rigshare_server::webhooks::WebhookReconciler;
use rigshare_server::websocket::{self, WsState};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    tracing::info!(environment = config.environment.as_str(), "Starting server");

    // Initialize database connection pool and run migrations
    let db_pool = match db::create_pool(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = db::run_migrations(&db_pool).await {
        tracing::error!("Failed to run migrations: {}", e);
        std::process::exit(1);
    }

    // Payment gateway adapter
    let gateway = match StripeClient::new(
        config.stripe_api_base.clone(),
        config.stripe_secret_key.clone(),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!("Failed to build gateway client: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize WebSocket state
    let ws_state = WsState::new();

    // Core services
    let escrow_service = Arc::new(EscrowService::new(db_pool.clone(), gateway.clone()));
    let claim_service = Arc::new(ClaimService::new(db_pool.clone(), escrow_service.clone()));
    let reconciler = Arc::new(WebhookReconciler::new(db_pool.clone(), gateway.clone()));
    let notifier = Arc::new(Notifier::new(db_pool.clone()));

    let app_state = AppState::new(
        escrow_service,
        claim_service,
        reconciler,
        notifier,
        ws_state,
        Arc::new(config.clone()),
    );

    // Clone db_pool for health check
    let health_db_pool = db_pool.clone();

    // Create the app router
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(move || health_check(health_db_pool.clone())))
        .route("/ws", get(websocket::ws_handler))
        .merge(routes::webhook_routes())
        .merge(routes::escrow_routes())
        .merge(routes::claim_routes())
        .with_state(app_state)
        .layer(axum::middleware::from_fn(middleware::request_tracing))
        .layer(configure_cors(&config));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server shutdown complete");
}

async fn root() -> &'static str {
    "RigShare Escrow API Server"
}

/// Health check response
#[derive(serde::Serialize)]
struct HealthResponse {
    status: String,
    database: String,
    version: String,
}

/// Health check endpoint
async fn health_check(pool: sqlx::PgPool) -> axum::Json<HealthResponse> {
    let db_status = match db::check_health(&pool).await {
        Ok(_) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    let status = if db_status == "connected" {
        "healthy"
    } else {
        "unhealthy"
    };

    axum::Json(HealthResponse {
        status: status.to_string(),
        database: db_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn configure_cors(config: &Config) -> CorsLayer {
    let allowed_origins_str = config.cors_allowed_origins.clone().unwrap_or_default();

    if allowed_origins_str.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins_str
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
