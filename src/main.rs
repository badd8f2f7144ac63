use axum::{http::Method, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use mpesa_push_api::config::MpesaConfig;
use mpesa_push_api::database::connection::get_db_client;
use mpesa_push_api::routes;
use mpesa_push_api::services::mpesa_gateway::MpesaGateway;
use mpesa_push_api::services::payments::PaymentService;
use mpesa_push_api::state::AppState;
use mpesa_push_api::store::MongoTransactionStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = MpesaConfig::from_env();
    tracing::info!("Short code: {}", config.short_code);
    tracing::info!("Environment: {}", config.environment);

    let db = get_db_client().await;
    let store = MongoTransactionStore::new(&db);
    if let Err(e) = store.ensure_indexes().await {
        tracing::warn!("Failed to create transaction indexes: {}", e);
    }

    let port = config.port;
    let gateway = MpesaGateway::new(config);

    // Verify credentials up front so a bad key fails loudly at startup.
    match gateway.get_access_token().await {
        Ok(_) => tracing::info!("M-Pesa access token obtained"),
        Err(e) => tracing::warn!("Could not obtain M-Pesa access token yet: {}", e),
    }

    let payments = Arc::new(PaymentService::new(Arc::new(gateway), Arc::new(store)));
    let app = build_router(AppState::new(payments));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server starting on {}", addr);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .nest("/api/mpesa", routes::payments::payment_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
