use axum::http::HeaderValue;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use petiq_api::{
    constants::api::{API_BIND_ADDR, CORS_ALLOWED_ORIGINS},
    db, routes,
    services::{gateway, reconcile},
    state::AppState,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_absent| EnvFilter::new("info")),
        )
        .init();

    let db_conn = db::connect().await.expect("Failed to connect to database");
    let gateway = gateway::from_environment();
    let state = AppState { db_conn, gateway };
    let _reconciler = reconcile::spawn(state.clone());

    let app = axum::Router::new()
        .route("/", axum::routing::get(root))
        .merge(routes::payments::create_router())
        .nest("/transactions", routes::transactions::create_router())
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(&*API_BIND_ADDR)
        .await
        .expect("Failed to bind listener");
    info!("payments service listening on {}", *API_BIND_ADDR);
    axum::serve(listener, app)
        .await
        .expect("Failed to init Axum service");
}

fn cors_layer() -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if CORS_ALLOWED_ORIGINS.is_empty() {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = CORS_ALLOWED_ORIGINS
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

async fn root() -> String {
    "Payments service is running!".to_string()
}
