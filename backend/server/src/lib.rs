//! Backend for a community lost-and-found pet tracker.
//!
//! Neighbours report lost pets and sightings on a map. The service keeps every
//! record in a hosted Postgres database reached through its PostgREST face and
//! adds what a thin client cannot do safely on its own:
//!
//! - proximity alerts per viewer session, with dismissals and notifications
//!   remembered for the life of the session
//! - per-pet routes drawn from the reports in chronological order
//! - race-free community confirmation of case closures and sightings
//! - address lookups that degrade to raw coordinates
//! - a board of community aid offers (foster homes, medications, donations)
//! - volunteers joining and leaving the search for a pet
//!
//!
//!
//! # Consistency
//!
//! Two neighbours confirming a closure at the same moment must leave it
//! verified. The confirmation rows carry a unique `(target, user)` constraint,
//! so the database decides who already confirmed. The count that follows an
//! accepted row comes from Redis (a set of confirmers per target, updated in
//! one script call) or, without Redis, from a recount of the rows. The stored
//! count only ever moves forward: the write back is guarded by
//! `verification_count < new`.
//!
//!
//!
//! # Degraded mode
//!
//! Missing store credentials do not stop the server. It starts over an empty
//! in-memory store, refuses writes with `503` and lists the missing names in
//! `/health`. Missing Redis falls back to recounting rows, and a missing
//! geocoding key falls back to `"lat, lng"` labels.
//!
//!
//!
//! # Live updates
//!
//! Every write made through this process bumps a per-table version on the
//! store's change feed. Cached table snapshots are reused until the version
//! moves, and `GET /changes` streams the feed to clients as server-sent events.
//!
//!
//!
//! # Setup
//!
//! Credentials come from the environment or from `/run/secrets/<NAME>`:
//! ```sh
//! export SUPABASE_URL=https://project.supabase.co
//! export SUPABASE_ANON_KEY=...
//! export GOOGLE_MAPS_API_KEY=...
//! export REDIS_URL=redis://127.0.0.1:6379   # optional
//! RUST_LOG=info cargo run -p huellas
//! ```
//!
//! Verbose store tracing.
//! ```sh
//! RUST_LOG=server=debug cargo run -p huellas --features server/verbose
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{delete, get, post, put},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod activity;
pub mod cache;
pub mod config;
pub mod confirm;
pub mod database;
pub mod error;
pub mod geocoding;
pub mod notify;
pub mod repo;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod utils;

use routes::{
    alerts_handler, changes_handler, close_session_handler, closure_status_handler,
    confirm_closure_handler, confirm_sighting_handler, create_offer_handler, create_pet_handler,
    create_sighting_handler, dismiss_alert_handler, geocode_handler, get_pet_handler,
    health_handler, join_search_handler, leave_search_handler, list_offers_handler,
    list_pets_handler, open_closure_handler, open_session_handler, pet_sightings_handler,
    reverse_geocode_handler, routes_handler, set_location_handler, volunteers_handler,
};
use state::State;

pub fn build_router(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(health_handler))
        .route("/pets", get(list_pets_handler).post(create_pet_handler))
        .route("/pets/{id}", get(get_pet_handler))
        .route("/pets/{id}/sightings", get(pet_sightings_handler))
        .route(
            "/pets/{id}/closure",
            get(closure_status_handler).post(open_closure_handler),
        )
        .route(
            "/pets/{id}/volunteers",
            get(volunteers_handler).post(join_search_handler),
        )
        .route(
            "/pets/{id}/volunteers/{user_id}",
            delete(leave_search_handler),
        )
        .route("/sightings", post(create_sighting_handler))
        .route(
            "/sightings/{id}/confirmations",
            post(confirm_sighting_handler),
        )
        .route("/closures/{id}/confirmations", post(confirm_closure_handler))
        .route("/routes", get(routes_handler))
        .route("/sessions", post(open_session_handler))
        .route("/sessions/{id}", delete(close_session_handler))
        .route("/sessions/{id}/location", put(set_location_handler))
        .route("/sessions/{id}/alerts", get(alerts_handler))
        .route(
            "/sessions/{id}/alerts/{pet_id}/dismiss",
            post(dismiss_alert_handler),
        )
        .route(
            "/offers",
            get(list_offers_handler).post(create_offer_handler),
        )
        .route("/geocode", get(geocode_handler))
        .route("/geocode/reverse", get(reverse_geocode_handler))
        .route("/changes", get(changes_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await;
    let port = state.config.port;

    info!("Starting server...");
    let app = build_router(state);

    let address = format!("0.0.0.0:{port}");
    info!("Binding to {address}");

    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {address}: {e}");
            return;
        }
    };
    info!("Server running on {address}");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {e}");
    }

    info!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
