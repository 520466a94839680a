//! # Tally HTTP
//!
//! Administrative endpoints for full-system backup and restore:
//!
//! - `GET /admin/backup` downloads the current state as a JSON envelope
//! - `POST /admin/restore` replaces all data with an uploaded envelope
//! - `GET /health` reports whether the backend answers
//!
//! The router carries no authentication. The host application is expected to
//! wrap it in whatever admin guard it uses:
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # fn example(db: Arc<dyn tally_store::Database>) {
//! let app = axum::Router::new().merge(tally_http::admin_router(db));
//! # }
//! ```

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tally_store::Database;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

pub mod error;
pub mod handlers;

pub use error::{ApiError, ErrorResponse};

/// Largest accepted restore upload
pub const DEFAULT_MAX_RESTORE_BYTES: usize = 64 * 1024 * 1024;

/// Shared state of the admin routes
#[derive(Clone)]
pub struct AdminState {
    pub db: Arc<dyn Database>,
}

/// Admin router with the default upload limit
pub fn admin_router(db: Arc<dyn Database>) -> Router {
    admin_router_with_limit(db, DEFAULT_MAX_RESTORE_BYTES)
}

/// Admin router accepting restore uploads up to `max_restore_bytes`
pub fn admin_router_with_limit(db: Arc<dyn Database>, max_restore_bytes: usize) -> Router {
    let restore = Router::new()
        .route("/admin/restore", post(handlers::upload_restore))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_restore_bytes));

    Router::new()
        .route("/admin/backup", get(handlers::download_backup))
        .route("/health", get(handlers::health_check))
        .merge(restore)
        .with_state(AdminState { db })
        .layer(TraceLayer::new_for_http())
}
