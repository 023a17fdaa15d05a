//! Management API Routes

use super::{
    auth::{auth_middleware, ApiAuth},
    handlers::*,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Management API router
pub struct ManagementApi;

impl ManagementApi {
    /// Create the management API router
    pub fn create_router(state: AppState, auth: Arc<ApiAuth>) -> Router {
        // Public routes (no authentication required)
        let public_routes = Router::new()
            .route("/health", get(health_check))
            .with_state(state.clone());

        // Protected routes (authentication required)
        let protected_routes = Router::new()
            .route("/sessions", post(register_session))
            .route("/sessions/:token", get(get_session).delete(unregister_session))
            .layer(middleware::from_fn_with_state(auth, auth_middleware))
            .with_state(state);

        public_routes
            .merge(protected_routes)
            .layer(TraceLayer::new_for_http())
    }
}
