use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{activity, handlers, middleware::metrics_middleware, rules};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Instances and their rules
        .route("/instances", get(handlers::list_instances))
        .route(
            "/instances/{name}/rules",
            get(rules::list_rules).put(rules::replace_rules),
        )
        .route(
            "/instances/{name}/rules/{id}/apply",
            post(rules::apply_rule),
        )
        // Activity
        .route("/activity", get(activity::query_activity))
        .with_state(Arc::clone(&state));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
