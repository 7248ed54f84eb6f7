// libs/prescription-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn prescription_routes(state: Arc<AppConfig>) -> Router {
    // All prescription operations require authentication
    let protected_routes = Router::new()
        .route(
            "/appointments/{appointment_id}",
            post(handlers::attach_prescription),
        )
        .route(
            "/appointments/{appointment_id}",
            get(handlers::list_prescriptions),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(protected_routes).with_state(state)
}
