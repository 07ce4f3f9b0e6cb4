//! Admin API.
//!
//! Read-only views of the active generation, its routes and the provider
//! registry, behind a bearer API key.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::provider::ProviderRegistry;
use crate::switchboard::Switchboard;

/// State shared by the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub switchboard: Arc<Switchboard>,
    pub registry: ProviderRegistry,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(get_routes))
        .route("/admin/providers", get(get_providers))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
