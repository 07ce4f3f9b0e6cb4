use std::time::SystemTime;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::provider::ProviderStatus;
use crate::switchboard::{DrainRecord, GenerationState};

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub accepting: bool,
    pub active_generation: u64,
    pub routes: usize,
    pub in_flight: usize,
    pub built_at: SystemTime,
    pub draining: Vec<DrainRecord>,
}

#[derive(Debug, Serialize)]
pub struct EndpointStatus {
    pub address: String,
    pub weight: u32,
    pub active_requests: usize,
}

#[derive(Debug, Serialize)]
pub struct RouteStatus {
    pub name: String,
    pub rule: String,
    pub priority: i32,
    pub middlewares: Vec<&'static str>,
    pub affinity_cookie: Option<String>,
    pub endpoints: Vec<EndpointStatus>,
}

#[derive(Debug, Serialize)]
pub struct RoutesResponse {
    pub generation: u64,
    pub state: GenerationState,
    pub routes: Vec<RouteStatus>,
}

#[derive(Debug, Serialize)]
pub struct ProviderEntry {
    pub id: String,
    #[serde(flatten)]
    pub status: ProviderStatus,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let current = state.switchboard.current();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        accepting: state.switchboard.is_accepting(),
        active_generation: current.id(),
        routes: current.table().len(),
        in_flight: current.in_flight(),
        built_at: current.table().built_at(),
        draining: state.switchboard.drain_records(),
    })
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<RoutesResponse> {
    let current = state.switchboard.current();
    let routes = current
        .table()
        .entries()
        .iter()
        .map(|entry| RouteStatus {
            name: entry.name.clone(),
            rule: entry.rule.as_str().to_string(),
            priority: entry.priority,
            middlewares: entry.chain.names(),
            affinity_cookie: entry.pool.sticky().map(|s| s.cookie_name().to_string()),
            endpoints: entry
                .pool
                .endpoints()
                .iter()
                .map(|e| EndpointStatus {
                    address: e.address().to_string(),
                    weight: e.weight,
                    active_requests: e.active(),
                })
                .collect(),
        })
        .collect();

    Json(RoutesResponse {
        generation: current.id(),
        state: current.state(),
        routes,
    })
}

pub async fn get_providers(State(state): State<AdminState>) -> Json<Vec<ProviderEntry>> {
    Json(
        state
            .registry
            .snapshot()
            .into_iter()
            .map(|(id, status)| ProviderEntry { id, status })
            .collect(),
    )
}
