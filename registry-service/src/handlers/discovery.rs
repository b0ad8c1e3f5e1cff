use axum::{extract::State, Json};

use crate::models::ServiceDiscovery;
use crate::AppState;

/// GET /.well-known/terraform.json
pub async fn service_discovery(State(state): State<AppState>) -> Json<ServiceDiscovery> {
    let discovery = &state.config.discovery;
    Json(ServiceDiscovery {
        login_v1: discovery.login.clone(),
        modules_v1: discovery.modules_path.clone(),
    })
}
