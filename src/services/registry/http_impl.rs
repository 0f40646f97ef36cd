use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use super::service::ServiceRegistry;
use super::types::{InstanceAddress, InstanceRegistration, RegistryAck, RegistryError};

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
            RegistryError::InvalidRegistration(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(RegistryAck::failed(self.to_string()))).into_response()
    }
}

/// 注册中心的 HTTP 路由
pub fn router(registry: ServiceRegistry) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .route("/deregister", post(deregister))
        .route("/lookup/{service_name}", get(lookup))
        .route("/services", get(services))
        .route("/health", get(health))
        .with_state(registry)
}

async fn register(
    State(registry): State<ServiceRegistry>,
    Json(request): Json<InstanceRegistration>,
) -> Result<Json<RegistryAck>, RegistryError> {
    registry.register(&request)?;
    Ok(Json(RegistryAck::ok("Registration successful")))
}

async fn heartbeat(
    State(registry): State<ServiceRegistry>,
    Json(request): Json<InstanceRegistration>,
) -> Result<Json<RegistryAck>, RegistryError> {
    registry.heartbeat(&request)?;
    Ok(Json(RegistryAck::ok("Heartbeat accepted")))
}

async fn deregister(
    State(registry): State<ServiceRegistry>,
    Json(request): Json<InstanceRegistration>,
) -> Json<RegistryAck> {
    // 注销不存在的实例同样视为成功
    if registry.deregister(&request) {
        Json(RegistryAck::ok("Deregistration successful"))
    } else {
        Json(RegistryAck::ok("Instance was not registered"))
    }
}

async fn lookup(
    State(registry): State<ServiceRegistry>,
    Path(service_name): Path<String>,
) -> Json<Vec<InstanceAddress>> {
    let instances = registry.lookup(&service_name);
    tracing::debug!(
        service_name = %service_name,
        instance_count = instances.len(),
        "Lookup"
    );
    Json(instances)
}

async fn services(
    State(registry): State<ServiceRegistry>,
) -> Json<BTreeMap<String, Vec<InstanceAddress>>> {
    Json(registry.services())
}

async fn health() -> &'static str {
    "OK"
}
