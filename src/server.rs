use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::services::client::{RegistryClient, RegistryClientConfig};
use crate::services::registry::{InstanceRegistration, ServiceRegistry, http_impl};
use crate::services::router::{BoxError, DynamicRouter};
use crate::services::worker::{GreetingService, InstanceRegistrar, RegistrarConfig, greeting};

pub const DEFAULT_REGISTRY_PORT: u16 = 8761;
pub const DEFAULT_WORKER_PORT: u16 = 8080;
pub const DEFAULT_GATEWAY_PORT: u16 = 8765;

/// 进程角色，三个组件各自独立运行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Registry,
    Greeting,
    Gateway,
}

impl Role {
    pub fn default_port(self) -> u16 {
        match self {
            Role::Registry => DEFAULT_REGISTRY_PORT,
            Role::Greeting => DEFAULT_WORKER_PORT,
            Role::Gateway => DEFAULT_GATEWAY_PORT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown role '{0}', expected one of: registry, greeting, gateway")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "registry" => Ok(Role::Registry),
            "greeting" | "worker" => Ok(Role::Greeting),
            "gateway" => Ok(Role::Gateway),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Registry => "registry",
            Role::Greeting => "greeting",
            Role::Gateway => "gateway",
        };
        f.write_str(name)
    }
}

pub async fn start(role: Role, config: Config) -> Result<(), BoxError> {
    let port = config.listen_port(role.default_port());
    let listener = TcpListener::bind((config.server.host.as_str(), port)).await?;

    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    match role {
        Role::Registry => {
            let registry = ServiceRegistry::new(config.registry_expiry());
            serve_registry(listener, registry, config.sweep_interval(), shutdown).await
        }
        Role::Greeting => serve_worker(listener, &config, shutdown).await,
        Role::Gateway => serve_gateway(listener, &config, shutdown).await,
    }
}

// Ctrl-C 触发优雅关闭
fn spawn_shutdown_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                shutdown.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });
}

pub async fn serve_registry(
    listener: TcpListener,
    registry: ServiceRegistry,
    sweep_interval: Duration,
    shutdown: CancellationToken,
) -> Result<(), BoxError> {
    tracing::info!(
        addr = %listener.local_addr()?,
        expiry_secs = registry.expiry().as_secs(),
        sweep_interval_secs = sweep_interval.as_secs(),
        "Registry listening"
    );

    registry.spawn_sweeper(sweep_interval, shutdown.clone());

    axum::serve(listener, http_impl::router(registry.clone()))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    registry.shutdown().await;
    tracing::info!("Registry stopped");
    Ok(())
}

pub async fn serve_worker(
    listener: TcpListener,
    config: &Config,
    shutdown: CancellationToken,
) -> Result<(), BoxError> {
    let local_addr = listener.local_addr()?;

    if config.server.port.is_none() {
        tracing::warn!("server.port is not configured, /greet will answer with the fallback greeting");
    }
    let greeting_service = GreetingService::new(config.server.port);

    let client = RegistryClient::new(&RegistryClientConfig::from_config(
        config,
        config.request_timeout(),
    ))?;
    // 注册实际监听的端口
    let registration = InstanceRegistration::new(
        config.service.name.clone(),
        config.service.advertise_host.clone(),
        local_addr.port(),
    );

    let worker_shutdown = shutdown.child_token();
    let tracker = TaskTracker::new();
    InstanceRegistrar::new(client, registration, RegistrarConfig::from_config(config))
        .spawn(&tracker, worker_shutdown.clone());

    tracing::info!(
        addr = %local_addr,
        service_name = %config.service.name,
        registry = %config.registry.url,
        "Greeting service listening"
    );

    let served = axum::serve(listener, greeting::router(greeting_service))
        .with_graceful_shutdown(worker_shutdown.clone().cancelled_owned())
        .await;

    // 等待注册循环完成注销
    worker_shutdown.cancel();
    tracker.close();
    tracker.wait().await;

    served?;
    tracing::info!("Greeting service stopped");
    Ok(())
}

pub async fn serve_gateway(
    listener: TcpListener,
    config: &Config,
    shutdown: CancellationToken,
) -> Result<(), BoxError> {
    let router = DynamicRouter::new(config)?;
    let app = axum::Router::new().fallback_service(router);

    tracing::info!(
        addr = %listener.local_addr()?,
        registry = %config.registry.url,
        static_routes = config.gateway.routes.len(),
        "Gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}
