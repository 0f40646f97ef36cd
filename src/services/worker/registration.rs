use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::services::client::{RegistryClient, RegistryClientError};
use crate::services::registry::InstanceRegistration;

/// 注册/心跳节奏配置
#[derive(Debug, Clone)]
pub struct RegistrarConfig {
    pub heartbeat_interval: Duration,
    pub retry_initial: Duration,
    pub retry_max: Duration,
}

impl RegistrarConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            retry_initial: config.retry_initial(),
            retry_max: config.retry_max(),
        }
    }
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            retry_initial: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
        }
    }
}

/// 负责向注册中心注册、续约和注销当前实例
#[derive(Debug, Clone)]
pub struct InstanceRegistrar {
    client: RegistryClient,
    registration: InstanceRegistration,
    config: RegistrarConfig,
}

impl InstanceRegistrar {
    pub fn new(
        client: RegistryClient,
        registration: InstanceRegistration,
        config: RegistrarConfig,
    ) -> Self {
        Self {
            client,
            registration,
            config,
        }
    }

    pub fn registration(&self) -> &InstanceRegistration {
        &self.registration
    }

    /// 在 `tracker` 上启动注册与心跳循环，关闭时注销
    pub fn spawn(self, tracker: &TaskTracker, shutdown: CancellationToken) {
        tracker.spawn(self.run(shutdown));
    }

    pub async fn run(self, shutdown: CancellationToken) {
        if !self.register_with_backoff(&shutdown).await {
            return;
        }

        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.send_heartbeat(&shutdown).await,
            }
        }

        self.deregister().await;
    }

    // 注册失败按指数退避重试，收到关闭信号时返回 false
    pub async fn register_with_backoff(&self, shutdown: &CancellationToken) -> bool {
        let mut delay = self.config.retry_initial;
        let mut attempt: u32 = 1;

        loop {
            match self.client.register(&self.registration).await {
                Ok(()) => {
                    tracing::info!(
                        service_name = %self.registration.service_name,
                        instance_id = %self.registration.instance_id(),
                        registry = %self.client.base_url(),
                        "Registered with registry"
                    );
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        service_name = %self.registration.service_name,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Registration failed, retrying"
                    );
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }

            delay = (delay * 2).min(self.config.retry_max);
            attempt = attempt.saturating_add(1);
        }
    }

    async fn send_heartbeat(&self, shutdown: &CancellationToken) {
        match self.client.heartbeat(&self.registration).await {
            Ok(()) => {
                tracing::debug!(
                    service_name = %self.registration.service_name,
                    instance_id = %self.registration.instance_id(),
                    "Heartbeat sent"
                );
            }
            Err(RegistryClientError::NotFound(message)) => {
                tracing::warn!(
                    service_name = %self.registration.service_name,
                    instance_id = %self.registration.instance_id(),
                    message = %message,
                    "Instance no longer registered, re-registering"
                );
                self.register_with_backoff(shutdown).await;
            }
            Err(e) => {
                tracing::warn!(
                    service_name = %self.registration.service_name,
                    error = %e,
                    "Heartbeat failed"
                );
            }
        }
    }

    async fn deregister(&self) {
        match self.client.deregister(&self.registration).await {
            Ok(()) => tracing::info!(
                service_name = %self.registration.service_name,
                instance_id = %self.registration.instance_id(),
                "Deregistered from registry"
            ),
            Err(e) => tracing::warn!(
                service_name = %self.registration.service_name,
                error = %e,
                "Failed to deregister, registry will expire the instance"
            ),
        }
    }
}
