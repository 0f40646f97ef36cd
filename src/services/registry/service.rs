use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::types::{
    InstanceAddress, InstanceRegistration, RegistryError, ServiceDirectory, ServiceInstance,
};

// 服务注册表
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    directory: ServiceDirectory,
    expiry: Duration,
    task_tracker: TaskTracker,
}

impl ServiceRegistry {
    pub fn new(expiry: Duration) -> Self {
        Self {
            directory: Arc::new(DashMap::new()),
            expiry,
            task_tracker: TaskTracker::new(),
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    // 注册或刷新实例，重复注册只保留一条记录
    pub fn register(&self, registration: &InstanceRegistration) -> Result<(), RegistryError> {
        registration.validate()?;
        let instance_id = registration.instance_id();

        // 持有桶的写锁完成插入，清理任务不会在中途移除空桶
        let mut instances = self
            .directory
            .entry(registration.service_name.clone())
            .or_default();

        match instances.get_mut(&instance_id) {
            Some(existing) => {
                existing.update_heartbeat();
                tracing::debug!(
                    service_name = %registration.service_name,
                    instance_id = %instance_id,
                    "Refreshed existing registration"
                );
            }
            None => {
                tracing::info!(
                    service_name = %registration.service_name,
                    instance_id = %instance_id,
                    "Registering service instance"
                );
                instances.insert(
                    instance_id,
                    ServiceInstance::new(
                        registration.service_name.clone(),
                        registration.host.clone(),
                        registration.port,
                    ),
                );
            }
        }

        Ok(())
    }

    // 更新心跳；已过期（无论是否已被清理）的实例需要重新注册
    pub fn heartbeat(&self, registration: &InstanceRegistration) -> Result<(), RegistryError> {
        let instance_id = registration.instance_id();
        let not_found = || RegistryError::NotFound {
            service_name: registration.service_name.clone(),
            instance_id: instance_id.clone(),
        };

        let now = Instant::now();
        let mut instances = self
            .directory
            .get_mut(&registration.service_name)
            .ok_or_else(not_found)?;

        let expired = match instances.get_mut(&instance_id) {
            Some(instance) if !instance.is_expired_at(now, self.expiry) => {
                instance.update_heartbeat();
                tracing::debug!(
                    service_name = %registration.service_name,
                    instance_id = %instance_id,
                    "Updated heartbeat for service instance"
                );
                return Ok(());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            instances.remove(&instance_id);
            // 先释放桶的写锁，再移除空桶
            drop(instances);
            self.directory
                .remove_if(&registration.service_name, |_, instances| instances.is_empty());
            tracing::warn!(
                service_name = %registration.service_name,
                instance_id = %instance_id,
                "Heartbeat arrived after expiry, instance must re-register"
            );
        }

        Err(not_found())
    }

    // 注销实例
    pub fn deregister(&self, registration: &InstanceRegistration) -> bool {
        let instance_id = registration.instance_id();
        let removed = self
            .directory
            .get_mut(&registration.service_name)
            .and_then(|mut instances| instances.remove(&instance_id))
            .is_some();

        if removed {
            self.directory
                .remove_if(&registration.service_name, |_, instances| instances.is_empty());
            tracing::info!(
                service_name = %registration.service_name,
                instance_id = %instance_id,
                "Deregistered service instance"
            );
        }

        removed
    }

    // 查询服务的存活实例，未知服务返回空集合
    pub fn lookup(&self, service_name: &str) -> Vec<InstanceAddress> {
        let now = Instant::now();
        let mut addresses: Vec<InstanceAddress> = self
            .directory
            .get(service_name)
            .map(|instances| {
                instances
                    .values()
                    .filter(|instance| !instance.is_expired_at(now, self.expiry))
                    .map(ServiceInstance::address)
                    .collect()
            })
            .unwrap_or_default();

        addresses.sort();
        addresses
    }

    // 获取所有服务及其存活实例
    pub fn services(&self) -> BTreeMap<String, Vec<InstanceAddress>> {
        let now = Instant::now();
        self.directory
            .iter()
            .filter_map(|entry| {
                let mut addresses: Vec<InstanceAddress> = entry
                    .value()
                    .values()
                    .filter(|instance| !instance.is_expired_at(now, self.expiry))
                    .map(ServiceInstance::address)
                    .collect();
                if addresses.is_empty() {
                    return None;
                }
                addresses.sort();
                Some((entry.key().clone(), addresses))
            })
            .collect()
    }

    /// 目录中的实例总数（包含尚未清理的过期实例）
    pub fn instance_count(&self) -> usize {
        self.directory.iter().map(|entry| entry.value().len()).sum()
    }

    // 清理过期的实例，返回被移除的数量
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    // 以 `now` 为基准清理；心跳晚于 `now` 的实例不会被本轮移除
    fn sweep_expired_at(&self, now: Instant) -> usize {
        let timeout = self.expiry;
        let mut evicted = 0;

        // retain 在分片写锁内判断过期，与同一桶的注册/心跳互斥
        self.directory.retain(|service_name, instances| {
            instances.retain(|instance_id, instance| {
                if instance.is_expired_at(now, timeout) {
                    tracing::warn!(
                        service_name = %service_name,
                        instance_id = %instance_id,
                        elapsed_secs = now.saturating_duration_since(instance.last_heartbeat).as_secs(),
                        timeout_secs = timeout.as_secs(),
                        "Service instance expired due to heartbeat timeout, removing from registry"
                    );
                    evicted += 1;
                    false
                } else {
                    true
                }
            });
            !instances.is_empty()
        });

        evicted
    }

    // 启动定期清理任务
    pub fn spawn_sweeper(&self, interval: Duration, shutdown: CancellationToken) {
        let registry = self.clone();
        self.task_tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 第一次 tick 立即完成
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Registry sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        tracing::debug!("Executing service expiration check...");
                        let evicted = registry.sweep_expired();
                        if evicted > 0 {
                            tracing::info!(
                                expired_count = evicted,
                                "Cleanup check completed, removed expired instances"
                            );
                        }
                    }
                }
            }
        });
    }

    /// 等待后台任务退出
    pub async fn shutdown(&self) {
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }
}
