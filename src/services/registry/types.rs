use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// 服务实例注册信息
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub service_name: String,
    pub host: String,
    pub port: u16,
    pub registered_at: Instant,
    pub last_heartbeat: Instant,
}

impl ServiceInstance {
    pub fn new(service_name: String, host: String, port: u16) -> Self {
        let now = Instant::now();
        Self {
            service_name,
            host,
            port,
            registered_at: now,
            last_heartbeat: now,
        }
    }

    pub fn instance_id(&self) -> String {
        instance_id(&self.host, self.port)
    }

    pub fn update_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    // 晚于 `now` 的心跳视为未过期
    pub fn is_expired_at(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > timeout
    }

    pub fn address(&self) -> InstanceAddress {
        InstanceAddress {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// 实例在服务桶内的键：`host:port`
pub fn instance_id(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

/// register / heartbeat / deregister 的请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRegistration {
    pub service_name: String,
    pub host: String,
    pub port: u16,
}

impl InstanceRegistration {
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            host: host.into(),
            port,
        }
    }

    pub fn instance_id(&self) -> String {
        instance_id(&self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.service_name.trim().is_empty() {
            return Err(RegistryError::InvalidRegistration(
                "serviceName must not be empty".to_string(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(RegistryError::InvalidRegistration(
                "host must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(RegistryError::InvalidRegistration(
                "port must not be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// lookup 返回的实例地址
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceAddress {
    pub host: String,
    pub port: u16,
}

impl InstanceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// 用于拼接 URL 的 `host:port`，IPv6 地址加方括号
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for InstanceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.authority())
    }
}

/// 注册中心应答
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAck {
    pub success: bool,
    pub message: String,
}

impl RegistryAck {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// 注册中心错误类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Instance {instance_id} of service '{service_name}' is not registered")]
    NotFound {
        service_name: String,
        instance_id: String,
    },
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),
}

// 实例ID -> 实例
pub type ServiceInstances = HashMap<String, ServiceInstance>;

// 服务目录（服务名 -> 服务实例集合），每个桶受 DashMap 分片锁保护
pub type ServiceDirectory = Arc<DashMap<String, ServiceInstances>>;
