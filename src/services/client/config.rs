use std::time::Duration;

use crate::config::Config;

/// 注册中心客户端配置
#[derive(Debug, Clone)]
pub struct RegistryClientConfig {
    /// 注册中心地址
    pub registry_url: String,
    /// 单次请求超时时间
    pub request_timeout: Duration,
    /// 连接超时时间
    pub connect_timeout: Duration,
}

impl RegistryClientConfig {
    pub fn from_config(config: &Config, request_timeout: Duration) -> Self {
        Self {
            registry_url: config.registry.url.clone(),
            request_timeout,
            ..Default::default()
        }
    }
}

impl Default for RegistryClientConfig {
    fn default() -> Self {
        Self {
            registry_url: "http://127.0.0.1:8761".to_string(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(2),
        }
    }
}
