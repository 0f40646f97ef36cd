use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
/// 环境变量前缀
pub const ENV_PREFIX: &str = "DISCOVERY_";
/// 网关请求体默认上限，与 axum 的 `DefaultBodyLimit` 一致
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// 配置加载错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid environment override: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub heartbeat: HeartbeatConfig,
    pub service: ServiceConfig,
    pub gateway: GatewayConfig,
}

/// 监听配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// `server.port`，缺失时各组件使用自己的默认端口
    pub port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: None,
        }
    }
}

/// 注册中心配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 注册中心地址
    pub url: String,
    /// 心跳过期阈值（秒）
    pub expiry_seconds: u64,
    /// 过期清理周期（秒）
    pub sweep_interval_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8761".to_string(),
            expiry_seconds: 90,
            sweep_interval_seconds: 30,
        }
    }
}

/// 心跳配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_seconds: u64,
    /// 注册失败时的初始退避（毫秒）
    pub retry_initial_ms: u64,
    /// 退避上限（毫秒）
    pub retry_max_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            retry_initial_ms: 500,
            retry_max_ms: 30_000,
        }
    }
}

/// 微服务自身的注册信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub advertise_host: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "greeting".to_string(),
            advertise_host: "127.0.0.1".to_string(),
        }
    }
}

/// 网关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub request_timeout_seconds: u64,
    pub lookup_timeout_seconds: u64,
    /// 转发前缓存的请求体上限（字节）
    pub max_body_bytes: usize,
    /// 静态路由表：路径前缀 -> 服务名
    pub routes: HashMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 10,
            lookup_timeout_seconds: 2,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            routes: HashMap::new(),
        }
    }
}

/// `DISCOVERY_` 前缀的环境变量覆盖项
#[derive(Debug, Default, Deserialize)]
pub struct EnvOverrides {
    // 端口按字符串读取，空值或无法解析时视为缺失
    pub server_port: Option<String>,
    pub server_host: Option<String>,
    pub registry_url: Option<String>,
    pub registry_expiry_seconds: Option<u64>,
    pub registry_sweep_interval_seconds: Option<u64>,
    pub heartbeat_interval_seconds: Option<u64>,
    pub service_name: Option<String>,
    pub service_advertise_host: Option<String>,
    pub gateway_max_body_bytes: Option<usize>,
}

impl Config {
    /// 加载顺序：`.env` -> 配置文件 -> 环境变量
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let explicit_path = std::env::var(format!("{ENV_PREFIX}CONFIG")).ok();
        let path = explicit_path
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if explicit_path.is_some() || Path::new(&path).exists() {
            let config_str = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            tracing::info!(path = %path, "Loaded configuration file");
            Self::from_toml_str(&config_str)?
        } else {
            Self::default()
        };

        let overrides = envy::prefixed(ENV_PREFIX).from_env::<EnvOverrides>()?;
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(config_str)?)
    }

    pub fn apply_overrides(&mut self, overrides: EnvOverrides) {
        if let Some(raw) = overrides.server_port {
            self.server.port = parse_port(&raw);
        }
        if let Some(host) = overrides.server_host {
            self.server.host = host;
        }
        if let Some(url) = overrides.registry_url {
            self.registry.url = url;
        }
        if let Some(secs) = overrides.registry_expiry_seconds {
            self.registry.expiry_seconds = secs;
        }
        if let Some(secs) = overrides.registry_sweep_interval_seconds {
            self.registry.sweep_interval_seconds = secs;
        }
        if let Some(secs) = overrides.heartbeat_interval_seconds {
            self.heartbeat.interval_seconds = secs;
        }
        if let Some(name) = overrides.service_name {
            self.service.name = name;
        }
        if let Some(host) = overrides.service_advertise_host {
            self.service.advertise_host = host;
        }
        if let Some(limit) = overrides.gateway_max_body_bytes {
            self.gateway.max_body_bytes = limit;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("registry.expiry_seconds", self.registry.expiry_seconds),
            ("registry.sweep_interval_seconds", self.registry.sweep_interval_seconds),
            ("heartbeat.interval_seconds", self.heartbeat.interval_seconds),
            ("gateway.request_timeout_seconds", self.gateway.request_timeout_seconds),
            ("gateway.lookup_timeout_seconds", self.gateway.lookup_timeout_seconds),
        ];
        for (key, value) in periods {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be greater than 0")));
            }
        }
        if self.gateway.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "gateway.max_body_bytes must be greater than 0".to_string(),
            ));
        }
        if self.service.name.is_empty() {
            return Err(ConfigError::Invalid("service.name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn listen_port(&self, default_port: u16) -> u16 {
        self.server.port.unwrap_or(default_port)
    }

    pub fn registry_expiry(&self) -> Duration {
        Duration::from_secs(self.registry.expiry_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.registry.sweep_interval_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_seconds)
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.heartbeat.retry_initial_ms.max(1))
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.heartbeat.retry_max_ms.max(self.heartbeat.retry_initial_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.request_timeout_seconds)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.lookup_timeout_seconds)
    }
}

fn parse_port(raw: &str) -> Option<u16> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<u16>() {
        Ok(port) => Some(port),
        Err(e) => {
            tracing::warn!(value = %raw, error = %e, "Ignoring unparseable server.port");
            None
        }
    }
}
