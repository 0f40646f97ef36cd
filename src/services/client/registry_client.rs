use reqwest::{StatusCode, Url};
use serde::Serialize;

use super::config::RegistryClientConfig;
use super::error::RegistryClientError;
use crate::services::registry::{InstanceAddress, InstanceRegistration};

/// 注册中心 HTTP 客户端
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: reqwest::Client,
}

impl RegistryClient {
    /// 创建新的注册中心客户端
    pub fn new(config: &RegistryClientConfig) -> Result<Self, RegistryClientError> {
        let base_url = Url::parse(&config.registry_url)
            .map_err(|e| RegistryClientError::InvalidUrl(format!("{}: {e}", config.registry_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(RegistryClientError::InvalidUrl(config.registry_url.clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .no_proxy()
            .build()?;

        Ok(Self { base_url, http })
    }

    /// 便捷的创建方法，使用默认超时
    pub fn connect(registry_url: &str) -> Result<Self, RegistryClientError> {
        Self::new(&RegistryClientConfig {
            registry_url: registry_url.to_string(),
            ..Default::default()
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn register(&self, registration: &InstanceRegistration) -> Result<(), RegistryClientError> {
        self.post("register", registration).await
    }

    /// 发送心跳，实例已被移除时返回 `NotFound`
    pub async fn heartbeat(&self, registration: &InstanceRegistration) -> Result<(), RegistryClientError> {
        self.post("heartbeat", registration).await
    }

    pub async fn deregister(&self, registration: &InstanceRegistration) -> Result<(), RegistryClientError> {
        self.post("deregister", registration).await
    }

    /// 查询服务的存活实例
    pub async fn lookup(&self, service_name: &str) -> Result<Vec<InstanceAddress>, RegistryClientError> {
        let url = self.endpoint(&["lookup", service_name])?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RegistryClientError::UnexpectedStatus {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<Vec<InstanceAddress>>().await?)
    }

    async fn post<T: Serialize>(&self, segment: &str, payload: &T) -> Result<(), RegistryClientError> {
        let url = self.endpoint(&[segment])?;
        let response = self.http.post(url).json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryClientError::NotFound(message));
        }
        Err(RegistryClientError::UnexpectedStatus {
            status: status.as_u16(),
            message,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RegistryClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}
