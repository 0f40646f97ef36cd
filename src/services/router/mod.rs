pub mod balancer;
pub mod error;
pub mod extractor;
pub mod forwarder;
pub mod response;

pub use balancer::RoundRobin;
pub use error::RouterError;
pub use extractor::{RouteTable, RouteTarget};
pub use response::{BoxError, RouterBody, RouterResponse};

use crate::config::Config;
use crate::services::client::{RegistryClient, RegistryClientConfig, RegistryClientError};
use crate::services::registry::InstanceAddress;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::HeaderValue;
use http_body::Body;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;
use uuid::Uuid;

pub const X_REQUEST_ID: &str = "x-request-id";

// 定义动态路由服务
#[derive(Debug, Clone)]
pub struct DynamicRouter {
    registry_client: RegistryClient,
    http_client: reqwest::Client,
    routes: Arc<RouteTable>,
    balancer: RoundRobin,
    lookup_timeout: Duration,
    max_body_bytes: usize,
}

impl DynamicRouter {
    pub fn new(config: &Config) -> Result<Self, RegistryClientError> {
        let registry_client = RegistryClient::new(&RegistryClientConfig::from_config(
            config,
            config.lookup_timeout(),
        ))?;

        // 下游的重定向原样回传给调用方
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;

        Ok(Self {
            registry_client,
            http_client,
            routes: Arc::new(RouteTable::new(config.gateway.routes.clone())),
            balancer: RoundRobin::new(),
            lookup_timeout: config.lookup_timeout(),
            max_body_bytes: config.gateway.max_body_bytes,
        })
    }

    // 查询注册中心；超时或失败都按无可用实例处理
    async fn resolve_instances(&self, service_name: &str) -> Vec<InstanceAddress> {
        match tokio::time::timeout(self.lookup_timeout, self.registry_client.lookup(service_name))
            .await
        {
            Ok(Ok(mut instances)) => {
                instances.sort();
                instances
            }
            Ok(Err(e)) => {
                tracing::warn!(service_name = %service_name, error = %e, "Registry lookup failed");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    service_name = %service_name,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "Registry lookup timed out"
                );
                Vec::new()
            }
        }
    }

    /// 处理一个入站请求：解析服务名、选择实例、转发，失败时换实例重试一次
    pub async fn route<B>(&self, req: http::Request<B>) -> RouterResponse
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError> + Send,
    {
        let target = match extractor::extract_route(req.uri(), &self.routes) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(path = %req.uri().path(), error = %e, "Invalid gateway path");
                return response::create_error_response(&e);
            }
        };

        let instances = self.resolve_instances(&target.service_name).await;
        let candidates = self.balancer.candidates(&target.service_name, &instances);
        if candidates.is_empty() {
            let error = RouterError::ServiceUnavailable(format!(
                "No live instances of service '{}'",
                target.service_name
            ));
            tracing::warn!(service_name = %target.service_name, "No live instances");
            return response::create_error_response(&error);
        }

        let (mut parts, body) = req.into_parts();
        // fallback_service 不经过 DefaultBodyLimit，这里自行限制
        let body = match Limited::new(body, self.max_body_bytes).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                tracing::warn!(
                    service_name = %target.service_name,
                    limit = self.max_body_bytes,
                    "Request body too large"
                );
                return response::create_error_response(&RouterError::PayloadTooLarge {
                    limit: self.max_body_bytes,
                });
            }
            Err(e) => {
                return response::create_error_response(&RouterError::InvalidRequest(format!(
                    "Failed to read request body: {e}"
                )));
            }
        };

        let request_id = match parts.headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok()) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                if let Ok(value) = HeaderValue::from_str(&id) {
                    parts.headers.insert(X_REQUEST_ID, value);
                }
                id
            }
        };

        let mut last_error = None;
        for (attempt, instance) in candidates.iter().enumerate() {
            tracing::debug!(
                request_id = %request_id,
                service_name = %target.service_name,
                target = %instance,
                path = %target.downstream_path,
                attempt,
                "Forwarding request"
            );

            match forwarder::forward_request(&self.http_client, instance, &target, &parts, body.clone())
                .await
            {
                Ok(response) => return response,
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        request_id = %request_id,
                        service_name = %target.service_name,
                        error = %e,
                        "Downstream instance unreachable"
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    tracing::error!(request_id = %request_id, error = %e, "Failed to forward request");
                    return response::create_error_response(&e);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            RouterError::ForwardingError(format!(
                "No instance of '{}' accepted the request",
                target.service_name
            ))
        });
        tracing::error!(request_id = %request_id, error = %error, "Failed to forward request");
        response::create_error_response(&error)
    }
}

impl<B> Service<http::Request<B>> for DynamicRouter
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + Send,
{
    type Response = RouterResponse;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let router = self.clone();
        Box::pin(async move { Ok(router.route(req).await) })
    }
}
