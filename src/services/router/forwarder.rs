use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, HOST};
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use super::error::RouterError;
use super::extractor::RouteTarget;
use super::response::{RouterResponse, full_body};
use crate::services::registry::InstanceAddress;

pub const X_FORWARDED_PREFIX: &str = "x-forwarded-prefix";

// 逐跳头部，不转发
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// 去掉逐跳头部，以及 `Connection` 中列出的头部
pub fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    let connection_listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name) || connection_listed.iter().any(|listed| listed == name.as_str()) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

// 转发请求到目标实例，原样回传状态码、头部和响应体
pub async fn forward_request(
    client: &reqwest::Client,
    instance: &InstanceAddress,
    target: &RouteTarget,
    parts: &http::request::Parts,
    body: Bytes,
) -> Result<RouterResponse, RouterError> {
    let url = format!("http://{}{}", instance.authority(), target.downstream_path);

    let mut headers = filter_headers(&parts.headers);
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);
    if let Ok(prefix) = HeaderValue::from_str(&target.prefix) {
        headers.insert(X_FORWARDED_PREFIX, prefix);
    }

    let mut request = client.request(parts.method.clone(), &url).headers(headers);
    if !body.is_empty() {
        request = request.body(body);
    }

    // 连接失败或超时，交给调用方决定是否换实例重试
    let response = request
        .send()
        .await
        .map_err(|e| RouterError::DownstreamUnreachable {
            target: instance.authority(),
            reason: e.to_string(),
        })?;

    let status = response.status();
    let mut response_headers = filter_headers(response.headers());
    // HEAD 响应没有响应体，保留下游声明的长度；其余按重建的响应体重新计算
    if parts.method != Method::HEAD {
        response_headers.remove(CONTENT_LENGTH);
    }

    let response_body = response.bytes().await.map_err(|e| {
        RouterError::ForwardingError(format!(
            "Failed to read response from {}: {e}",
            instance.authority()
        ))
    })?;

    let mut response_builder = http::Response::builder().status(status);
    if let Some(headers) = response_builder.headers_mut() {
        *headers = response_headers;
    }

    response_builder
        .body(full_body(response_body))
        .map_err(|e| RouterError::ForwardingError(format!("Failed to build response: {e}")))
}
