use std::collections::HashMap;

use http::Uri;

use super::error::RouterError;

/// 静态路由表：路径前缀 -> 服务名，启动时加载，运行期不变
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, String>,
}

impl RouteTable {
    pub fn new(routes: HashMap<String, String>) -> Self {
        // 前缀统一去掉首尾的 '/'
        let routes = routes
            .into_iter()
            .map(|(prefix, service)| (prefix.trim_matches('/').to_string(), service))
            .collect();
        Self { routes }
    }

    /// 未配置的前缀直接作为服务名
    pub fn resolve<'a>(&'a self, prefix: &'a str) -> &'a str {
        self.routes.get(prefix).map(String::as_str).unwrap_or(prefix)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// 路由解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub service_name: String,
    /// 被剥离的路径前缀，例如 "/greeting"
    pub prefix: String,
    /// 转发给下游的路径（含查询串）
    pub downstream_path: String,
}

// 解析 `/{serviceName}/**`，剥离前缀后保留剩余路径
pub fn extract_route(uri: &Uri, routes: &RouteTable) -> Result<RouteTarget, RouterError> {
    let path = uri.path();
    let Some(trimmed) = path.strip_prefix('/') else {
        return Err(RouterError::InvalidPath(
            "Path must start with '/'".to_string(),
        ));
    };

    let (prefix, remainder) = match trimmed.split_once('/') {
        Some((prefix, rest)) => (prefix, format!("/{rest}")),
        None => (trimmed, "/".to_string()),
    };

    if prefix.is_empty() {
        return Err(RouterError::InvalidPath(format!(
            "No service name in path '{path}'"
        )));
    }

    let downstream_path = match uri.query() {
        Some(query) => format!("{remainder}?{query}"),
        None => remainder,
    };

    Ok(RouteTarget {
        service_name: routes.resolve(prefix).to_string(),
        prefix: format!("/{prefix}"),
        downstream_path,
    })
}
