use http::StatusCode;

// 定义路由错误类型
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("Downstream {target} unreachable: {reason}")]
    DownstreamUnreachable { target: String, reason: String },
    #[error("Forwarding error: {0}")]
    ForwardingError(String),
}

impl RouterError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RouterError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RouterError::InvalidPath(_) => StatusCode::NOT_FOUND,
            RouterError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RouterError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RouterError::DownstreamUnreachable { .. } | RouterError::ForwardingError(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// 是否可以换一个实例重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, RouterError::DownstreamUnreachable { .. })
    }
}
