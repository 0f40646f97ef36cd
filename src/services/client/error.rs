/// 注册中心客户端错误类型
#[derive(Debug, thiserror::Error)]
pub enum RegistryClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Invalid registry url: {0}")]
    InvalidUrl(String),
    #[error("Instance not registered: {0}")]
    NotFound(String),
    #[error("Unexpected registry response {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },
}
