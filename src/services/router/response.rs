use super::error::RouterError;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// 使用 UnsyncBoxBody 来避免 Sync 约束
pub type RouterBody = UnsyncBoxBody<Bytes, BoxError>;

pub type RouterResponse = http::Response<RouterBody>;

pub fn full_body(bytes: Bytes) -> RouterBody {
    UnsyncBoxBody::new(Full::new(bytes).map_err(|never| -> BoxError { match never {} }))
}

// 创建错误响应
pub fn create_error_response(error: &RouterError) -> RouterResponse {
    let status = error.status_code();
    tracing::debug!(status = %status, error = %error, "Creating error response");

    match http::Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body(Bytes::from(format!("{error}\n"))))
    {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create error response");
            let mut response = http::Response::new(full_body(Bytes::new()));
            *response.status_mut() = status;
            response
        }
    }
}
