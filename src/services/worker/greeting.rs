use axum::extract::State;
use axum::routing::get;
use axum::Router;

/// 端口未配置时返回的问候语
pub const FALLBACK_GREETING: &str = "Something unexpected happened, no greeting for you";

/// 问候服务，端口取自配置中的 `server.port`
#[derive(Debug, Clone, Copy, Default)]
pub struct GreetingService {
    configured_port: Option<u16>,
}

impl GreetingService {
    pub fn new(configured_port: Option<u16>) -> Self {
        Self { configured_port }
    }

    pub fn service_greeting(&self) -> String {
        match self.configured_port {
            Some(port) => format!("Hello from port: {port}\n"),
            None => FALLBACK_GREETING.to_string(),
        }
    }
}

/// 微服务的 HTTP 路由
pub fn router(greeting: GreetingService) -> Router {
    Router::new()
        .route("/greet", get(greet))
        .route("/health", get(health))
        .with_state(greeting)
}

// 端口缺失时同样返回 200
async fn greet(State(greeting): State<GreetingService>) -> String {
    greeting.service_greeting()
}

async fn health() -> &'static str {
    "OK"
}
