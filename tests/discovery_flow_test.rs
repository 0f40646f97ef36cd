use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};
use axum::routing::any;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use discovery::config::Config;
use discovery::server;
use discovery::services::client::{RegistryClient, RegistryClientError};
use discovery::services::registry::{InstanceAddress, InstanceRegistration, ServiceRegistry};
use discovery::services::router::BoxError;

struct RunningRegistry {
    url: String,
    registry: ServiceRegistry,
    shutdown: CancellationToken,
}

struct RunningWorker {
    port: u16,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), BoxError>>,
}

async fn start_registry() -> RunningRegistry {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let registry = ServiceRegistry::new(Duration::from_secs(30));
    let shutdown = CancellationToken::new();

    tokio::spawn(server::serve_registry(
        listener,
        registry.clone(),
        Duration::from_secs(1),
        shutdown.clone(),
    ));

    RunningRegistry {
        url,
        registry,
        shutdown,
    }
}

async fn start_worker(registry_url: &str, service_name: &str) -> RunningWorker {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = Config::default();
    config.server.port = Some(port);
    config.registry.url = registry_url.to_string();
    config.service.name = service_name.to_string();
    config.service.advertise_host = "127.0.0.1".to_string();
    config.heartbeat.interval_seconds = 1;
    config.heartbeat.retry_initial_ms = 50;
    config.heartbeat.retry_max_ms = 200;

    let shutdown = CancellationToken::new();
    let worker_shutdown = shutdown.clone();
    let handle =
        tokio::spawn(async move { server::serve_worker(listener, &config, worker_shutdown).await });

    RunningWorker {
        port,
        shutdown,
        handle,
    }
}

fn gateway_config(registry_url: &str) -> Config {
    let mut config = Config::default();
    config.registry.url = registry_url.to_string();
    config.gateway.request_timeout_seconds = 5;
    config
}

async fn start_gateway(registry_url: &str) -> (String, CancellationToken) {
    start_gateway_with(gateway_config(registry_url)).await
}

async fn start_gateway_with(config: Config) -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let shutdown = CancellationToken::new();
    let gateway_shutdown = shutdown.clone();
    tokio::spawn(async move { server::serve_gateway(listener, &config, gateway_shutdown).await });

    (url, shutdown)
}

// 回显收到的方法、路径、头部和请求体
async fn echo(
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> axum::Json<serde_json::Value> {
    let headers: BTreeMap<String, String> = headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
        .collect();
    axum::Json(serde_json::json!({
        "method": method.as_str(),
        "uri": uri.to_string(),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    }))
}

async fn start_echo_instance(registry: &ServiceRegistry, service_name: &str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = axum::Router::new().route("/echo", any(echo));
    tokio::spawn(async move { axum::serve(listener, app).await });

    registry
        .register(&InstanceRegistration::new(service_name, "127.0.0.1", port))
        .unwrap();
    port
}

async fn wait_for_instances(registry: &ServiceRegistry, service_name: &str, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while registry.lookup(service_name).len() != expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("registry did not reach the expected instance count");
}

async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn get(client: &reqwest::Client, url: &str) -> (u16, String) {
    let response = client.get(url).send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gateway_round_robins_across_two_workers() {
    let registry = start_registry().await;
    let first = start_worker(&registry.url, "greeting").await;
    let second = start_worker(&registry.url, "greeting").await;
    wait_for_instances(&registry.registry, "greeting", 2).await;

    let (gateway_url, gateway_shutdown) = start_gateway(&registry.url).await;
    let client = http_client();

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let (status, body) = get(&client, &format!("{gateway_url}/greeting/greet")).await;
        assert_eq!(status, 200);
        bodies.push(body);
    }

    let expected: HashSet<String> = [first.port, second.port]
        .iter()
        .map(|port| format!("Hello from port: {port}\n"))
        .collect();
    let seen: HashSet<String> = bodies.iter().cloned().collect();
    assert_eq!(seen, expected);
    assert_ne!(bodies[0], bodies[1]);
    assert_eq!(bodies[0], bodies[2]);
    assert_eq!(bodies[1], bodies[3]);

    gateway_shutdown.cancel();
    first.shutdown.cancel();
    second.shutdown.cancel();
    registry.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_service_yields_503() {
    let registry = start_registry().await;
    let (gateway_url, gateway_shutdown) = start_gateway(&registry.url).await;

    let (status, _) = get(&http_client(), &format!("{gateway_url}/nobody/greet")).await;
    assert_eq!(status, 503);

    gateway_shutdown.cancel();
    registry.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_downstream_status_is_relayed() {
    let registry = start_registry().await;
    let worker = start_worker(&registry.url, "greeting").await;
    wait_for_instances(&registry.registry, "greeting", 1).await;
    let (gateway_url, gateway_shutdown) = start_gateway(&registry.url).await;

    let (status, _) = get(&http_client(), &format!("{gateway_url}/greeting/missing")).await;
    assert_eq!(status, 404);

    gateway_shutdown.cancel();
    worker.shutdown.cancel();
    registry.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_instance_is_retried_on_the_other() {
    let registry = start_registry().await;
    let worker = start_worker(&registry.url, "greeting").await;
    wait_for_instances(&registry.registry, "greeting", 1).await;

    let dead_port = unused_port().await;
    registry
        .registry
        .register(&InstanceRegistration::new("greeting", "127.0.0.1", dead_port))
        .unwrap();

    let (gateway_url, gateway_shutdown) = start_gateway(&registry.url).await;
    let client = http_client();

    for _ in 0..4 {
        let (status, body) = get(&client, &format!("{gateway_url}/greeting/greet")).await;
        assert_eq!(status, 200);
        assert_eq!(body, format!("Hello from port: {}\n", worker.port));
    }

    gateway_shutdown.cancel();
    worker.shutdown.cancel();
    registry.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_only_unreachable_instance_yields_502() {
    let registry = start_registry().await;
    let dead_port = unused_port().await;
    registry
        .registry
        .register(&InstanceRegistration::new("greeting", "127.0.0.1", dead_port))
        .unwrap();

    let (gateway_url, gateway_shutdown) = start_gateway(&registry.url).await;

    let (status, _) = get(&http_client(), &format!("{gateway_url}/greeting/greet")).await;
    assert_eq!(status, 502);

    gateway_shutdown.cancel();
    registry.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_deregisters_on_shutdown() {
    let registry = start_registry().await;
    let worker = start_worker(&registry.url, "greeting").await;
    wait_for_instances(&registry.registry, "greeting", 1).await;

    worker.shutdown.cancel();
    let result = timeout(Duration::from_secs(5), worker.handle)
        .await
        .expect("worker did not stop")
        .unwrap();
    assert!(result.is_ok());
    assert!(registry.registry.lookup("greeting").is_empty());

    registry.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_evicted_worker_registers_again() {
    let registry = start_registry().await;
    let worker = start_worker(&registry.url, "greeting").await;
    wait_for_instances(&registry.registry, "greeting", 1).await;

    // 模拟被注册中心清理
    assert!(registry.registry.deregister(&InstanceRegistration::new(
        "greeting",
        "127.0.0.1",
        worker.port
    )));

    // 下一次心跳收到 NotFound 后重新注册
    wait_for_instances(&registry.registry, "greeting", 1).await;
    assert_eq!(
        registry.registry.lookup("greeting"),
        vec![InstanceAddress::new("127.0.0.1", worker.port)]
    );

    worker.shutdown.cancel();
    registry.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registry_client_round_trip() {
    let registry = start_registry().await;
    let client = RegistryClient::connect(&registry.url).unwrap();
    let registration = InstanceRegistration::new("billing", "10.0.0.7", 9001);

    assert!(client.lookup("billing").await.unwrap().is_empty());
    assert!(matches!(
        client.heartbeat(&registration).await,
        Err(RegistryClientError::NotFound(_))
    ));

    client.register(&registration).await.unwrap();
    client.register(&registration).await.unwrap();
    client.heartbeat(&registration).await.unwrap();
    assert_eq!(
        client.lookup("billing").await.unwrap(),
        vec![InstanceAddress::new("10.0.0.7", 9001)]
    );

    client.deregister(&registration).await.unwrap();
    assert!(client.lookup("billing").await.unwrap().is_empty());

    registry.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_head_keeps_downstream_content_length() {
    let registry = start_registry().await;
    let worker = start_worker(&registry.url, "greeting").await;
    wait_for_instances(&registry.registry, "greeting", 1).await;
    let (gateway_url, gateway_shutdown) = start_gateway(&registry.url).await;
    let client = http_client();

    let expected = format!("Hello from port: {}\n", worker.port).len().to_string();

    let direct = client
        .head(format!("http://127.0.0.1:{}/greet", worker.port))
        .send()
        .await
        .unwrap();
    assert_eq!(
        direct.headers().get("content-length").and_then(|v| v.to_str().ok()),
        Some(expected.as_str())
    );

    let response = client
        .head(format!("{gateway_url}/greeting/greet"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers().get("content-length").and_then(|v| v.to_str().ok()),
        Some(expected.as_str())
    );

    // GET 仍按实际响应体返回长度
    let response = client
        .get(format!("{gateway_url}/greeting/greet"))
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("content-length").and_then(|v| v.to_str().ok()),
        Some(expected.as_str())
    );
    assert_eq!(response.text().await.unwrap(), format!("Hello from port: {}\n", worker.port));

    gateway_shutdown.cancel();
    worker.shutdown.cancel();
    registry.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gateway_forwards_method_query_headers_and_body() {
    let registry = start_registry().await;
    start_echo_instance(&registry.registry, "echo").await;
    let (gateway_url, gateway_shutdown) = start_gateway(&registry.url).await;
    let client = http_client();

    let response = client
        .post(format!("{gateway_url}/echo/echo?x=1&y=two"))
        .header("x-custom", "v")
        .header("proxy-authorization", "secret")
        .header("keep-alive", "timeout=5")
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let seen: serde_json::Value = response.json().await.unwrap();
    assert_eq!(seen["method"], "POST");
    assert_eq!(seen["uri"], "/echo?x=1&y=two");
    assert_eq!(seen["body"], "payload");

    let headers = &seen["headers"];
    assert_eq!(headers["x-custom"], "v");
    assert_eq!(headers["content-length"], "7");
    assert_eq!(headers["x-forwarded-prefix"], "/echo");
    assert!(headers.get("proxy-authorization").is_none());
    assert!(headers.get("keep-alive").is_none());
    let request_id = headers["x-request-id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(request_id).is_ok());

    // 调用方提供的 x-request-id 原样传递
    let response = client
        .put(format!("{gateway_url}/echo/echo"))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    let seen: serde_json::Value = response.json().await.unwrap();
    assert_eq!(seen["method"], "PUT");
    assert_eq!(seen["uri"], "/echo");
    assert_eq!(seen["body"], "");
    assert_eq!(seen["headers"]["x-request-id"], "req-42");

    gateway_shutdown.cancel();
    registry.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_request_body_yields_413() {
    let registry = start_registry().await;
    start_echo_instance(&registry.registry, "echo").await;

    let mut config = gateway_config(&registry.url);
    config.gateway.max_body_bytes = 16;
    let (gateway_url, gateway_shutdown) = start_gateway_with(config).await;
    let client = http_client();

    let response = client
        .post(format!("{gateway_url}/echo/echo"))
        .body("x".repeat(17))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 413);

    let response = client
        .post(format!("{gateway_url}/echo/echo"))
        .body("x".repeat(16))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    gateway_shutdown.cancel();
    registry.shutdown.cancel();
}
