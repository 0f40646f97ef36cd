use discovery::config::Config;
use discovery::server::{self, Role};
use tracing_subscriber::EnvFilter;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let role: Role = std::env::args()
        .nth(1)
        .unwrap_or_default()
        .parse()?;
    let config = Config::load()?;

    tracing::info!(role = %role, "Starting discovery component");
    server::start(role, config).await?;
    Ok(())
}
