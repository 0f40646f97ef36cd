//! Registry service module
//!
//! The service directory, split into logical components:
//! - `types`: instances, wire payloads and errors
//! - `service`: directory operations and the expiry sweeper
//! - `http_impl`: HTTP endpoints (`/register`, `/heartbeat`, `/lookup/{name}`, ...)

pub mod http_impl;
pub mod service;
pub mod types;

// Re-export public types for easier access
pub use service::ServiceRegistry;
pub use types::{
    InstanceAddress, InstanceRegistration, RegistryAck, RegistryError, ServiceDirectory,
    ServiceInstance,
};
