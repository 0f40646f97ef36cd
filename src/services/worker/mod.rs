//! Greeting microservice
//!
//! - `greeting`: the `/greet` endpoint and its port-dependent body
//! - `registration`: register / heartbeat / deregister against the registry

pub mod greeting;
pub mod registration;

pub use greeting::{FALLBACK_GREETING, GreetingService};
pub use registration::{InstanceRegistrar, RegistrarConfig};
