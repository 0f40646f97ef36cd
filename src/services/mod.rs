pub mod client;
pub mod registry;
pub mod router;
pub mod worker;

pub use client::{RegistryClient, RegistryClientError};
pub use registry::{InstanceAddress, InstanceRegistration, ServiceRegistry};
pub use router::DynamicRouter;
pub use worker::{GreetingService, InstanceRegistrar};
