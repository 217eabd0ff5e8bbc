//! Shared resources: descriptors, the container, and circuit breakers.

mod breaker;
mod container;
mod descriptor;

pub use breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState};
pub use container::{
    Resource, ResourceContainer, ResourceDeps, ResourceFactory, ResourceHandle,
};
pub use descriptor::{ResourceDescriptor, ResourceKind};
