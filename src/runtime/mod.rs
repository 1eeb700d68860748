//! Container Runtime
//!
//! Narrow interface over whatever runs the managed servers, plus the
//! docker CLI adapter used in production.

pub mod docker;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod traits;

pub use docker::{DockerCli, DockerConfig};
#[cfg(any(test, feature = "test-support"))]
pub use memory::InMemoryRuntime;
pub use traits::{ContainerInfo, ContainerRuntime, RuntimeError};
