//! Container Runtime Trait Definitions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error types for container runtime operations
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    #[error("runtime command failed: {0}")]
    CommandFailed(String),

    #[error("runtime call timed out after {0} seconds")]
    Timeout(u64),

    #[error("unparseable runtime output: {0}")]
    Parse(String),
}

/// A container as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Runtime-assigned container id (changes on recreate)
    pub id: String,
    /// Image reference the container was created from
    pub image: String,
    /// Lifecycle state string (`running`, `exited`, `created`, ...)
    pub state: String,
}

impl ContainerInfo {
    pub fn new(id: &str, image: &str, state: &str) -> Self {
        Self {
            id: id.to_string(),
            image: image.to_string(),
            state: state.to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// Container runtime - list, start and stop containers
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime name identifier
    fn name(&self) -> &str;

    /// All known containers, in the runtime's listing order.
    ///
    /// A transport failure is an `Err`, never an empty list.
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, RuntimeError>;

    /// Start a container for the image
    async fn start(&self, image: &str) -> Result<(), RuntimeError>;

    /// Stop a container by id
    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError>;
}
