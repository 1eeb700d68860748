//! Server Status Reconciler
//!
//! Merges the static server registry with what the container runtime
//! reports. A server is "whatever container runs its image": matching is
//! by image reference, never by container name or id, and the first
//! container in the runtime's listing order wins when several share an
//! image.

use crate::channels::{Attachment, AttachmentField};
use crate::config::{ServerRegistry, ServerSpec};
use crate::runtime::{ContainerInfo, ContainerRuntime, RuntimeError};
use tracing::{debug, warn};

/// Derived, never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerStatus {
    Running,
    Offline,
    Error,
    Unknown,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Offline => "offline",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Map a runtime lifecycle state string
    pub fn from_container_state(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "created" | "exited" | "paused" | "stopped" => Self::Offline,
            _ => Self::Error,
        }
    }

    /// Slack attachment color
    fn color(&self) -> &'static str {
        match self {
            Self::Running => "good",
            Self::Offline => "warning",
            Self::Error => "danger",
            Self::Unknown => "#9e9e9e",
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status record for one registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReport {
    pub id: String,
    pub name: String,
    pub image: String,
    pub info: String,
    pub status: ServerStatus,
    /// Container the status was derived from, if any
    pub container_id: Option<String>,
}

impl ServerReport {
    fn new(spec: &ServerSpec, status: ServerStatus, container_id: Option<String>) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            info: spec.info.clone(),
            status,
            container_id,
        }
    }

    pub fn to_attachment(&self) -> Attachment {
        let mut fields = vec![
            AttachmentField {
                title: "Status".to_string(),
                value: self.status.to_string(),
                short: true,
            },
            AttachmentField {
                title: "ID".to_string(),
                value: self.id.clone(),
                short: true,
            },
            AttachmentField {
                title: "Image".to_string(),
                value: self.image.clone(),
                short: false,
            },
        ];
        if let Some(container) = &self.container_id {
            fields.push(AttachmentField {
                title: "Container".to_string(),
                value: container.chars().take(12).collect(),
                short: true,
            });
        }

        Attachment {
            fallback: format!("{} ({}): {}", self.name, self.id, self.status),
            color: Some(self.status.color().to_string()),
            title: self.name.clone(),
            text: self.info.clone(),
            fields,
        }
    }
}

/// First container (listing order) running the given image
pub fn find_container<'a>(image: &str, containers: &'a [ContainerInfo]) -> Option<&'a ContainerInfo> {
    containers.iter().find(|c| c.image == image)
}

/// Status of one server against an already-fetched listing
pub fn report_for(spec: &ServerSpec, listing: Result<&[ContainerInfo], &RuntimeError>) -> ServerReport {
    let containers = match listing {
        Ok(containers) => containers,
        Err(_) => return ServerReport::new(spec, ServerStatus::Unknown, None),
    };

    match find_container(&spec.image, containers) {
        Some(container) => {
            let status = ServerStatus::from_container_state(&container.state);
            if status == ServerStatus::Error {
                debug!(
                    "Container {} for {} is in unexpected state '{}'",
                    container.id, spec.id, container.state
                );
            }
            ServerReport::new(spec, status, Some(container.id.clone()))
        }
        None => ServerReport::new(spec, ServerStatus::Offline, None),
    }
}

/// Reconcile every registry entry against one listing, in registry order
pub fn reconcile_listing(
    registry: &ServerRegistry,
    listing: Result<&[ContainerInfo], &RuntimeError>,
) -> Vec<ServerReport> {
    registry.iter().map(|spec| report_for(spec, listing)).collect()
}

/// Query the runtime and reconcile the whole registry.
///
/// A listing failure yields `Unknown` for every server instead of an error.
pub async fn reconcile(registry: &ServerRegistry, runtime: &dyn ContainerRuntime) -> Vec<ServerReport> {
    let listing = runtime.list_containers().await;
    if let Err(e) = &listing {
        warn!("Container listing from {} failed: {}", runtime.name(), e);
    }
    reconcile_listing(registry, listing.as_deref())
}

/// Query the runtime and reconcile a single server
pub async fn reconcile_one(spec: &ServerSpec, runtime: &dyn ContainerRuntime) -> ServerReport {
    let listing = runtime.list_containers().await;
    if let Err(e) = &listing {
        warn!("Container listing from {} failed: {}", runtime.name(), e);
    }
    report_for(spec, listing.as_deref())
}
