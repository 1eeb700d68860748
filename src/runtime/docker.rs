//! Docker CLI runtime backend.
//!
//! Shells out to the `docker` binary. Every invocation is bounded by a
//! timeout so a wedged daemon surfaces as an error instead of a hang.

use super::traits::*;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Docker backend configuration
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Path or name of the docker binary
    pub docker_bin: String,
    /// Upper bound for a single docker invocation
    pub timeout: Duration,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Container runtime backed by the docker CLI
pub struct DockerCli {
    config: DockerConfig,
}

impl DockerCli {
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    /// Run docker with the given arguments and return stdout
    async fn run(&self, args: &[&str]) -> Result<String, RuntimeError> {
        debug!("docker {}", args.join(" "));

        let output = Command::new(&self.config.docker_bin)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.config.timeout, output)
            .await
            .map_err(|_| RuntimeError::Timeout(self.config.timeout.as_secs()))?
            .map_err(|e| {
                RuntimeError::Unavailable(format!(
                    "failed to run {} (is Docker installed?): {}",
                    self.config.docker_bin, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("Cannot connect to the Docker daemon") {
                return Err(RuntimeError::Unavailable(stderr));
            }
            return Err(RuntimeError::CommandFailed(format!(
                "docker {} exited with {}: {}",
                args.first().unwrap_or(&""),
                output.status,
                stderr
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn name(&self) -> &str {
        "docker"
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let stdout = self
            .run(&["ps", "--all", "--no-trunc", "--format", "{{json .}}"])
            .await?;
        parse_ps_output(&stdout)
    }

    async fn start(&self, image: &str) -> Result<(), RuntimeError> {
        validate_image_ref(image)?;

        let containers = self.list_containers().await?;
        let existing = containers.iter().find(|c| c.image == image);

        match existing {
            Some(c) if c.is_running() => {
                debug!("Container {} for {} already running", c.id, image);
            }
            Some(c) => {
                info!("Starting existing container {} for {}", c.id, image);
                self.run(&["start", &c.id]).await?;
            }
            None => {
                info!("No container for {}, creating one", image);
                self.run(&["run", "--detach", image]).await?;
            }
        }

        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        info!("Stopping container {}", container_id);
        self.run(&["stop", container_id]).await?;
        Ok(())
    }
}

/// One line of `docker ps --format '{{json .}}'`
#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Image")]
    image: String,
    #[serde(rename = "State", default)]
    state: Option<String>,
    #[serde(rename = "Status", default)]
    status: String,
}

fn parse_ps_output(stdout: &str) -> Result<Vec<ContainerInfo>, RuntimeError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let ps: PsLine =
                serde_json::from_str(line).map_err(|e| RuntimeError::Parse(e.to_string()))?;
            // Older engines omit State; derive it from the human Status text
            let state = match ps.state {
                Some(s) if !s.is_empty() => s.to_lowercase(),
                _ => state_from_status(&ps.status).to_string(),
            };
            Ok(ContainerInfo {
                id: ps.id,
                image: ps.image,
                state,
            })
        })
        .collect()
}

fn state_from_status(status: &str) -> &'static str {
    let lower = status.to_lowercase();
    if lower.starts_with("up") {
        if lower.contains("(paused)") {
            "paused"
        } else {
            "running"
        }
    } else if lower.starts_with("exited") {
        "exited"
    } else if lower.starts_with("created") {
        "created"
    } else if lower.starts_with("restarting") {
        "restarting"
    } else if lower.starts_with("removal") {
        "removing"
    } else if lower.starts_with("dead") {
        "dead"
    } else {
        "unknown"
    }
}

/// Reject image references that could be read as docker flags
fn validate_image_ref(image: &str) -> Result<(), RuntimeError> {
    if image.is_empty() || image.len() > 256 {
        return Err(RuntimeError::CommandFailed(format!(
            "invalid image reference {:?}",
            image
        )));
    }
    if image.starts_with('-') {
        return Err(RuntimeError::CommandFailed(format!(
            "image reference {:?} may not start with '-'",
            image
        )));
    }
    let valid = image
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.' | ':' | '/' | '_' | '@'));
    if !valid {
        return Err(RuntimeError::CommandFailed(format!(
            "image reference {:?} contains invalid characters",
            image
        )));
    }
    Ok(())
}
