//! In-memory container runtime.
//!
//! Holds a container table that `start`/`stop` mutate the way a real
//! engine would, so reconciliation can be observed end to end.

use super::traits::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Won't touch a container engine.
pub struct InMemoryRuntime {
    containers: Mutex<Vec<ContainerInfo>>,
    fail_list: AtomicBool,
    next_id: AtomicUsize,
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(Vec::new()),
            fail_list: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
        }
    }

    pub fn with_container(mut self, id: &str, image: &str, state: &str) -> Self {
        self.containers
            .get_mut()
            .push(ContainerInfo::new(id, image, state));
        self
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::Relaxed);
    }

    /// Current container table
    pub async fn containers(&self) -> Vec<ContainerInfo> {
        self.containers.lock().await.clone()
    }

    /// Images passed to `start`, in call order
    pub async fn started(&self) -> Vec<String> {
        self.started.lock().await.clone()
    }

    /// Container ids passed to `stop`, in call order
    pub async fn stopped(&self) -> Vec<String> {
        self.stopped.lock().await.clone()
    }
}

impl Default for InMemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        if self.fail_list.load(Ordering::Relaxed) {
            return Err(RuntimeError::Unavailable("scripted failure".to_string()));
        }
        Ok(self.containers.lock().await.clone())
    }

    async fn start(&self, image: &str) -> Result<(), RuntimeError> {
        self.started.lock().await.push(image.to_string());

        let mut containers = self.containers.lock().await;
        match containers.iter_mut().find(|c| c.image == image) {
            Some(c) => c.state = "running".to_string(),
            None => {
                let id = format!("mem{}", self.next_id.fetch_add(1, Ordering::Relaxed));
                containers.push(ContainerInfo::new(&id, image, "running"));
            }
        }
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.stopped.lock().await.push(container_id.to_string());

        let mut containers = self.containers.lock().await;
        match containers.iter_mut().find(|c| c.id == container_id) {
            Some(c) => {
                c.state = "exited".to_string();
                Ok(())
            }
            None => Err(RuntimeError::CommandFailed(format!(
                "no such container: {}",
                container_id
            ))),
        }
    }
}
