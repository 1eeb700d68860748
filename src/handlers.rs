//! Command Handlers
//!
//! One async function per command. Handlers only see the registry and
//! the runtime; authorization has already happened.

use crate::channels::Attachment;
use crate::config::{ServerRegistry, ServerSpec};
use crate::error::CommandError;
use crate::reconciler::{self, find_container};
use crate::router::{help_text, CommandName, Invocation};
use crate::runtime::ContainerRuntime;
use tracing::info;

/// Structured result of running a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    TextReply(String),
    AttachmentList(Vec<Attachment>),
    Failure(CommandError),
}

/// Run an already-authorized invocation
pub async fn execute(
    invocation: &Invocation,
    registry: &ServerRegistry,
    runtime: &dyn ContainerRuntime,
) -> Result<CommandResult, CommandError> {
    match &invocation.command {
        CommandName::List => Ok(list(registry, runtime).await),
        CommandName::Status => status(invocation.arg(0), registry, runtime).await,
        CommandName::Start => start(invocation.arg(0), registry, runtime).await,
        CommandName::Stop => stop(invocation.arg(0), registry, runtime).await,
        CommandName::Help => Ok(help(None)),
        CommandName::Unknown(name) => Ok(help(Some(name.as_str()))),
    }
}

/// Full reconciled status list
pub async fn list(registry: &ServerRegistry, runtime: &dyn ContainerRuntime) -> CommandResult {
    if registry.is_empty() {
        return CommandResult::TextReply("No servers are registered.".to_string());
    }

    let attachments = reconciler::reconcile(registry, runtime)
        .await
        .iter()
        .map(|r| r.to_attachment())
        .collect();
    CommandResult::AttachmentList(attachments)
}

/// Status for one server, or for all of them
pub async fn status(
    server_id: Option<&str>,
    registry: &ServerRegistry,
    runtime: &dyn ContainerRuntime,
) -> Result<CommandResult, CommandError> {
    let Some(server_id) = server_id else {
        return Ok(list(registry, runtime).await);
    };

    let spec = lookup(server_id, registry)?;
    let report = reconciler::reconcile_one(spec, runtime).await;
    Ok(CommandResult::AttachmentList(vec![report.to_attachment()]))
}

/// Start the container for a server's image
pub async fn start(
    server_id: Option<&str>,
    registry: &ServerRegistry,
    runtime: &dyn ContainerRuntime,
) -> Result<CommandResult, CommandError> {
    let server_id = server_id.ok_or(CommandError::MissingArgument("server_id"))?;
    let spec = lookup(server_id, registry)?;

    let containers = runtime.list_containers().await?;
    if find_container(&spec.image, &containers).is_some_and(|c| c.is_running()) {
        return Ok(CommandResult::TextReply(format!(
            "Server *{}* (`{}`) is already running.",
            spec.name, spec.id
        )));
    }

    info!("Starting server {} ({})", spec.id, spec.image);
    runtime.start(&spec.image).await?;
    Ok(CommandResult::TextReply(format!(
        "Starting server *{}* (`{}`).",
        spec.name, spec.id
    )))
}

/// Stop the first running container for a server's image
pub async fn stop(
    server_id: Option<&str>,
    registry: &ServerRegistry,
    runtime: &dyn ContainerRuntime,
) -> Result<CommandResult, CommandError> {
    let server_id = server_id.ok_or(CommandError::MissingArgument("server_id"))?;
    let spec = lookup(server_id, registry)?;

    let containers = runtime.list_containers().await?;
    let running = containers
        .iter()
        .find(|c| c.image == spec.image && c.is_running());

    match running {
        Some(container) => {
            info!("Stopping server {} (container {})", spec.id, container.id);
            runtime.stop(&container.id).await?;
            Ok(CommandResult::TextReply(format!(
                "Stopping server *{}* (`{}`).",
                spec.name, spec.id
            )))
        }
        None => Ok(CommandResult::TextReply(format!(
            "Server *{}* (`{}`) is not running.",
            spec.name, spec.id
        ))),
    }
}

/// Static command reference, optionally prefixed for an unhandled command
pub fn help(unknown: Option<&str>) -> CommandResult {
    let text = match unknown {
        Some(name) => format!("Unknown command '{}'.\n{}", name, help_text()),
        None => help_text(),
    };
    CommandResult::TextReply(text)
}

fn lookup<'a>(server_id: &str, registry: &'a ServerRegistry) -> Result<&'a ServerSpec, CommandError> {
    registry
        .get(server_id)
        .ok_or_else(|| CommandError::ServerNotFound(server_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::InMemoryRuntime;

    fn registry() -> ServerRegistry {
        ServerRegistry::new(vec![
            ServerSpec::new("svg1", "Survival", "mc:survival"),
            ServerSpec::new("svg2", "Creative", "mc:creative"),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_status_unknown_id() {
        let runtime = InMemoryRuntime::new();
        let err = status(Some("unknown-id"), &registry(), &runtime).await.unwrap_err();
        assert_eq!(err, CommandError::ServerNotFound("unknown-id".to_string()));
    }

    #[tokio::test]
    async fn test_status_single_and_all() {
        let runtime = InMemoryRuntime::new().with_container("c1", "mc:survival", "running");

        match status(Some("svg1"), &registry(), &runtime).await.unwrap() {
            CommandResult::AttachmentList(a) => {
                assert_eq!(a.len(), 1);
                assert_eq!(a[0].title, "Survival");
            }
            other => panic!("unexpected {:?}", other),
        }

        match status(None, &registry(), &runtime).await.unwrap() {
            CommandResult::AttachmentList(a) => assert_eq!(a.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_requires_argument() {
        let runtime = InMemoryRuntime::new();
        let err = start(None, &registry(), &runtime).await.unwrap_err();
        assert_eq!(err, CommandError::MissingArgument("server_id"));

        let err = stop(None, &registry(), &runtime).await.unwrap_err();
        assert_eq!(err, CommandError::MissingArgument("server_id"));
    }

    #[tokio::test]
    async fn test_start_unknown_server() {
        let runtime = InMemoryRuntime::new();
        let err = start(Some("nope"), &registry(), &runtime).await.unwrap_err();
        assert_eq!(err, CommandError::ServerNotFound("nope".to_string()));
        assert!(runtime.started().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let runtime = InMemoryRuntime::new().with_container("c1", "mc:survival", "running");

        let result = start(Some("svg1"), &registry(), &runtime).await.unwrap();
        assert!(matches!(result, CommandResult::TextReply(ref t) if t.contains("already running")));
        assert!(runtime.started().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let runtime = InMemoryRuntime::new().with_container("c1", "mc:survival", "exited");

        start(Some("svg1"), &registry(), &runtime).await.unwrap();
        assert_eq!(runtime.started().await, vec!["mc:survival"]);

        stop(Some("svg1"), &registry(), &runtime).await.unwrap();
        assert_eq!(runtime.stopped().await, vec!["c1"]);

        let result = stop(Some("svg1"), &registry(), &runtime).await.unwrap();
        assert!(matches!(result, CommandResult::TextReply(ref t) if t.contains("not running")));
        assert_eq!(runtime.stopped().await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_with_runtime_down() {
        let runtime = InMemoryRuntime::new();
        runtime.set_fail_list(true);
        let err = start(Some("svg1"), &registry(), &runtime).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RuntimeUnavailable);
    }

    #[test]
    fn test_help_with_unknown_preamble() {
        match help(Some("reboot")) {
            CommandResult::TextReply(t) => {
                assert!(t.starts_with("Unknown command 'reboot'."));
                assert!(t.contains("start <server-id>"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_empty_registry() {
        let runtime = InMemoryRuntime::new();
        let empty = ServerRegistry::new(Vec::new()).unwrap();
        assert!(matches!(list(&empty, &runtime).await, CommandResult::TextReply(_)));
    }
}
