//! Command Dispatcher
//!
//! Runs one inbound event through classification, authorization,
//! execution and formatting. Holds no state between events.
//!
//! ```text
//! Idle ──► Classifying ──► Authorizing ──► Executing ──► Responding ──► Idle
//!              │                │
//!              └─ silent        └─ deny reply
//! ```

use crate::channels::{DirectChannel, MessagingTransport, OutboundMessage};
use crate::config::ServerRegistry;
use crate::directory::UserDirectory;
use crate::error::CommandError;
use crate::format::format_response;
use crate::handlers::{self, CommandResult};
use crate::intent::{self, Classification, MessageEvent};
use crate::permissions::PermissionTable;
use crate::router::Invocation;
use crate::runtime::ContainerRuntime;
use futures_util::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Dispatch stages, for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Classifying,
    Authorizing,
    Executing,
    Responding,
}

/// Everything the core needs, built once at startup
pub struct BotContext {
    /// Our own user id on the messaging platform
    pub bot_id: String,
    pub permissions: PermissionTable,
    pub servers: ServerRegistry,
    pub directory: UserDirectory,
    pub transport: Arc<dyn MessagingTransport>,
    pub runtime: Arc<dyn ContainerRuntime>,
}

impl BotContext {
    pub fn new(
        bot_id: &str,
        permissions: PermissionTable,
        servers: ServerRegistry,
        transport: Arc<dyn MessagingTransport>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            permissions,
            servers,
            directory: UserDirectory::new(Arc::clone(&transport)),
            transport,
            runtime,
        }
    }
}

/// Per-event pipeline over a shared context
pub struct Dispatcher<'a> {
    ctx: &'a BotContext,
}

impl<'a> Dispatcher<'a> {
    pub fn new(ctx: &'a BotContext) -> Self {
        Self { ctx }
    }

    fn enter(&self, stage: Stage) {
        debug!("Dispatch: -> {:?}", stage);
    }

    /// Process one raw event and send the reply, if any.
    ///
    /// Returns whether a reply was produced.
    pub async fn handle(&self, raw: &Value) -> bool {
        let Some(reply) = self.process(raw).await else {
            self.enter(Stage::Idle);
            return false;
        };

        if let Err(e) = self.ctx.transport.send(&reply).await {
            error!("Failed to send reply to {}: {}", reply.channel_id, e);
        }
        self.enter(Stage::Idle);
        true
    }

    /// Decide the reply for one raw event without sending it
    pub async fn process(&self, raw: &Value) -> Option<OutboundMessage> {
        let event = MessageEvent::from_raw(raw)?;

        self.enter(Stage::Classifying);
        let classification = self.classify(&event).await;
        if !classification.is_actionable() {
            if classification.intent != intent::Intent::Ignored {
                info!("Nothing found in command sequence, skipping it.");
            }
            return None;
        }
        let invocation = Invocation::from_tokens(&classification.tokens)?;

        self.enter(Stage::Authorizing);
        self.log_sender(&event.sender_id, invocation.name()).await;
        let result = match self
            .ctx
            .permissions
            .evaluate(invocation.name(), &event.sender_id, &self.ctx.directory)
            .await
        {
            Ok(()) => {
                self.enter(Stage::Executing);
                self.execute(&invocation).await
            }
            Err(denial) => CommandResult::Failure(denial),
        };

        self.enter(Stage::Responding);
        Some(format_response(
            &result,
            classification.intent,
            &event.channel_id,
            &event.sender_id,
        ))
    }

    async fn classify(&self, event: &MessageEvent) -> Classification {
        // A leading mention decides the intent; only look up DM channels otherwise
        let addressed = event
            .text
            .split_whitespace()
            .next()
            .is_some_and(|first| intent::mentions(first, &self.ctx.bot_id));

        let direct: Vec<DirectChannel> = if addressed {
            Vec::new()
        } else {
            match self.ctx.transport.list_direct_message_channels().await {
                Ok(channels) => channels,
                Err(e) => {
                    warn!("Could not list direct-message channels: {}", e);
                    Vec::new()
                }
            }
        };

        intent::classify(event, &self.ctx.bot_id, &direct)
    }

    /// Run the handler; errors and panics become a `Failure`
    async fn execute(&self, invocation: &Invocation) -> CommandResult {
        let run = handlers::execute(invocation, &self.ctx.servers, self.ctx.runtime.as_ref());

        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("Command '{}' failed ({}): {}", invocation.name(), e.kind().as_str(), e);
                CommandResult::Failure(e)
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                error!("Command '{}' panicked: {}", invocation.name(), detail);
                CommandResult::Failure(CommandError::Internal(detail))
            }
        }
    }

    async fn log_sender(&self, sender_id: &str, command: &str) {
        match self.ctx.directory.get_user(sender_id).await {
            Ok(user) => info!("{} ({}) requested '{}'", user.name, user.id, command),
            Err(e) => {
                debug!("Sender lookup failed: {}", e);
                info!("{} requested '{}'", sender_id, command);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::InMemoryChannel;
    use crate::config::ServerSpec;
    use crate::permissions::PermissionPolicy;
    use crate::runtime::{ContainerInfo, InMemoryRuntime, RuntimeError};
    use async_trait::async_trait;

    struct PanickingRuntime;

    #[async_trait]
    impl ContainerRuntime for PanickingRuntime {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn list_containers(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
            panic!("runtime exploded")
        }

        async fn start(&self, _image: &str) -> Result<(), RuntimeError> {
            Ok(())
        }

        async fn stop(&self, _container_id: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    fn message(channel: &str, user: &str, text: &str) -> Value {
        serde_json::json!({"type": "message", "channel": channel, "user": user, "text": text})
    }

    async fn context(runtime: Arc<dyn ContainerRuntime>) -> BotContext {
        let transport = Arc::new(
            InMemoryChannel::new("UBOT")
                .with_member("U1", "alice")
                .with_direct_channel("D1", "U1"),
        );
        let permissions = PermissionTable::new()
            .with("list", PermissionPolicy::Open)
            .with("start", PermissionPolicy::AllowList(vec!["alice".to_string()]))
            .with("reboot", PermissionPolicy::Open);
        let servers = ServerRegistry::new(vec![ServerSpec::new("mc1", "Survival", "mc:survival")]).unwrap();

        let ctx = BotContext::new("UBOT", permissions, servers, transport, runtime);
        ctx.directory.load_members().await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_ignored_produces_nothing() {
        let ctx = context(Arc::new(InMemoryRuntime::new())).await;
        let dispatcher = Dispatcher::new(&ctx);

        assert!(dispatcher.process(&message("C1", "U1", "list")).await.is_none());
        assert!(dispatcher.process(&message("C1", "U1", "<@UBOT>")).await.is_none());
        assert!(dispatcher.process(&serde_json::json!({"type": "hello"})).await.is_none());
    }

    #[tokio::test]
    async fn test_denial_echoes_command() {
        let ctx = context(Arc::new(InMemoryRuntime::new())).await;
        let reply = Dispatcher::new(&ctx)
            .process(&message("C1", "U2", "<@UBOT> start mc1"))
            .await
            .unwrap();

        assert_eq!(reply.text, "<@U2>: You can't execute that command ('start').");
    }

    #[tokio::test]
    async fn test_unknown_command_reply() {
        let ctx = context(Arc::new(InMemoryRuntime::new())).await;
        let reply = Dispatcher::new(&ctx)
            .process(&message("D1", "U1", "frobnicate"))
            .await
            .unwrap();

        assert!(reply.text.starts_with("Unable to process command 'frobnicate'"));
    }

    #[tokio::test]
    async fn test_permitted_but_unimplemented_falls_back_to_help() {
        let ctx = context(Arc::new(InMemoryRuntime::new())).await;
        let reply = Dispatcher::new(&ctx)
            .process(&message("D1", "U1", "Reboot now"))
            .await
            .unwrap();

        assert!(reply.text.starts_with("Unknown command 'reboot'."));
        assert!(reply.text.contains("status [server-id]"));
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_internal_error() {
        let ctx = context(Arc::new(PanickingRuntime)).await;
        let reply = Dispatcher::new(&ctx)
            .process(&message("D1", "U1", "start mc1"))
            .await
            .unwrap();

        assert_eq!(reply.text, CommandError::Internal(String::new()).to_string());
    }

    #[tokio::test]
    async fn test_handle_sends_exactly_one_reply() {
        let transport = Arc::new(InMemoryChannel::new("UBOT").with_direct_channel("D1", "U1"));
        let ctx = BotContext::new(
            "UBOT",
            PermissionTable::new().with("list", PermissionPolicy::Open),
            ServerRegistry::new(vec![ServerSpec::new("mc1", "Survival", "mc:survival")]).unwrap(),
            transport.clone(),
            Arc::new(InMemoryRuntime::new()),
        );
        let dispatcher = Dispatcher::new(&ctx);

        assert!(dispatcher.handle(&message("D1", "U1", "list")).await);
        assert!(!dispatcher.handle(&message("C1", "U1", "list")).await);

        let sent = transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attachments.len(), 1);
    }
}
