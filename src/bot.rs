//! Event Loop
//!
//! Startup sequence plus the poll → process → sleep loop. Events are
//! handled one at a time, in the order the transport returns them; a
//! shutdown request is only honored between events, never mid-command.

use crate::channels::{ChannelError, MessagingTransport};
use crate::config::ServerRegistry;
use crate::directory::UserDirectory;
use crate::dispatcher::{BotContext, Dispatcher};
use crate::permissions::PermissionTable;
use crate::runtime::ContainerRuntime;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Fatal startup failures
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("could not connect to {transport}: {source}")]
    Connect {
        transport: String,
        source: ChannelError,
    },

    #[error("could not determine own identity: {0}")]
    Identity(ChannelError),

    #[error("user '{0}' was not found in the member list")]
    UnknownUsername(String),
}

/// Counters for one run of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub polls: u64,
    pub events: u64,
    pub replies: u64,
    pub poll_errors: u64,
}

/// Everything needed to start the bot
pub struct Bot {
    transport: Arc<dyn MessagingTransport>,
    runtime: Arc<dyn ContainerRuntime>,
    permissions: PermissionTable,
    servers: ServerRegistry,
    username: Option<String>,
    poll_interval: Duration,
}

impl Bot {
    pub fn new(
        transport: Arc<dyn MessagingTransport>,
        runtime: Arc<dyn ContainerRuntime>,
        permissions: PermissionTable,
        servers: ServerRegistry,
    ) -> Self {
        Self {
            transport,
            runtime,
            permissions,
            servers,
            username: None,
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Username to look ourselves up by if the identity query fails
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Connect, resolve our identity and load the member list
    pub async fn start(self) -> Result<(BotContext, Duration), StartupError> {
        info!("Connecting to {}...", self.transport.name());
        self.transport
            .connect()
            .await
            .map_err(|source| StartupError::Connect {
                transport: self.transport.name().to_string(),
                source,
            })?;

        let directory = UserDirectory::new(Arc::clone(&self.transport));
        let bot_id = match self.transport.own_identity().await {
            Ok(id) => id,
            Err(e) => {
                let Some(username) = self.username.as_deref() else {
                    return Err(StartupError::Identity(e));
                };
                warn!("Identity query failed ({}), looking up '{}' instead", e, username);
                directory.load_members().await.map_err(StartupError::Identity)?;
                directory
                    .find_member(username)
                    .await
                    .ok_or_else(|| StartupError::UnknownUsername(username.to_string()))?
            }
        };
        info!("Connected as {}.", bot_id);

        if !directory.is_loaded().await {
            if let Err(e) = directory.load_members().await {
                warn!("Member list unavailable, will retry on first use: {}", e);
            }
        }

        let ctx = BotContext {
            bot_id,
            permissions: self.permissions,
            servers: self.servers,
            directory,
            transport: self.transport,
            runtime: self.runtime,
        };
        Ok((ctx, self.poll_interval))
    }

    /// Start, then run until Ctrl-C or SIGTERM
    pub async fn run(self) -> anyhow::Result<LoopStats> {
        let (ctx, poll_interval) = self.start().await?;
        let stats = run_until(&ctx, poll_interval, shutdown_signal()).await;
        info!(
            "Stopped after {} polls, {} events, {} replies.",
            stats.polls, stats.events, stats.replies
        );
        Ok(stats)
    }
}

/// Poll once and handle every event in the batch
pub async fn tick(ctx: &BotContext, stats: &mut LoopStats) -> Result<(), ChannelError> {
    stats.polls += 1;
    let events = ctx.transport.poll_events().await?;
    if !events.is_empty() {
        debug!("Received {} events.", events.len());
    }

    let dispatcher = Dispatcher::new(ctx);
    for event in &events {
        stats.events += 1;
        if dispatcher.handle(event).await {
            stats.replies += 1;
        }
    }
    Ok(())
}

/// Run the loop until `shutdown` resolves
pub async fn run_until<F>(ctx: &BotContext, poll_interval: Duration, shutdown: F) -> LoopStats
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut stats = LoopStats::default();
    info!("Listening for commands.");

    loop {
        let pause = match tick(ctx, &mut stats).await {
            Ok(()) => poll_interval,
            Err(ChannelError::RateLimited(secs)) => {
                stats.poll_errors += 1;
                warn!("Rate limited, backing off for {}s", secs);
                Duration::from_secs(secs).max(poll_interval)
            }
            Err(e) => {
                stats.poll_errors += 1;
                error!("Polling failed: {}", e);
                poll_interval
            }
        };

        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested.");
                break;
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }

    stats
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::InMemoryChannel;
    use crate::config::ServerSpec;
    use crate::permissions::PermissionPolicy;
    use crate::runtime::InMemoryRuntime;

    fn bot(transport: Arc<InMemoryChannel>) -> Bot {
        Bot::new(
            transport,
            Arc::new(InMemoryRuntime::new()),
            PermissionTable::new().with("list", PermissionPolicy::Open),
            ServerRegistry::new(vec![ServerSpec::new("mc1", "Survival", "mc:survival")]).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let transport = Arc::new(InMemoryChannel::new("UBOT"));
        transport.set_fail_connect(true);

        match bot(transport).start().await {
            Err(StartupError::Connect { transport, .. }) => assert_eq!(transport, "memory"),
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("startup should fail without a connection"),
        }
    }

    #[tokio::test]
    async fn test_identity_falls_back_to_username() {
        let transport = Arc::new(InMemoryChannel::new("UBOT").with_member("UBOT", "foreman"));
        transport.set_fail_identity(true);

        let (ctx, _) = bot(transport.clone())
            .with_username(Some("foreman".to_string()))
            .start()
            .await
            .unwrap();
        assert_eq!(ctx.bot_id, "UBOT");

        let transport = Arc::new(InMemoryChannel::new("UBOT"));
        transport.set_fail_identity(true);
        assert!(bot(transport).start().await.is_err());
    }

    #[tokio::test]
    async fn test_member_list_failure_is_not_fatal() {
        let transport = Arc::new(InMemoryChannel::new("UBOT"));
        transport.set_fail_members(true);

        let (ctx, _) = bot(transport).start().await.unwrap();
        assert!(!ctx.directory.is_loaded().await);
    }

    #[tokio::test]
    async fn test_loop_processes_batch_then_stops() {
        let transport = Arc::new(InMemoryChannel::new("UBOT").with_direct_channel("D1", "U1"));
        transport
            .push_batch(vec![
                serde_json::json!({"type": "message", "channel": "D1", "user": "U1", "text": "list"}),
                serde_json::json!({"type": "message", "channel": "C1", "user": "U1", "text": "chatter"}),
            ])
            .await;

        let (ctx, _) = bot(transport.clone()).start().await.unwrap();
        let stats = run_until(
            &ctx,
            Duration::from_millis(5),
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await;

        assert!(stats.polls >= 1);
        assert_eq!(stats.events, 2);
        assert_eq!(stats.replies, 1);
        assert_eq!(transport.sent().await.len(), 1);
    }
}
