//! Foreman
//!
//! Chat-ops bot that manages containerized game servers from a Slack-style
//! workspace.
//!
//! # Features
//!
//! - **Intent Classification**: mentions and direct messages, everything else ignored
//! - **Permissions**: per-command open or username allow-list, fail closed
//! - **Status Reconciliation**: servers matched to containers by image
//! - **Commands**: `list`, `status`, `start`, `stop`, `help`
//! - **Transports**: Slack Web API, in-memory for tests
//! - **Runtimes**: Docker CLI, in-memory for tests
//!
//! # Architecture
//!
//! ```text
//! Slack ──► MessagingTransport ──► Event Loop ──► Dispatcher ──► Handlers ──► ContainerRuntime
//!                 ▲                                   │                           (docker)
//!                 │                                   ├── Intent Classifier
//!                 │                                   ├── Permission Evaluator ── User Directory
//!                 │                                   └── Reconciler
//!                 └───────────── Response Formatter ◄─┘
//! ```

pub mod bot;
pub mod channels;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod format;
pub mod handlers;
pub mod intent;
pub mod permissions;
pub mod reconciler;
pub mod router;
pub mod runtime;

pub use bot::{Bot, LoopStats, StartupError};
pub use channels::{MessagingTransport, OutboundMessage, SlackChannel, SlackConfig};
pub use config::{Config, ConfigError, ServerRegistry, ServerSpec};
pub use directory::UserDirectory;
pub use dispatcher::{BotContext, Dispatcher};
pub use error::{CommandError, ErrorKind};
pub use handlers::CommandResult;
pub use intent::{Classification, Intent, MessageEvent};
pub use permissions::{PermissionPolicy, PermissionTable};
pub use reconciler::{ServerReport, ServerStatus};
pub use router::{CommandName, Invocation};
pub use runtime::{ContainerRuntime, DockerCli, DockerConfig};
