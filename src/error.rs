//! Command Error Taxonomy
//!
//! Every failure that can happen while handling a chat command. All of these
//! are caught at the dispatch boundary and turned into a chat reply.

use crate::channels::ChannelError;
use crate::runtime::RuntimeError;

/// Coarse classification of a command failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownCommand,
    NotAuthorized,
    MalformedPermission,
    MissingArgument,
    ServerNotFound,
    RuntimeUnavailable,
    DirectoryUnavailable,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownCommand => "unknown_command",
            Self::NotAuthorized => "not_authorized",
            Self::MalformedPermission => "malformed_permission",
            Self::MissingArgument => "missing_argument",
            Self::ServerNotFound => "server_not_found",
            Self::RuntimeUnavailable => "runtime_unavailable",
            Self::DirectoryUnavailable => "directory_unavailable",
            Self::InternalError => "internal_error",
        }
    }
}

/// Errors produced while authorizing or executing a command.
///
/// The `Display` text is what the sender sees in chat.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unable to process command '{0}'; no permissions set. Please contact the bot administrator.")]
    UnknownCommand(String),

    #[error("You can't execute that command ('{0}').")]
    NotAuthorized(String),

    #[error("Unable to process command '{0}'; its permissions are misconfigured. Please contact the bot administrator.")]
    MalformedPermission(String),

    #[error("Missing required argument `{0}`.")]
    MissingArgument(&'static str),

    #[error("No server with id `{0}` is registered.")]
    ServerNotFound(String),

    #[error("The container runtime is unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("The user directory is unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Something went wrong while handling that command.")]
    Internal(String),
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownCommand(_) => ErrorKind::UnknownCommand,
            Self::NotAuthorized(_) => ErrorKind::NotAuthorized,
            Self::MalformedPermission(_) => ErrorKind::MalformedPermission,
            Self::MissingArgument(_) => ErrorKind::MissingArgument,
            Self::ServerNotFound(_) => ErrorKind::ServerNotFound,
            Self::RuntimeUnavailable(_) => ErrorKind::RuntimeUnavailable,
            Self::DirectoryUnavailable(_) => ErrorKind::DirectoryUnavailable,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }
}

impl From<RuntimeError> for CommandError {
    fn from(e: RuntimeError) -> Self {
        CommandError::RuntimeUnavailable(e.to_string())
    }
}

impl From<ChannelError> for CommandError {
    fn from(e: ChannelError) -> Self {
        CommandError::DirectoryUnavailable(e.to_string())
    }
}
