//! Channel Trait Definitions
//!
//! The narrow interface the bot core uses to talk to a messaging platform.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error types for channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("API error from {method}: {error}")]
    Api { method: String, error: String },

    #[error("Channel not ready")]
    NotReady,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A directory entry on the messaging platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
}

impl UserRecord {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

/// A direct-message channel between the bot and exactly one user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectChannel {
    pub channel_id: String,
    pub user_id: String,
}

/// Key/value pair shown inside an attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

/// Visually scoped block of structured content (Slack "attachment")
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attachment {
    pub fallback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<AttachmentField>,
}

/// One outbound chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel_id: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    pub fn text(channel_id: &str, text: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            text: text.to_string(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Messaging transport - implement for each platform
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// Transport name identifier
    fn name(&self) -> &str;

    /// Verify credentials and prepare for polling
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Fetch events that arrived since the previous poll (may be empty)
    async fn poll_events(&self) -> Result<Vec<serde_json::Value>, ChannelError>;

    /// Send a message
    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError>;

    /// Direct-message channels the bot currently has open
    async fn list_direct_message_channels(&self) -> Result<Vec<DirectChannel>, ChannelError>;

    /// Full member listing
    async fn list_members(&self) -> Result<Vec<UserRecord>, ChannelError>;

    /// Single member lookup; `Ok(None)` when the id is unknown
    async fn get_member(&self, id: &str) -> Result<Option<UserRecord>, ChannelError>;

    /// The bot's own user id
    async fn own_identity(&self) -> Result<String, ChannelError>;
}
