//! Messaging Channels
//!
//! Abstraction over the chat platform the bot is operated from.
//! Slack is the only platform with an adapter today; the core only sees
//! the `MessagingTransport` trait.

#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod slack;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub use memory::InMemoryChannel;
pub use slack::{SlackChannel, SlackConfig};
pub use traits::{
    Attachment, AttachmentField, ChannelError, DirectChannel, MessagingTransport,
    OutboundMessage, UserRecord,
};
