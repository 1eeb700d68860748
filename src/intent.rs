//! Message Intent Classifier
//!
//! Decides whether an inbound message is addressed to the bot and
//! extracts the command tokens from it.
//!
//! A message is for the bot when its first token mentions the bot
//! (`<@BOTID>`, optionally `<@BOTID|name>`, optionally followed by
//! punctuation such as `:`), or when it arrives on a direct-message
//! channel with the sender. Leading mentions of anyone are stripped
//! before the command is read.

use crate::channels::DirectChannel;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static MENTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^<@([^>|\s]+)(?:\|[^>\s]*)?>[[:punct:]]*$").expect("mention pattern is valid")
});

/// A chat message that passed the basic shape checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel_id: String,
    pub sender_id: String,
    pub text: String,
    pub event_type: String,
}

impl MessageEvent {
    pub fn new(channel_id: &str, sender_id: &str, text: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            event_type: "message".to_string(),
        }
    }

    /// Validate a raw transport event.
    ///
    /// Returns `None` (with a debug log) for anything that is not an object
    /// of type `message` carrying non-empty channel, text and user fields.
    pub fn from_raw(event: &Value) -> Option<Self> {
        let Some(obj) = event.as_object() else {
            debug!("Event wasn't an object, so skipping it.");
            return None;
        };

        let Some(event_type) = obj.get("type").and_then(Value::as_str) else {
            debug!("Event type not found, skipping it.");
            return None;
        };
        if event_type != "message" {
            debug!("Ignoring event of type {}", event_type);
            return None;
        }

        let field = |name: &str| {
            obj.get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let Some(channel_id) = field("channel") else {
            debug!("Message event does not have a channel ID, skipping it.");
            return None;
        };
        let Some(text) = field("text") else {
            debug!("Event text not found, skipping it.");
            return None;
        };
        let Some(sender_id) = field("user") else {
            debug!("User ID not found, skipping it.");
            return None;
        };

        Some(Self {
            channel_id,
            sender_id,
            text,
            event_type: event_type.to_string(),
        })
    }
}

/// How a message addressed the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Leading `@bot` in a shared channel
    Mention,
    /// Sent on the sender's direct-message channel with the bot
    DirectMessage,
    /// Not for us
    Ignored,
}

/// Result of classifying one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub intent: Intent,
    /// Tokens left after stripping leading mentions
    pub tokens: Vec<String>,
}

impl Classification {
    fn ignored() -> Self {
        Self {
            intent: Intent::Ignored,
            tokens: Vec::new(),
        }
    }

    /// Whether dispatch should continue past classification
    pub fn is_actionable(&self) -> bool {
        self.intent != Intent::Ignored && !self.tokens.is_empty()
    }
}

/// Whether a token has the generic mention shape (any user)
pub fn is_mention(token: &str) -> bool {
    MENTION_PATTERN.is_match(token)
}

/// Whether a token mentions exactly `user_id`
pub fn mentions(token: &str, user_id: &str) -> bool {
    MENTION_PATTERN
        .captures(token)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str() == user_id)
        .unwrap_or(false)
}

/// Drop every leading mention token
pub fn strip_leading_mentions(tokens: &[&str]) -> Vec<String> {
    tokens
        .iter()
        .skip_while(|t| is_mention(t))
        .map(|t| t.to_string())
        .collect()
}

/// Classify a message for the bot identified by `bot_id`
pub fn classify(event: &MessageEvent, bot_id: &str, direct_channels: &[DirectChannel]) -> Classification {
    if event.sender_id == bot_id {
        debug!("Ignoring our own message in {}", event.channel_id);
        return Classification::ignored();
    }

    let tokens: Vec<&str> = event.text.split_whitespace().collect();
    let Some(first) = tokens.first() else {
        return Classification::ignored();
    };

    let intent = if mentions(first, bot_id) {
        Intent::Mention
    } else if direct_channels
        .iter()
        .any(|dm| dm.channel_id == event.channel_id && dm.user_id == event.sender_id)
    {
        Intent::DirectMessage
    } else {
        return Classification::ignored();
    };

    let tokens = strip_leading_mentions(&tokens);
    debug!("intent: {:?}, tokens: {:?}", intent, tokens);

    Classification { intent, tokens }
}
