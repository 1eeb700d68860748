//! Response Formatter
//!
//! Turns a `CommandResult` into exactly one outbound message. Replies to a
//! mention in a shared channel address the sender explicitly; direct
//! messages and attachments go out unmodified.

use crate::channels::OutboundMessage;
use crate::handlers::CommandResult;
use crate::intent::Intent;

/// Prefix a plain-text reply with a mention of the sender
pub fn address(sender_id: &str, text: &str) -> String {
    format!("<@{}>: {}", sender_id, text)
}

/// Build the reply for one processed event
pub fn format_response(
    result: &CommandResult,
    intent: Intent,
    channel_id: &str,
    sender_id: &str,
) -> OutboundMessage {
    let text_reply = |text: &str| {
        let text = match intent {
            Intent::Mention => address(sender_id, text),
            _ => text.to_string(),
        };
        OutboundMessage::text(channel_id, &text)
    };

    match result {
        CommandResult::TextReply(text) => text_reply(text),
        CommandResult::Failure(err) => text_reply(&err.to_string()),
        CommandResult::AttachmentList(attachments) => {
            OutboundMessage::text(channel_id, "").with_attachments(attachments.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Attachment;
    use crate::error::CommandError;

    #[test]
    fn test_mention_reply_is_addressed() {
        let result = CommandResult::TextReply("Starting server.".to_string());
        let msg = format_response(&result, Intent::Mention, "C1", "U9");

        assert_eq!(msg.channel_id, "C1");
        assert_eq!(msg.text, "<@U9>: Starting server.");
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn test_direct_message_reply_unmodified() {
        let result = CommandResult::TextReply("Starting server.".to_string());
        let msg = format_response(&result, Intent::DirectMessage, "D1", "U9");
        assert_eq!(msg.text, "Starting server.");
    }

    #[test]
    fn test_failures_are_text() {
        let result = CommandResult::Failure(CommandError::MissingArgument("server_id"));
        let msg = format_response(&result, Intent::Mention, "C1", "U9");
        assert!(msg.text.starts_with("<@U9>: Missing required argument"));
    }

    #[test]
    fn test_attachments_sent_as_is() {
        let attachments = vec![Attachment {
            title: "Survival".to_string(),
            ..Default::default()
        }];
        let result = CommandResult::AttachmentList(attachments.clone());

        for intent in [Intent::Mention, Intent::DirectMessage] {
            let msg = format_response(&result, intent, "C1", "U9");
            assert_eq!(msg.text, "");
            assert_eq!(msg.attachments, attachments);
        }
    }
}
