//! Slack Channel Implementation
//!
//! Talks to the Slack Web API over plain HTTPS. Inbound messages are
//! collected by polling `conversations.history` for every conversation
//! the bot is a member of, starting at the moment `connect` succeeded.
//!
//! # Configuration
//!
//! Environment variables:
//! - `SLACK_API_TOKEN`: bot token (overrides the config file value)

use super::traits::*;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

const DEFAULT_API_BASE: &str = "https://slack.com/api";
/// Upper bound on `conversations.history` pages fetched per conversation per poll
const HISTORY_MAX_PAGES: usize = 10;

/// Slack channel configuration
#[derive(Debug, Clone)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`)
    pub bot_token: String,
    /// Web API base URL
    pub api_base: String,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// How long the joined-conversation list is reused between polls
    pub conversation_refresh: Duration,
}

impl SlackConfig {
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(10),
            conversation_refresh: Duration::from_secs(60),
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }
}

/// Joined conversations, refreshed lazily
struct ConversationList {
    fetched_at: Option<Instant>,
    ids: Vec<String>,
}

/// Slack channel implementation
pub struct SlackChannel {
    config: SlackConfig,
    client: reqwest::Client,
    ready: AtomicBool,
    own_id: OnceCell<String>,
    conversations: Mutex<ConversationList>,
    /// Newest message ts seen per conversation
    watermarks: Mutex<HashMap<String, String>>,
    /// Watermark used for conversations seen for the first time
    connected_at: Mutex<String>,
}

impl SlackChannel {
    pub fn new(config: SlackConfig) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChannelError::Internal(e.to_string()))?;

        Ok(Self {
            config,
            client,
            ready: AtomicBool::new(false),
            own_id: OnceCell::new(),
            conversations: Mutex::new(ConversationList {
                fetched_at: None,
                ids: Vec::new(),
            }),
            watermarks: Mutex::new(HashMap::new()),
            connected_at: Mutex::new(slack_ts_now()),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.config.api_base, method)
    }

    /// GET a Web API method and unwrap the `ok` envelope
    async fn call(&self, method: &str, query: &[(&str, &str)]) -> Result<Value, ChannelError> {
        let response = self
            .client
            .get(self.url(method))
            .bearer_auth(&self.config.bot_token)
            .query(query)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        Self::unwrap_envelope(method, response).await
    }

    /// POST a JSON body to a Web API method
    async fn post(&self, method: &str, body: &Value) -> Result<Value, ChannelError> {
        let response = self
            .client
            .post(self.url(method))
            .bearer_auth(&self.config.bot_token)
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        Self::unwrap_envelope(method, response).await
    }

    async fn unwrap_envelope(method: &str, response: reqwest::Response) -> Result<Value, ChannelError> {
        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(ChannelError::RateLimited(retry_after));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ChannelError::Internal(format!("{} returned {}: {}", method, status, e)))?;

        if body["ok"].as_bool() == Some(true) {
            return Ok(body);
        }

        let error = body["error"].as_str().unwrap_or("unknown_error").to_string();
        match error.as_str() {
            "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked" => {
                Err(ChannelError::AuthenticationFailed(error))
            }
            _ => Err(ChannelError::Api {
                method: method.to_string(),
                error,
            }),
        }
    }

    /// Follow `response_metadata.next_cursor` until exhausted
    async fn call_paginated(
        &self,
        method: &str,
        query: &[(&str, &str)],
        key: &str,
    ) -> Result<Vec<Value>, ChannelError> {
        let mut items = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut params: Vec<(&str, &str)> = query.to_vec();
            params.push(("limit", "200"));
            if !cursor.is_empty() {
                params.push(("cursor", cursor.as_str()));
            }

            let body = self.call(method, &params).await?;
            if let Some(page) = body[key].as_array() {
                items.extend(page.iter().cloned());
            }

            let next = body["response_metadata"]["next_cursor"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            if next.is_empty() {
                break;
            }
            cursor = next;
        }

        Ok(items)
    }

    async fn joined_conversations(&self) -> Result<Vec<String>, ChannelError> {
        let mut list = self.conversations.lock().await;
        let stale = list
            .fetched_at
            .map(|t| t.elapsed() >= self.config.conversation_refresh)
            .unwrap_or(true);

        if stale {
            let channels = self
                .call_paginated(
                    "users.conversations",
                    &[("types", "public_channel,private_channel,mpim,im")],
                    "channels",
                )
                .await?;
            list.ids = channels
                .iter()
                .filter_map(|c| c["id"].as_str().map(str::to_string))
                .collect();
            list.fetched_at = Some(Instant::now());
            debug!("Slack: polling {} conversations", list.ids.len());
        }

        Ok(list.ids.clone())
    }

    /// Messages newer than the watermark for one conversation, oldest first
    async fn poll_conversation(&self, channel_id: &str) -> Result<Vec<Value>, ChannelError> {
        let oldest = {
            let marks = self.watermarks.lock().await;
            match marks.get(channel_id) {
                Some(ts) => ts.clone(),
                None => self.connected_at.lock().await.clone(),
            }
        };

        // Pages come newest first; follow the cursor back to the watermark
        let mut messages: Vec<Value> = Vec::new();
        let mut cursor = String::new();
        for page in 1..=HISTORY_MAX_PAGES {
            let mut query = vec![("channel", channel_id), ("oldest", oldest.as_str()), ("limit", "100")];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.as_str()));
            }
            let body = self.call("conversations.history", &query).await?;
            if let Some(batch) = body["messages"].as_array() {
                messages.extend(batch.iter().cloned());
            }

            let Some(next) = next_history_cursor(&body) else {
                break;
            };
            if page == HISTORY_MAX_PAGES {
                warn!(
                    "Slack: more than {} pages of new messages in {}, older ones are skipped",
                    HISTORY_MAX_PAGES, channel_id
                );
            }
            cursor = next;
        }
        messages.sort_by_key(ts_key);

        if let Some(newest) = messages.last().and_then(|m| m["ts"].as_str()) {
            self.watermarks
                .lock()
                .await
                .insert(channel_id.to_string(), newest.to_string());
        }

        Ok(messages
            .into_iter()
            .filter(|m| m.get("subtype").is_none() && m.get("bot_id").is_none())
            .map(|mut m| {
                m["channel"] = Value::String(channel_id.to_string());
                m
            })
            .collect())
    }
}

#[async_trait]
impl MessagingTransport for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        let body = self.call("auth.test", &[]).await?;

        if let Some(user_id) = body["user_id"].as_str() {
            let _ = self.own_id.set(user_id.to_string());
        }

        *self.connected_at.lock().await = slack_ts_now();
        self.ready.store(true, Ordering::Relaxed);
        info!(
            "Slack channel connected as {} in team {}",
            body["user"].as_str().unwrap_or("?"),
            body["team"].as_str().unwrap_or("?")
        );
        Ok(())
    }

    async fn poll_events(&self) -> Result<Vec<Value>, ChannelError> {
        if !self.ready.load(Ordering::Relaxed) {
            return Err(ChannelError::NotReady);
        }

        let mut events = Vec::new();
        for channel_id in self.joined_conversations().await? {
            match self.poll_conversation(&channel_id).await {
                Ok(mut batch) => events.append(&mut batch),
                Err(ChannelError::RateLimited(secs)) => return Err(ChannelError::RateLimited(secs)),
                Err(e) => warn!("Failed to poll Slack conversation {}: {}", channel_id, e),
            }
        }

        events.sort_by_key(ts_key);
        Ok(events)
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        if !self.ready.load(Ordering::Relaxed) {
            return Err(ChannelError::NotReady);
        }

        let mut payload = serde_json::json!({
            "channel": message.channel_id,
            "text": message.text,
        });

        if !message.attachments.is_empty() {
            payload["attachments"] = serde_json::to_value(&message.attachments)
                .map_err(|e| ChannelError::Internal(e.to_string()))?;
        }

        self.post("chat.postMessage", &payload).await?;
        Ok(())
    }

    async fn list_direct_message_channels(&self) -> Result<Vec<DirectChannel>, ChannelError> {
        let channels = self
            .call_paginated("conversations.list", &[("types", "im")], "channels")
            .await?;

        Ok(channels
            .iter()
            .filter_map(|c| {
                Some(DirectChannel {
                    channel_id: c["id"].as_str()?.to_string(),
                    user_id: c["user"].as_str()?.to_string(),
                })
            })
            .collect())
    }

    async fn list_members(&self) -> Result<Vec<UserRecord>, ChannelError> {
        let members = self.call_paginated("users.list", &[], "members").await?;

        Ok(members
            .into_iter()
            .filter_map(|m| serde_json::from_value::<SlackMember>(m).ok())
            .filter(|m| !m.deleted)
            .map(|m| UserRecord { id: m.id, name: m.name })
            .collect())
    }

    async fn get_member(&self, id: &str) -> Result<Option<UserRecord>, ChannelError> {
        match self.call("users.info", &[("user", id)]).await {
            Ok(body) => {
                let member: SlackMember = serde_json::from_value(body["user"].clone())
                    .map_err(|e| ChannelError::Internal(e.to_string()))?;
                Ok(Some(UserRecord {
                    id: member.id,
                    name: member.name,
                }))
            }
            Err(ChannelError::Api { error, .. }) if error == "user_not_found" => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn own_identity(&self) -> Result<String, ChannelError> {
        if let Some(id) = self.own_id.get() {
            return Ok(id.clone());
        }

        let body = self.call("auth.test", &[]).await?;
        let id = body["user_id"]
            .as_str()
            .ok_or_else(|| ChannelError::Internal("auth.test returned no user_id".to_string()))?
            .to_string();
        let _ = self.own_id.set(id.clone());
        Ok(id)
    }
}

#[derive(Debug, Deserialize)]
struct SlackMember {
    id: String,
    name: String,
    #[serde(default)]
    deleted: bool,
}

/// Current time as a Slack message timestamp (`seconds.micros`)
fn slack_ts_now() -> String {
    let now = chrono::Utc::now();
    format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros())
}

/// Cursor for the next `conversations.history` page, if the server has more
fn next_history_cursor(body: &Value) -> Option<String> {
    if !body["has_more"].as_bool().unwrap_or(false) {
        return None;
    }
    body["response_metadata"]["next_cursor"]
        .as_str()
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// `ts` as exact (seconds, microseconds); missing or garbled values sort first
fn ts_key(event: &Value) -> (u64, u32) {
    let Some(ts) = event["ts"].as_str() else {
        return (0, 0);
    };
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, ""));
    let micros: String = frac.chars().take(6).collect();
    let micros = format!("{:0<6}", micros);
    (secs.parse().unwrap_or(0), micros.parse().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base_trailing_slash_trimmed() {
        let config = SlackConfig::new("xoxb-test").with_api_base("http://localhost:9000/api/");
        let channel = SlackChannel::new(config).unwrap();
        assert_eq!(channel.url("auth.test"), "http://localhost:9000/api/auth.test");
    }

    #[test]
    fn test_slack_ts_format() {
        let ts = slack_ts_now();
        let (secs, micros) = ts.split_once('.').unwrap();
        assert!(secs.parse::<i64>().unwrap() > 0);
        assert_eq!(micros.len(), 6);
    }

    #[test]
    fn test_events_sort_by_ts() {
        let mut events = vec![
            serde_json::json!({"ts": "1700000002.000200"}),
            serde_json::json!({"ts": "1700000001.000100"}),
        ];
        events.sort_by_key(ts_key);
        assert_eq!(events[0]["ts"], "1700000001.000100");
    }

    #[test]
    fn test_history_pagination_follows_has_more() {
        let more = serde_json::json!({
            "messages": [],
            "has_more": true,
            "response_metadata": {"next_cursor": "bmV4dA=="}
        });
        assert_eq!(next_history_cursor(&more).as_deref(), Some("bmV4dA=="));

        let last = serde_json::json!({"messages": [], "has_more": false});
        assert_eq!(next_history_cursor(&last), None);

        let no_cursor = serde_json::json!({"has_more": true, "response_metadata": {"next_cursor": ""}});
        assert_eq!(next_history_cursor(&no_cursor), None);
    }

    #[test]
    fn test_ts_ordering_keeps_microseconds() {
        let mut events = vec![
            serde_json::json!({"ts": "1700000001.123457"}),
            serde_json::json!({"ts": "1700000001.123456"}),
            serde_json::json!({"ts": "1700000001.5"}),
            serde_json::json!({}),
        ];
        events.sort_by_key(ts_key);

        assert!(events[0].get("ts").is_none());
        assert_eq!(events[1]["ts"], "1700000001.123456");
        assert_eq!(events[2]["ts"], "1700000001.123457");
        assert_eq!(ts_key(&events[3]), (1_700_000_001, 500_000));
    }

    #[test]
    fn test_member_deserialization_defaults() {
        let member: SlackMember =
            serde_json::from_value(serde_json::json!({"id": "U1", "name": "alice"})).unwrap();
        assert!(!member.deleted);
        assert_eq!(member.name, "alice");
    }

    #[tokio::test]
    async fn test_poll_before_connect_is_not_ready() {
        let channel = SlackChannel::new(SlackConfig::new("xoxb-test")).unwrap();
        assert!(matches!(channel.poll_events().await, Err(ChannelError::NotReady)));
    }
}
