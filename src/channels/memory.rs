//! In-memory transport.
//!
//! Scripted stand-in for a real chat platform: events are queued by the
//! caller, sent messages are recorded, and individual calls can be made
//! to fail.

use super::traits::*;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Won't talk to any network.
pub struct InMemoryChannel {
    own_id: String,
    members: Vec<UserRecord>,
    direct_channels: Vec<DirectChannel>,
    batches: Mutex<VecDeque<Vec<serde_json::Value>>>,
    sent: Mutex<Vec<OutboundMessage>>,
    fail_connect: AtomicBool,
    fail_identity: AtomicBool,
    fail_members: AtomicBool,
    fail_lookups: AtomicBool,
    member_lookups: AtomicUsize,
}

impl InMemoryChannel {
    pub fn new(own_id: &str) -> Self {
        Self {
            own_id: own_id.to_string(),
            members: Vec::new(),
            direct_channels: Vec::new(),
            batches: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            fail_connect: AtomicBool::new(false),
            fail_identity: AtomicBool::new(false),
            fail_members: AtomicBool::new(false),
            fail_lookups: AtomicBool::new(false),
            member_lookups: AtomicUsize::new(0),
        }
    }

    pub fn with_member(mut self, id: &str, name: &str) -> Self {
        self.members.push(UserRecord::new(id, name));
        self
    }

    pub fn with_direct_channel(mut self, channel_id: &str, user_id: &str) -> Self {
        self.direct_channels.push(DirectChannel {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
        });
        self
    }

    /// Queue one batch to be returned by the next `poll_events`
    pub async fn push_batch(&self, events: Vec<serde_json::Value>) {
        self.batches.lock().await.push_back(events);
    }

    /// Everything sent so far
    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_identity(&self, fail: bool) {
        self.fail_identity.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_members(&self, fail: bool) {
        self.fail_members.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::Relaxed);
    }

    /// How many single-user lookups reached the transport
    pub fn member_lookups(&self) -> usize {
        self.member_lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessagingTransport for InMemoryChannel {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        if self.fail_connect.load(Ordering::Relaxed) {
            return Err(ChannelError::ConnectionFailed("scripted failure".to_string()));
        }
        Ok(())
    }

    async fn poll_events(&self) -> Result<Vec<serde_json::Value>, ChannelError> {
        Ok(self.batches.lock().await.pop_front().unwrap_or_default())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        self.sent.lock().await.push(message.clone());
        Ok(())
    }

    async fn list_direct_message_channels(&self) -> Result<Vec<DirectChannel>, ChannelError> {
        Ok(self.direct_channels.clone())
    }

    async fn list_members(&self) -> Result<Vec<UserRecord>, ChannelError> {
        if self.fail_members.load(Ordering::Relaxed) {
            return Err(ChannelError::ConnectionFailed("scripted failure".to_string()));
        }
        Ok(self.members.clone())
    }

    async fn get_member(&self, id: &str) -> Result<Option<UserRecord>, ChannelError> {
        self.member_lookups.fetch_add(1, Ordering::Relaxed);
        if self.fail_lookups.load(Ordering::Relaxed) {
            return Err(ChannelError::ConnectionFailed("scripted failure".to_string()));
        }
        Ok(self.members.iter().find(|m| m.id == id).cloned())
    }

    async fn own_identity(&self) -> Result<String, ChannelError> {
        if self.fail_identity.load(Ordering::Relaxed) {
            return Err(ChannelError::AuthenticationFailed("scripted failure".to_string()));
        }
        Ok(self.own_id.clone())
    }
}
