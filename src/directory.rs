//! User Directory
//!
//! Name -> id resolution from the bulk member listing, plus a per-id cache
//! for single-user lookups. The cache is append-only for the lifetime of
//! the process; failed lookups are never cached.

use crate::channels::{ChannelError, MessagingTransport, UserRecord};
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Outcome of a directory lookup that did not produce a user
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("user not found: {0}")]
    NotFound(String),

    #[error("directory unavailable: {0}")]
    Unavailable(#[from] ChannelError),
}

/// Directory backed by a messaging transport
pub struct UserDirectory {
    transport: Arc<dyn MessagingTransport>,
    /// username -> id, built from the bulk listing
    members: RwLock<Option<HashMap<String, String>>>,
    /// id -> record, filled by `get_user`
    cache: Cache<String, UserRecord>,
}

impl UserDirectory {
    pub fn new(transport: Arc<dyn MessagingTransport>) -> Self {
        Self {
            transport,
            members: RwLock::new(None),
            // No capacity or TTL: entries live for the whole run
            cache: Cache::builder().build(),
        }
    }

    /// Build the name -> id map from the full member listing
    pub async fn load_members(&self) -> Result<usize, ChannelError> {
        info!("Requesting team member list...");
        let members = self.transport.list_members().await?;

        let map: HashMap<String, String> = members
            .into_iter()
            .map(|m| (m.name, m.id))
            .collect();
        let count = map.len();
        debug!("Got {} members.", count);

        *self.members.write().await = Some(map);
        Ok(count)
    }

    /// Whether the bulk listing has been loaded
    pub async fn is_loaded(&self) -> bool {
        self.members.read().await.is_some()
    }

    /// Resolve a username to an id.
    ///
    /// `Ok(None)` means the listing is available but has no such name.
    /// If the startup listing failed, one reload is attempted per call.
    pub async fn resolve_name_to_id(&self, name: &str) -> Result<Option<String>, ChannelError> {
        if !self.is_loaded().await {
            warn!("Member list not loaded, retrying before resolving '{}'", name);
            self.load_members().await?;
        }

        let members = self.members.read().await;
        Ok(members.as_ref().and_then(|m| m.get(name).cloned()))
    }

    /// Fetch a user by id, consulting the cache first
    pub async fn get_user(&self, id: &str) -> Result<UserRecord, DirectoryError> {
        if let Some(user) = self.cache.get(id).await {
            return Ok(user);
        }

        match self.transport.get_member(id).await? {
            Some(user) => {
                debug!("Caching directory entry {} ({})", user.id, user.name);
                self.cache.insert(id.to_string(), user.clone()).await;
                Ok(user)
            }
            None => Err(DirectoryError::NotFound(id.to_string())),
        }
    }

    /// Find an id by username in the already-loaded listing
    pub async fn find_member(&self, name: &str) -> Option<String> {
        let members = self.members.read().await;
        members.as_ref().and_then(|m| m.get(name).cloned())
    }

    /// Number of cached per-id entries
    pub async fn cached_users(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::InMemoryChannel;

    fn team() -> Arc<InMemoryChannel> {
        Arc::new(
            InMemoryChannel::new("UBOT")
                .with_member("U1", "alice")
                .with_member("U2", "bob"),
        )
    }

    #[tokio::test]
    async fn test_resolve_after_load() {
        let directory = UserDirectory::new(team());
        assert_eq!(directory.load_members().await.unwrap(), 2);

        assert_eq!(directory.resolve_name_to_id("alice").await.unwrap(), Some("U1".to_string()));
        assert_eq!(directory.resolve_name_to_id("mallory").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resolve_retries_failed_startup_listing() {
        let transport = team();
        transport.set_fail_members(true);
        let directory = UserDirectory::new(transport.clone());

        assert!(directory.load_members().await.is_err());
        assert!(directory.resolve_name_to_id("bob").await.is_err());

        transport.set_fail_members(false);
        assert_eq!(directory.resolve_name_to_id("bob").await.unwrap(), Some("U2".to_string()));
        assert!(directory.is_loaded().await);
    }

    #[tokio::test]
    async fn test_get_user_caches_hits() {
        let transport = team();
        let directory = UserDirectory::new(transport.clone());

        let first = directory.get_user("U1").await.unwrap();
        let second = directory.get_user("U1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.member_lookups(), 1);
        assert_eq!(directory.cached_users().await, 1);
    }

    #[tokio::test]
    async fn test_get_user_failures_not_cached() {
        let transport = team();
        let directory = UserDirectory::new(transport.clone());

        assert!(matches!(directory.get_user("U404").await, Err(DirectoryError::NotFound(_))));
        assert!(matches!(directory.get_user("U404").await, Err(DirectoryError::NotFound(_))));
        assert_eq!(transport.member_lookups(), 2);

        transport.set_fail_lookups(true);
        assert!(matches!(directory.get_user("U2").await, Err(DirectoryError::Unavailable(_))));
        transport.set_fail_lookups(false);
        assert_eq!(directory.get_user("U2").await.unwrap().name, "bob");
    }
}
