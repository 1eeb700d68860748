//! Permission System for Chat Commands
//!
//! Each command maps to a policy:
//! - **Open**: anyone may run it (`null` in the permissions file)
//! - **AllowList**: only the listed usernames may run it
//!
//! Evaluation fails closed. A command missing from the table is denied,
//! and an allow-list with any name the directory cannot resolve denies
//! everyone until the configuration is fixed.

use crate::config::ConfigError;
use crate::directory::UserDirectory;
use crate::error::CommandError;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Access policy for one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionPolicy {
    /// No restriction
    Open,
    /// Sender must be one of these usernames
    AllowList(Vec<String>),
    /// Loaded leniently from a value that is neither null nor a list
    Malformed(String),
}

impl PermissionPolicy {
    fn from_value(command: &str, value: &Value, lenient: bool) -> Result<Self, ConfigError> {
        let malformed = |found: String| {
            if lenient {
                warn!("Value for permission key '{}' is not a list: {}", command, found);
                Ok(PermissionPolicy::Malformed(found))
            } else {
                Err(ConfigError::InvalidPermission {
                    command: command.to_string(),
                    found,
                })
            }
        };

        match value {
            Value::Null => Ok(PermissionPolicy::Open),
            Value::Array(items) => {
                let mut names = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_str() {
                        Some(name) => names.push(name.to_string()),
                        None => return malformed(item.to_string()),
                    }
                }
                Ok(PermissionPolicy::AllowList(names))
            }
            other => malformed(other.to_string()),
        }
    }
}

/// Command name -> policy, read-only after load
#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    policies: HashMap<String, PermissionPolicy>,
}

impl PermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by tests and embedders
    pub fn with(mut self, command: &str, policy: PermissionPolicy) -> Self {
        self.policies.insert(command.to_lowercase(), policy);
        self
    }

    /// Parse the permissions document (a JSON object).
    ///
    /// With `lenient` set, entries that are neither `null` nor a list of
    /// strings load as `Malformed` and deny at evaluation time instead of
    /// failing the load.
    pub fn from_json(doc: &Value, lenient: bool) -> Result<Self, ConfigError> {
        let obj = doc.as_object().ok_or_else(|| ConfigError::InvalidPermission {
            command: "<root>".to_string(),
            found: doc.to_string(),
        })?;

        let mut policies = HashMap::with_capacity(obj.len());
        for (command, value) in obj {
            let policy = PermissionPolicy::from_value(command, value, lenient)?;
            let key = command.to_lowercase();
            if policies.insert(key.clone(), policy).is_some() {
                return Err(ConfigError::DuplicatePermission(key));
            }
        }

        Ok(Self { policies })
    }

    pub fn get(&self, command: &str) -> Option<&PermissionPolicy> {
        self.policies.get(command)
    }

    pub fn contains(&self, command: &str) -> bool {
        self.policies.contains_key(command)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Decide whether `sender_id` may run `command` (already lower-cased)
    pub async fn evaluate(
        &self,
        command: &str,
        sender_id: &str,
        directory: &UserDirectory,
    ) -> Result<(), CommandError> {
        let Some(policy) = self.policies.get(command) else {
            warn!("Command '{}' is not in the permissions list.", command);
            return Err(CommandError::UnknownCommand(command.to_string()));
        };

        match policy {
            PermissionPolicy::Open => {
                debug!("No permissions required for command {}", command);
                Ok(())
            }
            PermissionPolicy::Malformed(found) => {
                warn!("Permission entry for '{}' is malformed ({}), denying", command, found);
                Err(CommandError::MalformedPermission(command.to_string()))
            }
            PermissionPolicy::AllowList(names) => {
                // Resolve every entry before matching so one bad entry denies everyone
                let mut allowed_ids = Vec::with_capacity(names.len());
                for name in names {
                    match directory.resolve_name_to_id(name).await {
                        Ok(Some(id)) => allowed_ids.push(id),
                        Ok(None) => {
                            warn!(
                                "Allow-list for '{}' names unknown user '{}'; denying all senders until fixed",
                                command, name
                            );
                            return Err(CommandError::NotAuthorized(command.to_string()));
                        }
                        Err(e) => {
                            warn!("Cannot resolve allow-list for '{}': {}", command, e);
                            return Err(CommandError::DirectoryUnavailable(e.to_string()));
                        }
                    }
                }

                if allowed_ids.iter().any(|id| id == sender_id) {
                    info!("User {} allowed to execute command {}", sender_id, command);
                    Ok(())
                } else {
                    warn!("User {} does not have permission to execute command {}.", sender_id, command);
                    Err(CommandError::NotAuthorized(command.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::InMemoryChannel;
    use crate::error::ErrorKind;
    use std::sync::Arc;

    async fn directory() -> UserDirectory {
        let transport = Arc::new(
            InMemoryChannel::new("UBOT")
                .with_member("U1", "alice")
                .with_member("U2", "bob"),
        );
        let directory = UserDirectory::new(transport);
        directory.load_members().await.unwrap();
        directory
    }

    fn table() -> PermissionTable {
        PermissionTable::from_json(
            &serde_json::json!({
                "list": null,
                "Start": ["alice"],
                "stop": ["alice", "ghost"],
            }),
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_command_denied_for_everyone() {
        let dir = directory().await;
        let table = table();

        for sender in ["U1", "U2", "UBOT", "nobody"] {
            let err = table.evaluate("reboot", sender, &dir).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnknownCommand);
        }
    }

    #[tokio::test]
    async fn test_open_policy_allows_anyone() {
        let dir = directory().await;
        assert!(table().evaluate("list", "U999", &dir).await.is_ok());
    }

    #[tokio::test]
    async fn test_allow_list() {
        let dir = directory().await;
        let table = table();

        assert!(table.evaluate("start", "U1", &dir).await.is_ok());
        let err = table.evaluate("start", "U2", &dir).await.unwrap_err();
        assert_eq!(err, CommandError::NotAuthorized("start".to_string()));
    }

    #[tokio::test]
    async fn test_unresolvable_entry_fails_closed() {
        let dir = directory().await;
        let table = table();

        // alice would match, but "ghost" cannot be resolved
        for sender in ["U1", "U2"] {
            let err = table.evaluate("stop", sender, &dir).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotAuthorized);
        }
    }

    #[tokio::test]
    async fn test_directory_unavailable_denies() {
        let transport = Arc::new(InMemoryChannel::new("UBOT").with_member("U1", "alice"));
        transport.set_fail_members(true);
        let dir = UserDirectory::new(transport);

        let err = table().evaluate("start", "U1", &dir).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DirectoryUnavailable);
    }

    #[test]
    fn test_malformed_rejected_when_strict() {
        let doc = serde_json::json!({"start": "alice"});
        let err = PermissionTable::from_json(&doc, false).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPermission { ref command, .. } if command == "start"));

        let doc = serde_json::json!({"start": ["alice", 7]});
        assert!(PermissionTable::from_json(&doc, false).is_err());

        assert!(PermissionTable::from_json(&serde_json::json!([]), false).is_err());
    }

    #[tokio::test]
    async fn test_malformed_denies_when_lenient() {
        let dir = directory().await;
        let doc = serde_json::json!({"start": {"users": ["alice"]}});
        let table = PermissionTable::from_json(&doc, true).unwrap();

        let err = table.evaluate("start", "U1", &dir).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPermission);
    }

    #[test]
    fn test_keys_normalized_to_lowercase() {
        let table = table();
        assert!(table.contains("start"));
        assert!(!table.contains("Start"));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_case_insensitive_duplicate_rejected() {
        let doc = serde_json::json!({"Stop": ["alice"], "stop": null});
        for lenient in [false, true] {
            match PermissionTable::from_json(&doc, lenient) {
                Err(ConfigError::DuplicatePermission(command)) => assert_eq!(command, "stop"),
                other => panic!("unexpected {:?}", other.map(|t| t.len())),
            }
        }
    }
}
