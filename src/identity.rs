//! Identity provider boundary
//!
//! Accounts and login live outside the chat. The chat only needs to resolve
//! a session token presented by a connection and to look up the profile of
//! any identity referenced by a message.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::AppError;
use crate::types::{Identity, UserId};

/// Avatar used when a profile does not set one
pub const DEFAULT_AVATAR: &str = "default.jpg";

pub trait IdentityProvider: Send + Sync {
    /// Resolve a session token to its identity
    fn authenticate(&self, token: &str) -> Option<Identity>;

    /// Look up a profile by id
    fn lookup(&self, id: UserId) -> Option<Identity>;
}

/// One entry of the identities file
#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    token: String,
    id: UserId,
    display_name: String,
    #[serde(default = "default_avatar")]
    avatar: String,
}

fn default_avatar() -> String {
    DEFAULT_AVATAR.to_string()
}

/// In-memory identity directory
#[derive(Debug, Default)]
pub struct IdentityDirectory {
    tokens: HashMap<String, UserId>,
    profiles: HashMap<UserId, Identity>,
}

impl IdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a profile reachable through `token`
    pub fn insert(&mut self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(token.into(), identity.id);
        self.profiles.insert(identity.id, identity);
    }

    /// Parse a JSON array of `{token, id, display_name, avatar}` entries
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let entries: Vec<DirectoryEntry> = serde_json::from_str(json)?;
        let mut directory = Self::new();
        for entry in entries {
            directory.insert(
                entry.token,
                Identity {
                    id: entry.id,
                    display_name: entry.display_name,
                    avatar: entry.avatar,
                },
            );
        }
        Ok(directory)
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let json = std::fs::read_to_string(path)?;
        let directory = Self::from_json(&json)?;
        info!("Loaded {} identities from {}", directory.len(), path.display());
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl IdentityProvider for IdentityDirectory {
    fn authenticate(&self, token: &str) -> Option<Identity> {
        self.tokens
            .get(token)
            .and_then(|id| self.profiles.get(id))
            .cloned()
    }

    fn lookup(&self, id: UserId) -> Option<Identity> {
        self.profiles.get(&id).cloned()
    }
}
