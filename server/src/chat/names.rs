//! Display-name lookup with a TTL cache in front of the user table.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chat::store::ChatStore;

/// Name shown for users without a user row or without a name.
pub const GUEST_NAME: &str = "Guest";

#[derive(Debug, Clone)]
struct CachedName {
    name: String,
    expires_at: Instant,
}

pub struct DisplayNameCache {
    store: Arc<dyn ChatStore>,
    entries: DashMap<String, CachedName>,
    ttl: Duration,
}

impl DisplayNameCache {
    pub fn new(store: Arc<dyn ChatStore>, ttl: Duration) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Resolve a user's display name. Only found names are cached, so a
    /// user who sets a name later is picked up on the next lookup.
    pub async fn resolve(&self, user_id: &str) -> String {
        if let Some(entry) = self.entries.get(user_id) {
            if entry.expires_at > Instant::now() {
                return entry.name.clone();
            }
        }

        match self.store.display_name(user_id).await {
            Ok(Some(name)) if !name.is_empty() => {
                self.entries.insert(
                    user_id.to_string(),
                    CachedName {
                        name: name.clone(),
                        expires_at: Instant::now() + self.ttl,
                    },
                );
                name
            }
            Ok(_) => GUEST_NAME.to_string(),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Display name lookup failed");
                GUEST_NAME.to_string()
            }
        }
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
