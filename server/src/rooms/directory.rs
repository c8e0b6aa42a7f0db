//! Get-or-create map from actor key to the one live actor for that key.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Handle to a running actor's mailbox.
pub trait ActorHandle: Clone + Send + Sync + 'static {
    /// False once the actor task has exited and its mailbox is closed.
    fn is_alive(&self) -> bool;

    fn same_actor(&self, other: &Self) -> bool;
}

/// Starts a fresh actor for a key. Called with a directory shard locked, so
/// it must not call back into the directory.
pub trait Spawn: Send + Sync + 'static {
    type Handle: ActorHandle;

    fn spawn(&self, key: &str) -> Self::Handle;
}

pub struct ActorDirectory<S: Spawn> {
    spawner: S,
    actors: DashMap<String, S::Handle>,
}

impl<S: Spawn> ActorDirectory<S> {
    pub fn new(spawner: S) -> Self {
        Self {
            spawner,
            actors: DashMap::new(),
        }
    }

    /// Return the live actor for `key`, spawning one if there is none or the
    /// previous instance has stopped. Concurrent callers get the same handle.
    pub fn resolve(&self, key: &str) -> S::Handle {
        match self.actors.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_alive() {
                    return entry.get().clone();
                }
                tracing::debug!(actor_key = %key, "Respawning stopped actor");
                let handle = self.spawner.spawn(key);
                entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => {
                let handle = self.spawner.spawn(key);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    /// The live actor for `key`, without spawning.
    pub fn get(&self, key: &str) -> Option<S::Handle> {
        self.actors
            .get(key)
            .map(|h| h.clone())
            .filter(|h| h.is_alive())
    }

    /// Snapshot of all registered handles.
    pub fn handles(&self) -> Vec<(String, S::Handle)> {
        self.actors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Drop entries whose actor has exited. Returns how many were removed.
    pub fn evict_stopped(&self) -> usize {
        let before = self.actors.len();
        self.actors.retain(|_, handle| handle.is_alive());
        before - self.actors.len()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}
