use crate::state::Conversation;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Concurrent keyed store of one conversation per transport identity.
///
/// Cheaply cloneable; clones share the same map. The inner lock is held
/// only for the duration of a single map operation, never across an await
/// or a backend call — per-identity serialization of whole steps is the
/// gateway's responsibility, not the store's.
///
/// `set` replaces the stored value wholesale (last write wins, never a
/// field-by-field merge), so a sweep removal racing an in-flight step
/// resolves to whichever lands last.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the stored state for a key, if any.
    pub fn get(&self, transport_id: &str) -> Option<Conversation> {
        let map = self.inner.read().expect("session store lock poisoned");
        map.get(transport_id).cloned()
    }

    /// The stored state for a key, or a freshly persisted idle state.
    pub fn get_or_create(&self, transport_id: &str) -> Conversation {
        let mut map = self.inner.write().expect("session store lock poisoned");
        map.entry(transport_id.to_string())
            .or_insert_with(|| Conversation::idle(transport_id))
            .clone()
    }

    /// Atomically replace the stored state for a key.
    ///
    /// Bumps `last_activity_at` as part of every set, so a successful
    /// transition always refreshes the idle clock.
    pub fn set(&self, transport_id: &str, mut conversation: Conversation) {
        conversation.last_activity_at = Utc::now();
        let mut map = self.inner.write().expect("session store lock poisoned");
        map.insert(transport_id.to_string(), conversation);
    }

    /// Delete any stored state for a key. No-op if absent.
    pub fn remove(&self, transport_id: &str) {
        let mut map = self.inner.write().expect("session store lock poisoned");
        map.remove(transport_id);
    }

    /// Number of stored conversations.
    pub fn len(&self) -> usize {
        let map = self.inner.read().expect("session store lock poisoned");
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry idle longer than `idle_threshold` as of `now`.
    /// Returns the number of entries removed.
    ///
    /// Eviction decisions come from a point-in-time snapshot, and each
    /// candidate's timestamp is re-checked at removal time, so an entry
    /// updated while the sweep runs survives this pass.
    pub fn sweep(&self, idle_threshold: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - idle_threshold;

        let candidates: Vec<String> = {
            let map = self.inner.read().expect("session store lock poisoned");
            map.iter()
                .filter(|(_, conv)| conv.last_activity_at < cutoff)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut removed = 0;
        for id in candidates {
            let mut map = self.inner.write().expect("session store lock poisoned");
            // Re-check: the entry may have been touched since the snapshot.
            if map
                .get(&id)
                .is_some_and(|conv| conv.last_activity_at < cutoff)
            {
                map.remove(&id);
                removed += 1;
                debug!("swept idle conversation {id}");
            }
        }

        removed
    }
}
