//! Shared in-memory cache of conversation state.
//!
//! The cache is an explicitly constructed service injected into whatever
//! needs it; there is no ambient global. One writer (the active sync
//! controller) mutates entries; other consumers observe read-only and
//! re-render on revision change.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::error::ChatResult;

use super::backend::ConversationBackend;
use super::types::Conversation;

/// Cache entry carrying a staleness flag.
struct CacheEntry {
    conversation: Conversation,
    stale: bool,
}

/// Keyed store of conversation replicas, key = conversation id.
///
/// Entries marked stale are refetched from the backend on the next `read`:
/// the optimistic local copy is discarded and replaced by canonical history,
/// never merged.
pub struct ConversationCache {
    entries: DashMap<String, CacheEntry>,
    backend: Arc<dyn ConversationBackend>,
    revision: watch::Sender<u64>,
}

impl ConversationCache {
    /// Create an empty cache backed by the given persistence service.
    #[must_use]
    pub fn new(backend: Arc<dyn ConversationBackend>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            entries: DashMap::new(),
            backend,
            revision,
        }
    }

    /// Seed or replace an entry with a freshly loaded conversation
    /// (the view-mount path).
    pub fn insert(&self, conversation: Conversation) {
        self.entries.insert(
            conversation.id.clone(),
            CacheEntry {
                conversation,
                stale: false,
            },
        );
        self.bump();
    }

    /// Current cached copy without triggering a refetch, stale or not.
    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<Conversation> {
        self.entries.get(id).map(|entry| entry.conversation.clone())
    }

    /// Read the conversation, refetching from the backend if the entry was
    /// invalidated. Absent entries stay absent.
    ///
    /// # Errors
    /// Returns an error if a required refetch fails; the stale copy is kept.
    pub async fn read(&self, id: &str) -> ChatResult<Option<Conversation>> {
        let needs_fetch = match self.entries.get(id) {
            None => return Ok(None),
            Some(entry) => entry.stale,
        };
        // The guard is dropped before awaiting the backend.
        if !needs_fetch {
            return Ok(self.snapshot(id));
        }

        let fresh = self.backend.fetch(id).await?;
        self.insert(fresh.clone());
        Ok(Some(fresh))
    }

    /// Apply a mutation to a cached conversation. No-op when the entry is
    /// absent: the cache never fabricates a conversation from nothing.
    ///
    /// Updaters run under the entry guard, so writes apply in call order.
    /// Returns whether the update was applied.
    pub fn write(&self, id: &str, updater: impl FnOnce(&mut Conversation)) -> bool {
        let applied = match self.entries.get_mut(id) {
            Some(mut entry) => {
                updater(&mut entry.conversation);
                true
            }
            None => false,
        };
        if applied {
            self.bump();
        }
        applied
    }

    /// Mark an entry stale so the next `read` refetches canonical history.
    pub fn invalidate(&self, id: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.stale = true;
        }
        self.bump();
    }

    /// Drop an entry entirely (the view-unmount path).
    pub fn evict(&self, id: &str) {
        self.entries.remove(id);
        self.bump();
    }

    /// Subscribe to revision changes. Observers holding the receiver see a
    /// new revision after every insert, write, invalidation, or eviction.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::types::{Message, Role};
    use crate::test_support::InMemoryBackend;

    fn cache_with(conversation: Conversation) -> (ConversationCache, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new(conversation.clone()));
        let cache = ConversationCache::new(backend.clone());
        cache.insert(conversation);
        (cache, backend)
    }

    #[tokio::test]
    async fn test_read_fresh_entry_does_not_hit_backend() {
        let conversation = Conversation::new("c1", vec![Message::new(Role::User, "Hi")]);
        let (cache, backend) = cache_with(conversation.clone());

        let read = cache.read("c1").await;
        assert!(read.is_ok_and(|c| c == Some(conversation)));
        assert_eq!(backend.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_read_absent_entry_is_none() {
        let conversation = Conversation::new("c1", Vec::new());
        let (cache, backend) = cache_with(conversation);

        let read = cache.read("missing").await;
        assert!(read.is_ok_and(|c| c.is_none()));
        assert_eq!(backend.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_triggers_refetch() {
        let local = Conversation::new("c1", vec![Message::new(Role::User, "optimistic")]);
        let canonical = Conversation::new(
            "c1",
            vec![
                Message::new(Role::User, "optimistic"),
                Message::new(Role::Model, "canonical"),
            ],
        );
        let backend = Arc::new(InMemoryBackend::new(canonical.clone()));
        let cache = ConversationCache::new(backend.clone());
        cache.insert(local);

        cache.invalidate("c1");
        let read = cache.read("c1").await;
        assert!(read.is_ok_and(|c| c == Some(canonical)));
        assert_eq!(backend.fetch_count(), 1);

        // The refetched entry is fresh again.
        let again = cache.read("c1").await;
        assert!(again.is_ok());
        assert_eq!(backend.fetch_count(), 1);
    }

    #[test]
    fn test_write_absent_entry_is_noop() {
        let backend = Arc::new(InMemoryBackend::new(Conversation::new("c1", Vec::new())));
        let cache = ConversationCache::new(backend);

        let applied = cache.write("c1", |conv| {
            conv.history.push(Message::new(Role::User, "ghost"));
        });
        assert!(!applied);
        assert!(cache.snapshot("c1").is_none());
    }

    #[test]
    fn test_writes_apply_in_call_order() {
        let conversation = Conversation::new("c1", Vec::new());
        let (cache, _backend) = cache_with(conversation);

        for i in 0..10 {
            cache.write("c1", |conv| {
                conv.history.push(Message::new(Role::User, format!("m{i}")));
            });
        }
        let texts: Vec<String> = cache
            .snapshot("c1")
            .map(|c| c.history.iter().map(|m| m.first_text().to_string()).collect())
            .unwrap_or_default();
        let expected: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn test_revision_bumps_on_mutation() {
        let conversation = Conversation::new("c1", Vec::new());
        let (cache, _backend) = cache_with(conversation);
        let rx = cache.subscribe();
        let before = *rx.borrow();

        cache.write("c1", |conv| {
            conv.history.push(Message::new(Role::User, "Hi"));
        });
        cache.invalidate("c1");
        cache.evict("c1");

        assert_eq!(*rx.borrow(), before + 3);
    }
}
