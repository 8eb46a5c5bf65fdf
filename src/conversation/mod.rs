//! Conversation state: data model, shared cache, and persistence backend.

/// Persistence backend trait and HTTP implementation.
pub mod backend;
/// Shared keyed cache of conversation replicas.
pub mod cache;
/// Conversation data model and wire types.
pub mod types;

pub use backend::{BackendFuture, ConversationBackend, HttpConversationBackend};
pub use cache::ConversationCache;
pub use types::{AttachmentRef, Conversation, Message, MessagePart, PersistRequest, Role};
