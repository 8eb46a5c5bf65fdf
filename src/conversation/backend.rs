//! Persistence backend for canonical conversation history.

use std::future::Future;
use std::pin::Pin;

use crate::config::BackendConfig;
use crate::error::{ChatError, ChatResult};

use super::types::{Conversation, PersistRequest};

/// Boxed future type for backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for the conversation persistence backend.
///
/// The backend owns canonical history; the cache holds a replica.
pub trait ConversationBackend: Send + Sync {
    /// Fetch the canonical conversation by id.
    ///
    /// # Errors
    /// Returns an error if the request fails or the id is unknown.
    fn fetch(&self, id: &str) -> BackendFuture<'_, ChatResult<Conversation>>;

    /// Persist one finalized exchange and return the updated conversation.
    ///
    /// # Errors
    /// Returns an error if the request fails or is rejected.
    fn persist(
        &self,
        id: &str,
        request: PersistRequest,
    ) -> BackendFuture<'_, ChatResult<Conversation>>;
}

/// HTTP implementation of the conversation backend.
///
/// Requests carry the session cookie jar, matching a browser client that
/// sends credentials with every call.
pub struct HttpConversationBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConversationBackend {
    /// Create a backend client from configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn conversation_url(&self, id: &str) -> String {
        format!("{}/conversations/{id}", self.base_url)
    }
}

impl ConversationBackend for HttpConversationBackend {
    fn fetch(&self, id: &str) -> BackendFuture<'_, ChatResult<Conversation>> {
        let url = self.conversation_url(id);
        Box::pin(async move {
            let response = self.client.get(&url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ChatError::BackendStatus(status.as_u16()));
            }
            Ok(response.json::<Conversation>().await?)
        })
    }

    fn persist(
        &self,
        id: &str,
        request: PersistRequest,
    ) -> BackendFuture<'_, ChatResult<Conversation>> {
        let url = self.conversation_url(id);
        Box::pin(async move {
            let response = self.client.put(&url).json(&request).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ChatError::BackendStatus(status.as_u16()));
            }
            Ok(response.json::<Conversation>().await?)
        })
    }
}
