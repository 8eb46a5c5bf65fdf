//! Scripted test doubles shared by the module tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::conversation::backend::{BackendFuture, ConversationBackend};
use crate::conversation::types::{AttachmentRef, Conversation, Message, PersistRequest, Role};
use crate::error::{ChatError, ChatResult};
use crate::provider::session::{ChunkStream, ModelProvider, ProviderFuture, StreamRequest};
use crate::sync::attachment::{AttachmentUploader, UploadFuture, UploadedAttachment};

/// Model provider that replays a fixed chunk script, yielding between
/// chunks so consumers really interleave with arrivals.
pub struct ScriptedProvider {
    chunks: Vec<String>,
    fail_after: bool,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedProvider {
    pub fn with_chunks(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(ToString::to_string).collect(),
            fail_after: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Emit the given chunks, then fail the stream in-band.
    pub fn failing_after(chunks: &[&str]) -> Self {
        Self {
            fail_after: true,
            ..Self::with_chunks(chunks)
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn last_request(&self) -> Option<StreamRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl ModelProvider for ScriptedProvider {
    fn stream_reply(&self, request: StreamRequest) -> ProviderFuture<'_, ChatResult<ChunkStream>> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request);
        let chunks = self.chunks.clone();
        let fail_after = self.fail_after;

        Box::pin(async move {
            let (tx, stream) = ChunkStream::channel();
            tokio::spawn(async move {
                for chunk in chunks {
                    tokio::task::yield_now().await;
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                if fail_after {
                    let _ = tx
                        .send(Err(ChatError::Stream("connection reset".to_string())))
                        .await;
                }
            });
            Ok(stream)
        })
    }
}

/// In-memory persistence backend holding one canonical conversation.
pub struct InMemoryBackend {
    canonical: Mutex<Conversation>,
    fetches: AtomicUsize,
    persists: Mutex<Vec<PersistRequest>>,
    fail_persist: bool,
}

impl InMemoryBackend {
    pub fn new(canonical: Conversation) -> Self {
        Self {
            canonical: Mutex::new(canonical),
            fetches: AtomicUsize::new(0),
            persists: Mutex::new(Vec::new()),
            fail_persist: false,
        }
    }

    /// Backend whose persist call always fails with a server error.
    pub fn failing_persist(canonical: Conversation) -> Self {
        Self {
            fail_persist: true,
            ..Self::new(canonical)
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn persist_requests(&self) -> Vec<PersistRequest> {
        self.persists
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl ConversationBackend for InMemoryBackend {
    fn fetch(&self, _id: &str) -> BackendFuture<'_, ChatResult<Conversation>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let conversation = self
            .canonical
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        Box::pin(async move { Ok(conversation) })
    }

    fn persist(
        &self,
        _id: &str,
        request: PersistRequest,
    ) -> BackendFuture<'_, ChatResult<Conversation>> {
        self.persists
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request.clone());
        if self.fail_persist {
            return Box::pin(async move { Err(ChatError::BackendStatus(500)) });
        }

        let mut canonical = self
            .canonical
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(question) = request.question {
            canonical.history.push(Message::new(Role::User, question));
        }
        canonical
            .history
            .push(Message::new(Role::Model, request.answer));
        let updated = canonical.clone();
        Box::pin(async move { Ok(updated) })
    }
}

/// Upload provider returning a scripted result.
pub struct ScriptedUploader {
    result: Result<String, ()>,
}

impl ScriptedUploader {
    pub fn succeeding(file_path: &str) -> Self {
        Self {
            result: Ok(file_path.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { result: Err(()) }
    }
}

impl AttachmentUploader for ScriptedUploader {
    fn upload(
        &self,
        _file_name: &str,
        _bytes: Vec<u8>,
    ) -> UploadFuture<'_, ChatResult<UploadedAttachment>> {
        let result = self.result.clone();
        Box::pin(async move {
            match result {
                Ok(file_path) => Ok(UploadedAttachment {
                    reference: AttachmentRef {
                        file_path,
                        metadata: serde_json::Value::Null,
                    },
                    provider_payload: serde_json::json!({
                        "inlineData": { "mimeType": "image/png", "data": "AAAA" }
                    }),
                }),
                Err(()) => Err(ChatError::UploadStatus(500)),
            }
        })
    }
}
