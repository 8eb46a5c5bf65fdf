//! Orchestrator for one prompt submission cycle.
//!
//! Owns the lifecycle of a send: optimistic cache append, streaming,
//! per-chunk cache mirroring, persistence, and reconciliation. All failures
//! are caught here and logged; callers receive a `SendOutcome`, never a
//! panic or a raw error.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::conversation::backend::ConversationBackend;
use crate::conversation::cache::ConversationCache;
use crate::conversation::types::{Message, PersistRequest, Role};
use crate::error::{ChatError, ChatResult};
use crate::provider::session::{seed_turns, ModelProvider, PromptPart, StreamingSession};

use super::attachment::AttachmentStaging;

/// Lifecycle phase of the current send cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendState {
    /// No cycle in flight.
    Idle,
    /// Input accepted, stream not yet open.
    Submitting,
    /// Consuming the token stream.
    Streaming,
    /// Stream done, waiting for the backend ack.
    Persisting,
}

/// Outcome of a submission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Exchange streamed and persisted; the cache entry was invalidated so
    /// the next read refetches canonical history.
    Settled,
    /// Empty or whitespace-only input; no state changed, no I/O happened.
    RejectedEmpty,
    /// A cycle is already in flight; the input was dropped.
    RejectedBusy,
    /// Auto-run conditions were not met or it already ran.
    Skipped,
    /// Stream or persistence failed; logged, optimistic state left as
    /// last-known, controller back to idle.
    Failed,
}

/// Transient local display state: the question and partial answer shown by
/// the rendering collaborator until the exchange settles.
#[derive(Clone, Debug, Default)]
pub struct TransientDisplay {
    /// The submitted question, absent for the auto-run cycle.
    pub question: Option<String>,
    /// The answer accumulated so far, markdown-formatted model output.
    pub answer: String,
}

/// Drives one conversation's send cycles against the shared cache.
///
/// Exactly one controller writes to a given conversation id; every other
/// cache consumer is a read-only observer.
pub struct ConversationSyncController {
    conversation_id: String,
    cache: Arc<ConversationCache>,
    provider: Arc<dyn ModelProvider>,
    backend: Arc<dyn ConversationBackend>,
    staging: AttachmentStaging,
    state: SendState,
    has_auto_run: bool,
    transient: TransientDisplay,
}

impl ConversationSyncController {
    /// Create a controller for one conversation view.
    #[must_use]
    pub fn new(
        conversation_id: impl Into<String>,
        cache: Arc<ConversationCache>,
        provider: Arc<dyn ModelProvider>,
        backend: Arc<dyn ConversationBackend>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            cache,
            provider,
            backend,
            staging: AttachmentStaging::new(),
            state: SendState::Idle,
            has_auto_run: false,
            transient: TransientDisplay::default(),
        }
    }

    /// Current cycle phase.
    #[must_use]
    pub const fn state(&self) -> SendState {
        self.state
    }

    /// Transient question/answer shown while the cycle is unsettled.
    #[must_use]
    pub const fn transient(&self) -> &TransientDisplay {
        &self.transient
    }

    /// Attachment staging slot, for the upload collaborator.
    pub fn staging_mut(&mut self) -> &mut AttachmentStaging {
        &mut self.staging
    }

    /// Submit user input and run a full send cycle.
    ///
    /// Empty input and submissions while a cycle is in flight are rejected
    /// before any state change. The optimistic user message lands in the
    /// cache synchronously, before the first await, so no observer ever
    /// sees a model reply without its question.
    pub async fn submit(&mut self, text: &str) -> SendOutcome {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            debug!("Rejecting empty submission");
            return SendOutcome::RejectedEmpty;
        }
        if self.state != SendState::Idle {
            debug!(state = ?self.state, "Rejecting submission while a cycle is in flight");
            return SendOutcome::RejectedBusy;
        }

        self.run_cycle(trimmed.to_string(), true).await
    }

    /// Run the initial exchange for a conversation whose history is a lone
    /// user message with no reply yet.
    ///
    /// Fires at most once per controller lifetime, no matter how often the
    /// surrounding view re-renders. The message is not re-appended and the
    /// persisted payload carries no question: both already exist
    /// server-side.
    pub async fn auto_run(&mut self) -> SendOutcome {
        if self.has_auto_run {
            return SendOutcome::Skipped;
        }
        self.has_auto_run = true;

        if self.state != SendState::Idle {
            return SendOutcome::Skipped;
        }
        let Some(conversation) = self.cache.snapshot(&self.conversation_id) else {
            return SendOutcome::Skipped;
        };
        let [only] = conversation.history.as_slice() else {
            return SendOutcome::Skipped;
        };
        if only.role != Role::User {
            return SendOutcome::Skipped;
        }

        let text = only.first_text().to_string();
        info!(id = %self.conversation_id, "Auto-running initial exchange");
        self.run_cycle(text, false).await
    }

    /// Drive one cycle to completion and map the result to an outcome.
    async fn run_cycle(&mut self, text: String, include_question: bool) -> SendOutcome {
        self.state = SendState::Submitting;
        match self.drive(text, include_question).await {
            Ok(()) => {
                // Transient display state survives until the mutation
                // settles; only now is it safe to clear without flicker.
                self.transient = TransientDisplay::default();
                self.staging.reset();
                self.state = SendState::Idle;
                SendOutcome::Settled
            }
            Err(err) => {
                // Partial text stays visible as last-known state; nothing
                // was persisted and the cache keeps the optimistic copy.
                error!(id = %self.conversation_id, %err, "Send cycle failed");
                self.state = SendState::Idle;
                SendOutcome::Failed
            }
        }
    }

    async fn drive(&mut self, text: String, include_question: bool) -> ChatResult<()> {
        // Seed context from the pre-submit history; the new question goes
        // out as the prompt, not as a replayed turn.
        let conversation = self
            .cache
            .snapshot(&self.conversation_id)
            .ok_or_else(|| ChatError::MissingConversation(self.conversation_id.clone()))?;
        let history = seed_turns(&conversation.history);

        if include_question {
            self.cache.write(&self.conversation_id, |conv| {
                conv.history.push(Message::new(Role::User, text.as_str()));
            });
            self.transient.question = Some(text.clone());
        }

        let staged = self.staging.take();
        let img = staged.as_ref().map(|(reference, _)| reference.file_path.clone());

        let mut parts = Vec::new();
        if let Some((_, payload)) = staged {
            parts.push(PromptPart::Attachment(payload));
        }
        parts.push(PromptPart::Text(text.clone()));

        let session = StreamingSession::new(Arc::clone(&self.provider), history);
        self.state = SendState::Streaming;
        let mut chunks = session.send(parts).await?;

        let mut accumulated = String::new();
        while let Some(chunk) = chunks.next().await {
            let fragment = chunk?;
            accumulated.push_str(&fragment);
            self.transient.answer.clone_from(&accumulated);
            self.mirror_answer(&accumulated);
        }
        debug!(
            id = %self.conversation_id,
            answer_len = accumulated.len(),
            "Stream complete"
        );

        self.state = SendState::Persisting;
        let request = PersistRequest {
            question: include_question.then_some(text),
            answer: accumulated,
            img,
        };
        self.backend.persist(&self.conversation_id, request).await?;

        // Discard the optimistic copy: the next read refetches canonical
        // history from the backend.
        self.cache.invalidate(&self.conversation_id);
        info!(id = %self.conversation_id, "Exchange persisted");
        Ok(())
    }

    /// Mirror the accumulated answer into the cache: update the trailing
    /// model placeholder in place, or append exactly one. This keeps the
    /// history free of consecutive model entries no matter how chunk
    /// arrivals interleave with the first cache write.
    fn mirror_answer(&self, accumulated: &str) {
        self.cache.write(&self.conversation_id, |conv| {
            match conv.history.last_mut() {
                Some(last) if last.role == Role::Model => {
                    if let Some(part) = last.parts.first_mut() {
                        part.text = accumulated.to_string();
                    } else {
                        *last = Message::new(Role::Model, accumulated);
                    }
                }
                _ => conv.history.push(Message::new(Role::Model, accumulated)),
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn force_state(&mut self, state: SendState) {
        self.state = state;
    }
}
