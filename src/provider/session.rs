//! Streaming session over a generative-model provider.
//!
//! One session covers exactly one prompt/reply exchange: the session is
//! consumed by `send` and the resulting chunk stream is single-pass.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::conversation::types::{Message, Role};
use crate::error::ChatResult;

/// Boxed future type for provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Bounded capacity of the chunk channel. Backpressure here keeps a slow
/// consumer from buffering the whole reply inside the channel.
const CHUNK_CHANNEL_CAPACITY: usize = 32;

/// One prior turn replayed to the model for context: role and text only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryTurn {
    /// Author of the turn.
    pub role: Role,
    /// Text of the turn's first part.
    pub text: String,
}

/// One part of the new prompt being sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptPart {
    /// Plain prompt text.
    Text(String),
    /// Opaque provider payload for a staged attachment. Sent as-is; the
    /// upload provider produced it and only the model provider reads it.
    Attachment(serde_json::Value),
}

/// A full streaming request: seeded history plus the new prompt parts.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    /// Prior conversation turns, oldest first.
    pub history: Vec<HistoryTurn>,
    /// New prompt parts; an attachment part precedes the text part.
    pub parts: Vec<PromptPart>,
}

/// Single-pass, non-restartable sequence of reply fragments.
///
/// Chunks arrive in emission order through a single-consumer queue; already
/// consumed chunks are not buffered or replayed. Concatenating every `Ok`
/// chunk reconstructs the reply text. An `Err` chunk means the stream failed
/// mid-flight; the channel closes right after.
pub struct ChunkStream {
    rx: mpsc::Receiver<ChatResult<String>>,
}

impl ChunkStream {
    /// Create a chunk channel: the provider feeds the sender, the consumer
    /// drains the stream.
    #[must_use]
    pub fn channel() -> (mpsc::Sender<ChatResult<String>>, Self) {
        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        (tx, Self { rx })
    }

    /// Next fragment, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<ChatResult<String>> {
        self.rx.recv().await
    }
}

/// Trait for streaming model providers.
pub trait ModelProvider: Send + Sync {
    /// Send a prompt with seeded history and stream the reply.
    ///
    /// # Errors
    /// Returns an error if the request cannot be started; mid-stream
    /// failures surface as an `Err` chunk inside the stream instead.
    fn stream_reply(&self, request: StreamRequest) -> ProviderFuture<'_, ChatResult<ChunkStream>>;
}

/// A single prompt/reply exchange seeded with prior history.
pub struct StreamingSession {
    provider: Arc<dyn ModelProvider>,
    history: Vec<HistoryTurn>,
}

impl StreamingSession {
    /// Create a session seeded with prior turns.
    #[must_use]
    pub fn new(provider: Arc<dyn ModelProvider>, history: Vec<HistoryTurn>) -> Self {
        Self { provider, history }
    }

    /// Send the prompt and stream the reply. Consumes the session: one
    /// exchange per session, no replay.
    ///
    /// # Errors
    /// Returns an error if the provider rejects the request up front.
    pub async fn send(self, parts: Vec<PromptPart>) -> ChatResult<ChunkStream> {
        let request = StreamRequest {
            history: self.history,
            parts,
        };
        self.provider.stream_reply(request).await
    }
}

/// Map history messages to replayable turns: role plus first text part.
///
/// Attachments and extra parts from history are intentionally dropped when
/// reseeding context; only the text transcript travels back to the model.
#[must_use]
pub fn seed_turns(history: &[Message]) -> Vec<HistoryTurn> {
    history
        .iter()
        .map(|message| HistoryTurn {
            role: message.role,
            text: message.first_text().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedProvider;

    #[test]
    fn test_seed_turns_keeps_first_text_only() {
        use crate::conversation::types::MessagePart;

        let history = vec![
            Message::new(Role::User, "Hi"),
            Message {
                role: Role::Model,
                parts: vec![
                    MessagePart {
                        text: "Hello".to_string(),
                    },
                    MessagePart {
                        text: "ignored".to_string(),
                    },
                ],
            },
        ];

        let turns = seed_turns(&history);
        assert_eq!(
            turns,
            vec![
                HistoryTurn {
                    role: Role::User,
                    text: "Hi".to_string(),
                },
                HistoryTurn {
                    role: Role::Model,
                    text: "Hello".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_chunks_accumulate_in_emission_order() {
        let provider = Arc::new(ScriptedProvider::with_chunks(&["He", "llo", " wor", "ld"]));
        let session = StreamingSession::new(provider, Vec::new());

        let stream = session.send(vec![PromptPart::Text("Hi".to_string())]).await;
        let Ok(mut stream) = stream else {
            unreachable!("scripted provider never rejects");
        };

        let mut accumulated = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) => accumulated.push_str(&text),
                Err(err) => unreachable!("unexpected stream error: {err}"),
            }
        }
        assert_eq!(accumulated, "Hello world");
    }

    #[tokio::test]
    async fn test_mid_stream_error_surfaces_in_band() {
        let provider = Arc::new(ScriptedProvider::failing_after(&["Hello wor"]));
        let session = StreamingSession::new(provider, Vec::new());

        let stream = session.send(vec![PromptPart::Text("Hi".to_string())]).await;
        let Ok(mut stream) = stream else {
            unreachable!("scripted provider never rejects");
        };

        let mut accumulated = String::new();
        let mut failed = false;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) => accumulated.push_str(&text),
                Err(_) => failed = true,
            }
        }
        assert_eq!(accumulated, "Hello wor");
        assert!(failed);
    }
}
