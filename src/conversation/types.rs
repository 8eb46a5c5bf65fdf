//! Types for conversation state and the backend wire format.

use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human driving the conversation.
    User,
    /// The generative model.
    Model,
}

/// One content fragment of a message. History messages may carry several;
/// only the first text part is replayed when reseeding model context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    /// Plain text content.
    pub text: String,
}

/// A single entry in a conversation's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author role. Immutable once the message is created.
    pub role: Role,
    /// Content parts. `parts[0].text` is mutable only while the message is
    /// the in-flight streaming placeholder.
    pub parts: Vec<MessagePart>,
}

impl Message {
    /// Create a single-part message.
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![MessagePart { text: text.into() }],
        }
    }

    /// First text part, empty if the message has no parts.
    #[must_use]
    pub fn first_text(&self) -> &str {
        self.parts.first().map_or("", |part| part.text.as_str())
    }
}

/// A conversation as held in the cache: a possibly-stale replica of the
/// backend's canonical state, keyed by id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Backend-issued identifier.
    pub id: String,
    /// Ordered message history.
    pub history: Vec<Message>,
}

impl Conversation {
    /// Create a conversation with the given history.
    #[must_use]
    pub fn new(id: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            id: id.into(),
            history,
        }
    }
}

/// Reference to an uploaded attachment, as returned by the upload provider.
/// The binary is never re-read client-side; only the path travels onward.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Storage path of the uploaded file.
    #[serde(rename = "filePath")]
    pub file_path: String,
    /// Provider-specific metadata, kept opaque.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Body of the persistence call that finalizes one exchange.
///
/// `question` is omitted for the auto-run cycle (the question already exists
/// server-side); `img` is omitted when no attachment was staged.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistRequest {
    /// The user's question, absent for the auto-run initial message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// The fully accumulated model answer.
    pub answer: String,
    /// Attachment file path, if one was part of the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
}
