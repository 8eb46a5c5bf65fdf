//! SSE streaming client for the Gemini `streamGenerateContent` API.
//!
//! The reply arrives as `data: {json}` lines; network reads can split a line
//! anywhere, so bytes are reassembled into complete lines before parsing.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::conversation::types::Role;
use crate::error::{ChatError, ChatResult};

use super::session::{ChunkStream, ModelProvider, PromptPart, ProviderFuture, StreamRequest};

/// SSE payload line prefix.
const SSE_DATA_PREFIX: &str = "data: ";

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: String,
}

/// Streaming Gemini client.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiProvider {
    /// Create a provider client from configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ProviderConfig) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent",
            self.base_url, self.model
        )
    }

    /// Assemble the streaming request. The API key travels as a query
    /// parameter so the client percent-encodes it.
    fn stream_request(&self, body: &GenerateRequest) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(self.stream_url())
            .query(&[("alt", "sse")])
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }
        request
    }
}

impl ModelProvider for GeminiProvider {
    fn stream_reply(&self, request: StreamRequest) -> ProviderFuture<'_, ChatResult<ChunkStream>> {
        Box::pin(async move {
            let body = build_request(&request);
            let response = self.stream_request(&body).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ChatError::ProviderStatus(status.as_u16()));
            }

            let (tx, chunks) = ChunkStream::channel();
            tokio::spawn(forward_sse(response, tx));
            Ok(chunks)
        })
    }
}

/// Build the request body: seeded history turns first, then the new prompt
/// parts as a single user turn.
fn build_request(request: &StreamRequest) -> GenerateRequest {
    let mut contents: Vec<Content> = request
        .history
        .iter()
        .map(|turn| Content {
            role: role_name(turn.role),
            parts: vec![serde_json::json!({ "text": turn.text })],
        })
        .collect();

    let parts = request
        .parts
        .iter()
        .map(|part| match part {
            PromptPart::Text(text) => serde_json::json!({ "text": text }),
            PromptPart::Attachment(payload) => payload.clone(),
        })
        .collect();
    contents.push(Content {
        role: "user",
        parts,
    });

    GenerateRequest { contents }
}

const fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "model",
    }
}

/// Forward SSE lines from the HTTP response into the chunk channel until the
/// stream ends, the consumer goes away, or the transport fails.
async fn forward_sse(response: reqwest::Response, tx: mpsc::Sender<ChatResult<String>>) {
    let mut bytes = response.bytes_stream();
    let mut lines = LineBuffer::new();

    while let Some(item) = bytes.next().await {
        match item {
            Ok(chunk) => {
                for line in lines.push(&chunk) {
                    let Some(text) = parse_sse_line(&line) else {
                        continue;
                    };
                    if tx.send(Ok(text)).await.is_err() {
                        debug!("Chunk consumer dropped, stopping stream forwarder");
                        return;
                    }
                }
            }
            Err(err) => {
                warn!(?err, "Token stream failed mid-flight");
                let _ = tx.send(Err(ChatError::Stream(err.to_string()))).await;
                return;
            }
        }
    }

    if let Some(line) = lines.flush() {
        if let Some(text) = parse_sse_line(&line) {
            let _ = tx.send(Ok(text)).await;
        }
    }
}

/// Reassembles byte reads into complete lines. A line (and any multi-byte
/// character inside it) may span several network reads.
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed bytes and return every now-complete line, newline stripped.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Remaining partial line, if the stream ended without a trailing newline.
    fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches('\r')
            .to_string();
        self.buf.clear();
        Some(line)
    }
}

/// Extract the text fragment from one SSE line, if it carries any.
fn parse_sse_line(line: &str) -> Option<String> {
    let payload = line.strip_prefix(SSE_DATA_PREFIX)?;
    let chunk: GenerateChunk = serde_json::from_str(payload).ok()?;
    chunk
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content.parts.into_iter().next())
        .map(|part| part.text)
}
